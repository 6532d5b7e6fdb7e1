use async_trait::async_trait;
use domain::{DeviceSnapshot, SwitchState};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchlog_cloud::{CloudError, StatusSource};
use switchlog_monitor::{Clock, DeviceOutcome, PollingLoop};
use switchlog_storage::{
    InMemoryStatusStore, StatusRecord, StatusStore, StorageError, TransitionWrite,
};
use tokio::sync::watch;

/// 按设备预置拉取结果；队列耗尽后重复最后一个结果。
#[derive(Default)]
struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Result<SwitchState, String>>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn with(device_id: &str, script: Vec<Result<SwitchState, String>>) -> Self {
        let source = Self::default();
        source.push(device_id, script);
        source
    }

    fn push(&self, device_id: &str, script: Vec<Result<SwitchState, String>>) {
        self.scripts
            .lock()
            .expect("lock")
            .insert(device_id.to_string(), script.into());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch_status(
        &self,
        device_id: &str,
    ) -> Result<(DeviceSnapshot, SwitchState), CloudError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().expect("lock");
        let queue = scripts
            .get_mut(device_id)
            .ok_or_else(|| CloudError::Api {
                code: 2001,
                msg: "device not scripted".to_string(),
            })?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Ok(state)) => Ok((DeviceSnapshot::bare(device_id), state)),
            Some(Err(msg)) => Err(CloudError::Network(msg)),
            None => Err(CloudError::Network("empty script".to_string())),
        }
    }
}

/// 每次读取前进 `step` 秒的手动时钟。
struct SteppingClock {
    next: AtomicI64,
    step: i64,
}

impl SteppingClock {
    fn starting_at(start: i64, step: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now_unix_seconds(&self) -> i64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }
}

/// 前 `failures` 次复合写入失败的存储包装。
struct FlakyStore {
    inner: InMemoryStatusStore,
    failures: AtomicUsize,
    write_attempts: AtomicUsize,
}

impl FlakyStore {
    fn failing(failures: usize) -> Self {
        Self {
            inner: InMemoryStatusStore::new(),
            failures: AtomicUsize::new(failures),
            write_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StatusStore for FlakyStore {
    async fn get_last_status(
        &self,
        device_id: &str,
    ) -> Result<Option<StatusRecord>, StorageError> {
        self.inner.get_last_status(device_id).await
    }

    async fn upsert_device(&self, snapshot: &DeviceSnapshot) -> Result<(), StorageError> {
        self.inner.upsert_device(snapshot).await
    }

    async fn append_transition(
        &self,
        device_id: &str,
        timestamp: i64,
        switch_state: bool,
    ) -> Result<StatusRecord, StorageError> {
        self.inner
            .append_transition(device_id, timestamp, switch_state)
            .await
    }

    async fn record_transition_if_new(
        &self,
        device_id: &str,
        candidate: bool,
        snapshot: &DeviceSnapshot,
        timestamp: i64,
    ) -> Result<TransitionWrite, StorageError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::new("connection reset"));
        }
        self.inner
            .record_transition_if_new(device_id, candidate, snapshot, timestamp)
            .await
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceSnapshot>, StorageError> {
        self.inner.find_device(device_id).await
    }

    async fn list_recent(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StatusRecord>, StorageError> {
        self.inner.list_recent(device_id, limit).await
    }

    async fn list_between(
        &self,
        device_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StatusRecord>, StorageError> {
        self.inner.list_between(device_id, from, to).await
    }
}

fn states(values: &[bool]) -> Vec<Result<SwitchState, String>> {
    values
        .iter()
        .map(|value| Ok(SwitchState::from_bool(*value)))
        .collect()
}

fn polling_loop(
    source: Arc<dyn StatusSource>,
    store: Arc<dyn StatusStore>,
    device_ids: &[&str],
) -> PollingLoop {
    PollingLoop::new(
        source,
        store,
        Arc::new(SteppingClock::starting_at(1000, 10)),
        device_ids.iter().map(|id| id.to_string()).collect(),
        Duration::from_millis(10),
    )
    .expect("loop")
}

async fn seed(store: &InMemoryStatusStore, device_id: &str, timestamp: i64, state: bool) {
    store
        .upsert_device(&DeviceSnapshot::bare(device_id))
        .await
        .expect("seed device");
    store
        .append_transition(device_id, timestamp, state)
        .await
        .expect("seed status");
}

#[tokio::test]
async fn scripted_sequence_writes_only_edges() {
    let store = Arc::new(InMemoryStatusStore::new());
    seed(&store, "dev1", 0, false).await;
    let source = Arc::new(ScriptedSource::with(
        "dev1",
        states(&[false, false, true, true, false]),
    ));
    let mut monitor = polling_loop(source, store.clone(), &["dev1"]);

    let mut written = 0;
    let mut cursor_values = Vec::new();
    for _ in 0..5 {
        written += monitor.tick().await.written();
        cursor_values.push(monitor.cursor().value("dev1"));
    }

    assert_eq!(written, 2);
    assert_eq!(
        cursor_values,
        vec![Some(false), Some(false), Some(true), Some(true), Some(false)]
    );
    let rows = store.list_between("dev1", 1, i64::MAX).await.expect("rows");
    assert_eq!(
        rows,
        vec![
            StatusRecord::new("dev1", 1020, true),
            StatusRecord::new("dev1", 1040, false),
        ]
    );
}

#[tokio::test]
async fn fetch_failure_leaves_cursor_and_writes_nothing() {
    let store = Arc::new(InMemoryStatusStore::new());
    let source = Arc::new(ScriptedSource::with(
        "dev1",
        vec![
            Ok(SwitchState::On),
            Ok(SwitchState::On),
            Err("connection refused".to_string()),
            Ok(SwitchState::On),
        ],
    ));
    let mut monitor = polling_loop(source, store.clone(), &["dev1"]);

    monitor.tick().await;
    monitor.tick().await;
    let before = monitor.cursor().get("dev1");

    let report = monitor.tick().await;
    assert_eq!(report.outcome("dev1"), Some(&DeviceOutcome::FetchFailed));
    assert_eq!(report.written(), 0);
    assert_eq!(monitor.cursor().get("dev1"), before);
    assert_eq!(store.status_count(), 1);

    let report = monitor.tick().await;
    assert_eq!(report.outcome("dev1"), Some(&DeviceOutcome::Unchanged));
    assert_eq!(store.status_count(), 1);
}

#[tokio::test]
async fn end_to_end_dev1_scenario() {
    let store = Arc::new(InMemoryStatusStore::new());
    let source = Arc::new(ScriptedSource::with("dev1", states(&[true, true, false])));
    let mut monitor = polling_loop(source, store.clone(), &["dev1"]);

    let first = monitor.tick().await;
    assert_eq!(
        first.outcome("dev1"),
        Some(&DeviceOutcome::Written(StatusRecord::new("dev1", 1000, true)))
    );
    assert!(store.find_device("dev1").await.expect("find").is_some());

    let second = monitor.tick().await;
    assert_eq!(second.outcome("dev1"), Some(&DeviceOutcome::Unchanged));
    assert_eq!(store.status_count(), 1);

    let third = monitor.tick().await;
    assert_eq!(
        third.outcome("dev1"),
        Some(&DeviceOutcome::Written(StatusRecord::new("dev1", 1020, false)))
    );

    let rows = store.list_between("dev1", 0, i64::MAX).await.expect("rows");
    assert_eq!(
        rows,
        vec![
            StatusRecord::new("dev1", 1000, true),
            StatusRecord::new("dev1", 1020, false),
        ]
    );
    assert_eq!(monitor.ticks(), 3);
}

#[tokio::test]
async fn unknown_state_is_never_written() {
    let store = Arc::new(InMemoryStatusStore::new());
    let source = Arc::new(ScriptedSource::with(
        "dev1",
        vec![Ok(SwitchState::Unknown), Ok(SwitchState::Off)],
    ));
    let mut monitor = polling_loop(source, store.clone(), &["dev1"]);

    let report = monitor.tick().await;
    assert_eq!(report.outcome("dev1"), Some(&DeviceOutcome::StateUnknown));
    assert_eq!(store.status_count(), 0);
    assert_eq!(monitor.cursor().get("dev1"), Some(None));

    let report = monitor.tick().await;
    assert!(matches!(
        report.outcome("dev1"),
        Some(DeviceOutcome::Written(record)) if !record.switch_state
    ));
}

#[tokio::test]
async fn persistence_failure_is_retried_next_tick() {
    let store = Arc::new(FlakyStore::failing(1));
    let source = Arc::new(ScriptedSource::with("dev1", states(&[true])));
    let mut monitor = polling_loop(source, store.clone(), &["dev1"]);

    let report = monitor.tick().await;
    assert_eq!(report.outcome("dev1"), Some(&DeviceOutcome::PersistFailed));
    assert_eq!(monitor.cursor().value("dev1"), None);
    assert_eq!(store.inner.status_count(), 0);

    let report = monitor.tick().await;
    assert_eq!(report.written(), 1);
    assert_eq!(monitor.cursor().value("dev1"), Some(true));
    assert_eq!(store.write_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(store.inner.status_count(), 1);
}

#[tokio::test]
async fn stale_cursor_reconciles_without_duplicate_row() {
    let store = Arc::new(InMemoryStatusStore::new());
    let source = Arc::new(ScriptedSource::with("dev1", states(&[false, true])));
    let mut monitor = polling_loop(source, store.clone(), &["dev1"]);

    monitor.tick().await;
    assert_eq!(monitor.cursor().value("dev1"), Some(false));

    // 另一个写入方抢先记录了 true。
    store
        .record_transition_if_new("dev1", true, &DeviceSnapshot::bare("dev1"), 1005)
        .await
        .expect("concurrent write");

    let report = monitor.tick().await;
    assert_eq!(report.outcome("dev1"), Some(&DeviceOutcome::AlreadyCurrent));
    assert_eq!(monitor.cursor().value("dev1"), Some(true));
    assert_eq!(store.status_count(), 2);
}

#[tokio::test]
async fn one_device_failure_does_not_block_others() {
    let store = Arc::new(InMemoryStatusStore::new());
    let source = Arc::new(ScriptedSource::with(
        "dev1",
        vec![Err("timeout".to_string())],
    ));
    source.push("dev2", states(&[true]));
    let mut monitor = polling_loop(source.clone(), store.clone(), &["dev1", "dev2"]);

    let report = monitor.tick().await;
    assert_eq!(report.outcome("dev1"), Some(&DeviceOutcome::FetchFailed));
    assert!(matches!(
        report.outcome("dev2"),
        Some(DeviceOutcome::Written(_))
    ));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn rejects_invalid_construction() {
    let store: Arc<dyn StatusStore> = Arc::new(InMemoryStatusStore::new());
    let source: Arc<dyn StatusSource> = Arc::new(ScriptedSource::default());
    let clock: Arc<dyn Clock> = Arc::new(SteppingClock::starting_at(0, 1));

    assert!(
        PollingLoop::new(
            source.clone(),
            store.clone(),
            clock.clone(),
            Vec::new(),
            Duration::from_secs(5)
        )
        .is_err()
    );
    assert!(
        PollingLoop::new(
            source,
            store,
            clock,
            vec!["dev1".to_string()],
            Duration::ZERO
        )
        .is_err()
    );
}

#[tokio::test]
async fn run_stops_on_shutdown_signal() {
    let store = Arc::new(InMemoryStatusStore::new());
    let source = Arc::new(ScriptedSource::with("dev1", states(&[true])));
    let mut monitor = PollingLoop::new(
        source,
        store.clone(),
        Arc::new(SteppingClock::starting_at(1000, 10)),
        vec!["dev1".to_string()],
        Duration::from_secs(3600),
    )
    .expect("loop");

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        monitor.run(rx).await;
        monitor
    });

    // 等第一轮完成后再发停机信号，循环此时停在间隔等待中。
    for _ in 0..200 {
        if store.status_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tx.send(true).expect("send shutdown");

    let monitor = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("stopped in time")
        .expect("join");
    assert_eq!(monitor.ticks(), 1);
    assert_eq!(store.status_count(), 1);
}

/// 拉取指定设备时顺带发出停机信号，模拟处理中途收到 Ctrl+C。
struct ShutdownMidFetchSource {
    trigger: String,
    shutdown: watch::Sender<bool>,
    fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl StatusSource for ShutdownMidFetchSource {
    async fn fetch_status(
        &self,
        device_id: &str,
    ) -> Result<(DeviceSnapshot, SwitchState), CloudError> {
        self.fetched
            .lock()
            .expect("lock")
            .push(device_id.to_string());
        if device_id == self.trigger {
            self.shutdown.send_replace(true);
        }
        Ok((DeviceSnapshot::bare(device_id), SwitchState::On))
    }
}

#[tokio::test]
async fn shutdown_during_fetch_finishes_current_device() {
    let (tx, rx) = watch::channel(false);
    let source = Arc::new(ShutdownMidFetchSource {
        trigger: "dev1".to_string(),
        shutdown: tx,
        fetched: Mutex::new(Vec::new()),
    });
    let store = Arc::new(InMemoryStatusStore::new());
    let mut monitor = PollingLoop::new(
        source.clone(),
        store.clone(),
        Arc::new(SteppingClock::starting_at(1000, 10)),
        vec!["dev1".to_string(), "dev2".to_string()],
        Duration::from_secs(3600),
    )
    .expect("loop");

    tokio::time::timeout(Duration::from_secs(5), monitor.run(rx))
        .await
        .expect("stopped in time");

    assert_eq!(
        store.get_last_status("dev1").await.expect("read"),
        Some(StatusRecord::new("dev1", 1000, true))
    );
    assert_eq!(store.get_last_status("dev2").await.expect("read"), None);
    assert_eq!(store.status_count(), 1);
    let fetched = source.fetched.lock().expect("lock").clone();
    assert_eq!(fetched, vec!["dev1".to_string()]);
    assert_eq!(monitor.ticks(), 1);
}
