//! Postgres 状态存储实现
//!
//! 写入路径统一走事务 + `pg_advisory_xact_lock(hashtext(device_id))`，
//! 同一设备的读-比较-写在多个进程实例之间也是串行的；锁随事务结束释放。

use crate::error::StorageError;
use crate::models::{StatusRecord, TransitionWrite};
use crate::traits::StatusStore;
use crate::validation::{ensure_device_id, ensure_monotonic, ensure_snapshot_matches};
use domain::DeviceSnapshot;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

pub struct PgStatusStore {
    pub pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

fn status_from_row(row: &PgRow) -> Result<StatusRecord, StorageError> {
    Ok(StatusRecord {
        device_id: row.try_get("device_id")?,
        timestamp: row.try_get("timestamp")?,
        switch_state: row.try_get("switch_state")?,
    })
}

async fn lock_device(conn: &mut PgConnection, device_id: &str) -> Result<(), StorageError> {
    sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
        .bind(device_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn last_status(
    conn: &mut PgConnection,
    device_id: &str,
) -> Result<Option<StatusRecord>, StorageError> {
    let row = sqlx::query(
        "select device_id, \"timestamp\", switch_state from device_status \
         where device_id = $1 order by \"timestamp\" desc, id desc limit 1",
    )
    .bind(device_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(status_from_row).transpose()
}

async fn upsert_device_row(
    conn: &mut PgConnection,
    snapshot: &DeviceSnapshot,
) -> Result<(), StorageError> {
    sqlx::query(
        "insert into devices (device_id, name, category, online, active_time, create_time, \
         update_time, ip, model, time_zone) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         on conflict (device_id) do update set \
         name = excluded.name, \
         category = excluded.category, \
         online = excluded.online, \
         active_time = excluded.active_time, \
         create_time = excluded.create_time, \
         update_time = excluded.update_time, \
         ip = excluded.ip, \
         model = excluded.model, \
         time_zone = excluded.time_zone",
    )
    .bind(&snapshot.device_id)
    .bind(&snapshot.name)
    .bind(&snapshot.category)
    .bind(snapshot.online)
    .bind(snapshot.active_time)
    .bind(snapshot.create_time)
    .bind(snapshot.update_time)
    .bind(&snapshot.ip)
    .bind(&snapshot.model)
    .bind(&snapshot.time_zone)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_status_row(
    conn: &mut PgConnection,
    device_id: &str,
    timestamp: i64,
    switch_state: bool,
) -> Result<StatusRecord, StorageError> {
    sqlx::query(
        "insert into device_status (device_id, \"timestamp\", switch_state) values ($1, $2, $3)",
    )
    .bind(device_id)
    .bind(timestamp)
    .bind(switch_state)
    .execute(&mut *conn)
    .await?;
    Ok(StatusRecord::new(device_id, timestamp, switch_state))
}

#[async_trait::async_trait]
impl StatusStore for PgStatusStore {
    async fn get_last_status(
        &self,
        device_id: &str,
    ) -> Result<Option<StatusRecord>, StorageError> {
        ensure_device_id(device_id)?;
        let mut conn = self.pool.acquire().await?;
        last_status(&mut conn, device_id).await
    }

    async fn upsert_device(&self, snapshot: &DeviceSnapshot) -> Result<(), StorageError> {
        ensure_device_id(&snapshot.device_id)?;
        let mut conn = self.pool.acquire().await?;
        upsert_device_row(&mut conn, snapshot).await
    }

    async fn append_transition(
        &self,
        device_id: &str,
        timestamp: i64,
        switch_state: bool,
    ) -> Result<StatusRecord, StorageError> {
        ensure_device_id(device_id)?;
        let mut tx = self.pool.begin().await?;
        lock_device(&mut tx, device_id).await?;
        let last = last_status(&mut tx, device_id).await?;
        ensure_monotonic(last.as_ref(), timestamp)?;
        let record = insert_status_row(&mut tx, device_id, timestamp, switch_state).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn record_transition_if_new(
        &self,
        device_id: &str,
        candidate: bool,
        snapshot: &DeviceSnapshot,
        timestamp: i64,
    ) -> Result<TransitionWrite, StorageError> {
        ensure_snapshot_matches(device_id, snapshot)?;
        let mut tx = self.pool.begin().await?;
        lock_device(&mut tx, device_id).await?;
        let last = last_status(&mut tx, device_id).await?;
        if last.as_ref().map(|record| record.switch_state) == Some(candidate) {
            // 未提交的事务在 drop 时回滚，只释放锁。
            debug!(
                target: "switchlog.storage",
                device_id = %device_id,
                switch_state = candidate,
                "transition_already_current"
            );
            return Ok(TransitionWrite::AlreadyCurrent);
        }
        ensure_monotonic(last.as_ref(), timestamp)?;
        upsert_device_row(&mut tx, snapshot).await?;
        let record = insert_status_row(&mut tx, device_id, timestamp, candidate).await?;
        tx.commit().await?;
        debug!(
            target: "switchlog.storage",
            device_id = %device_id,
            timestamp,
            switch_state = candidate,
            "transition_committed"
        );
        Ok(TransitionWrite::Written(record))
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceSnapshot>, StorageError> {
        ensure_device_id(device_id)?;
        let row = sqlx::query(
            "select device_id, name, category, online, active_time, create_time, update_time, \
             ip, model, time_zone from devices where device_id = $1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(DeviceSnapshot {
            device_id: row.try_get("device_id")?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            online: row.try_get::<Option<bool>, _>("online")?.unwrap_or(false),
            active_time: row.try_get("active_time")?,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
            ip: row.try_get("ip")?,
            model: row.try_get("model")?,
            time_zone: row.try_get("time_zone")?,
        }))
    }

    async fn list_recent(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StatusRecord>, StorageError> {
        ensure_device_id(device_id)?;
        let limit = limit.max(0);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "select device_id, \"timestamp\", switch_state from device_status \
             where device_id = $1 order by \"timestamp\" desc, id desc limit $2",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(status_from_row).collect()
    }

    async fn list_between(
        &self,
        device_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StatusRecord>, StorageError> {
        ensure_device_id(device_id)?;
        if from > to {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "select device_id, \"timestamp\", switch_state from device_status \
             where device_id = $1 and \"timestamp\" between $2 and $3 \
             order by \"timestamp\" asc, id asc",
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(status_from_row).collect()
    }
}
