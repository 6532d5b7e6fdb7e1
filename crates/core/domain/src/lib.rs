pub mod data;

pub use data::{DeviceSnapshot, SwitchState};
