// ── Reactive device store ──

mod collection;
mod device_store;

pub use device_store::{Applied, DeviceStore};
