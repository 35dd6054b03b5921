// ── Domain model ──

mod device;
mod event;

pub use device::{Battery, ContactState, Device, DevicePatch, DeviceType};
pub use event::{DeviceEvent, DeviceEventKind};
