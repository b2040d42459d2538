//! Camera capture, frame throttling, and JPEG snapshots.

pub mod camera;
pub mod jpeg;
#[cfg(feature = "camera")]
pub mod native;
pub mod throttle;
