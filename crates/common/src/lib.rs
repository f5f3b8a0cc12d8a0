//! Small helpers shared by every switchboard crate: secret serialization and
//! wall-clock timestamps.

pub mod secret;
pub mod time;

pub use time::now_ms;
