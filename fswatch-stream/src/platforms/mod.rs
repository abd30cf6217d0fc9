#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::*;

mod portable;

pub use portable::{NotifyBackend, NotifySource};
