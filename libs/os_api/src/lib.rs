mod process;
mod topology;
pub use process::{OsError, OsErrorKind, ProcessEntry};
pub use topology::{RawCache, RawProcessor, RawTopology};

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "linux")]
mod linux;

// Platform implementation exported under one name
#[cfg(target_os = "windows")]
pub use windows::{OS, ProcessAffinityHandle};
#[cfg(target_os = "linux")]
pub use linux::{OS, ProcessAffinityHandle};
