use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One entry of a process listing.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Executable file name, e.g. `game.exe`.
    pub name: String,
    /// Full image path. Empty when the path could not be read (access denied, kernel threads).
    pub image_path: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum OsErrorKind {
    PermissionDenied,
    NotFound,
    Other,
}

/// Error reported by a native call, with the raw OS error code when there is one.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct OsError {
    pub code: Option<i32>,
    pub kind: OsErrorKind,
    pub message: String,
}

impl OsError {
    pub fn new(kind: OsErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: None,
            kind,
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == OsErrorKind::PermissionDenied
    }
}

impl From<std::io::Error> for OsError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::PermissionDenied => OsErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => OsErrorKind::NotFound,
            _ => OsErrorKind::Other,
        };
        Self {
            code: e.raw_os_error(),
            kind,
            message: e.to_string(),
        }
    }
}
