use std::io;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("invalid watch target: {0}")]
    InvalidTarget(String),

    #[error("file system error {0}")]
    FileSystemError(String),

    #[error("next() was called while a previous call is still waiting for an event")]
    PendingNext,

    #[error("unknown watch engine: {0}")]
    UnknownEngine(String),

    #[error("watch engine {0} is not available on this platform")]
    EngineUnavailable(String),

    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
}

impl From<io::Error> for WatchError {
    fn from(value: io::Error) -> Self {
        WatchError::FileSystemError(value.to_string())
    }
}

#[cfg(target_os = "linux")]
impl From<nix::errno::Errno> for WatchError {
    fn from(value: nix::errno::Errno) -> Self {
        WatchError::FileSystemError(value.to_string())
    }
}

impl From<notify::Error> for WatchError {
    fn from(value: notify::Error) -> Self {
        WatchError::FileSystemError(value.to_string())
    }
}
