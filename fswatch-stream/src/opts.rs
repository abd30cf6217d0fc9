use std::ffi::OsStr;
use std::str::FromStr;

use tokio_util::sync::CancellationToken;

use crate::{FileName, WatchError};

/// How changed names are handed to the consumer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Hex,
    Buffer,
}

impl Encoding {
    pub fn decode(&self, raw: &OsStr) -> FileName {
        let bytes = raw_bytes(raw);
        match self {
            Encoding::Utf8 => FileName::Text(String::from_utf8_lossy(&bytes).into_owned()),
            Encoding::Latin1 => FileName::Text(bytes.iter().map(|&b| b as char).collect()),
            Encoding::Hex => FileName::Text(hex::encode(&bytes)),
            Encoding::Buffer => FileName::Bytes(bytes),
        }
    }
}

#[cfg(unix)]
fn raw_bytes(raw: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    raw.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn raw_bytes(raw: &OsStr) -> Vec<u8> {
    raw.to_string_lossy().into_owned().into_bytes()
}

impl FromStr for Encoding {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            "hex" => Ok(Encoding::Hex),
            "buffer" => Ok(Encoding::Buffer),
            _ => Err(WatchError::UnknownEncoding(s.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchEngine {
    /// Linux only.
    Inotify,
    /// Cross-platform, backed by the `notify` crate.
    Notify,
}

impl WatchEngine {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") {
            WatchEngine::Inotify
        } else {
            WatchEngine::Notify
        }
    }
}

impl FromStr for WatchEngine {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inotify" => Ok(WatchEngine::Inotify),
            "notify" => Ok(WatchEngine::Notify),
            _ => Err(WatchError::UnknownEngine(s.to_owned())),
        }
    }
}

/// Options accepted when opening a watch.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    pub encoding: Encoding,
    /// When set, closing the source waits for its reader thread to exit.
    /// Otherwise the thread is left to wind down on its own.
    pub persistent: bool,
    pub recursive: bool,
    /// Cancelling this token is the same as calling
    /// [`crate::WatchSequence::cancel`].
    pub signal: Option<CancellationToken>,
    pub force_engine: Option<WatchEngine>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            encoding: Encoding::Utf8,
            persistent: true,
            recursive: false,
            signal: None,
            force_engine: None,
        }
    }
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_engine(mut self, engine: WatchEngine) -> Self {
        self.force_engine = Some(engine);
        self
    }

    pub fn engine(&self) -> WatchEngine {
        self.force_engine.unwrap_or_else(WatchEngine::platform_default)
    }
}

impl From<Encoding> for WatchOptions {
    fn from(encoding: Encoding) -> Self {
        WatchOptions::default().with_encoding(encoding)
    }
}
