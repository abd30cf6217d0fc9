use std::path::{Path, PathBuf};

use crate::WatchError;

/// Anything a caller might hand to [`crate::watch`] as the thing to watch.
///
/// Only filesystem paths and byte strings that decode to one are accepted.
/// Resource locators are representable so they can be rejected up front
/// with a clear error instead of being mistaken for relative paths.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchTarget {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Url(String),
}

impl WatchTarget {
    pub fn url(url: impl Into<String>) -> Self {
        WatchTarget::Url(url.into())
    }

    /// Resolves the target to a path without touching the filesystem.
    pub fn validate(self) -> Result<PathBuf, WatchError> {
        let path = match self {
            WatchTarget::Path(path) => path,
            WatchTarget::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => PathBuf::from(text),
                Err(e) => {
                    return Err(WatchError::InvalidTarget(format!(
                        "path bytes are not valid UTF-8: {e}"
                    )))
                }
            },
            WatchTarget::Url(url) => {
                return Err(WatchError::InvalidTarget(format!(
                    "watch URLs are not supported: {url}"
                )))
            }
        };

        if path.as_os_str().is_empty() {
            return Err(WatchError::InvalidTarget("path is empty".to_owned()));
        }

        Ok(path)
    }
}

impl From<&str> for WatchTarget {
    fn from(value: &str) -> Self {
        WatchTarget::Path(PathBuf::from(value))
    }
}

impl From<String> for WatchTarget {
    fn from(value: String) -> Self {
        WatchTarget::Path(PathBuf::from(value))
    }
}

impl From<&Path> for WatchTarget {
    fn from(value: &Path) -> Self {
        WatchTarget::Path(value.to_path_buf())
    }
}

impl From<PathBuf> for WatchTarget {
    fn from(value: PathBuf) -> Self {
        WatchTarget::Path(value)
    }
}

impl From<&PathBuf> for WatchTarget {
    fn from(value: &PathBuf) -> Self {
        WatchTarget::Path(value.clone())
    }
}

impl From<Vec<u8>> for WatchTarget {
    fn from(value: Vec<u8>) -> Self {
        WatchTarget::Bytes(value)
    }
}

impl From<&[u8]> for WatchTarget {
    fn from(value: &[u8]) -> Self {
        WatchTarget::Bytes(value.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_and_paths_pass_through() {
        assert_eq!(
            WatchTarget::from("some/dir").validate(),
            Ok(PathBuf::from("some/dir"))
        );
        assert_eq!(
            WatchTarget::from(Path::new("/tmp")).validate(),
            Ok(PathBuf::from("/tmp"))
        );
    }

    #[test]
    fn bytes_are_converted_to_a_path() {
        let target = WatchTarget::from(b"some/dir".as_slice());
        assert_eq!(target.validate(), Ok(PathBuf::from("some/dir")));
    }

    #[test]
    fn rejects_non_utf8_bytes() {
        let target = WatchTarget::from(vec![b'a', 0xff]);
        assert!(matches!(
            target.validate(),
            Err(WatchError::InvalidTarget(_))
        ));
    }

    #[test]
    fn rejects_urls() {
        let err = WatchTarget::url("file:///tmp").validate().unwrap_err();
        assert_eq!(
            err,
            WatchError::InvalidTarget("watch URLs are not supported: file:///tmp".into())
        );
    }

    #[test]
    fn rejects_empty_paths() {
        assert!(WatchTarget::from("").validate().is_err());
        assert!(WatchTarget::from(Vec::new()).validate().is_err());
    }
}
