use std::fmt;

use crate::WatchError;

/// The two change identifiers a watch source reports.
///
/// Creation, deletion and moves all surface as `Rename`; content and
/// metadata updates surface as `Change`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChangeKind {
    Rename,
    Change,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Rename => f.write_str("rename"),
            ChangeKind::Change => f.write_str("change"),
        }
    }
}

/// A changed entry's name, decoded with the sequence's [`crate::Encoding`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum FileName {
    Text(String),
    Bytes(Vec<u8>),
}

impl FileName {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FileName::Text(text) => Some(text),
            FileName::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileName::Text(text) => text.as_bytes(),
            FileName::Bytes(bytes) => bytes,
        }
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileName::Text(text) => f.write_str(text),
            FileName::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

impl From<&str> for FileName {
    fn from(value: &str) -> Self {
        FileName::Text(value.to_owned())
    }
}

/// One item yielded by a [`crate::WatchSequence`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub name: Option<FileName>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, name: Option<FileName>) -> Self {
        ChangeEvent { kind, name }
    }
}

/// What the producer side hands to the queue. `Close` and `Error` are
/// terminal: nothing queued behind them is ever delivered.
#[derive(Clone, Debug)]
pub(crate) enum Event {
    Change(ChangeEvent),
    Close,
    Error(WatchError),
}

impl Event {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, Event::Change(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_kinds_display_as_source_identifiers() {
        assert_eq!(ChangeKind::Rename.to_string(), "rename");
        assert_eq!(ChangeKind::Change.to_string(), "change");
    }

    #[test]
    fn only_sentinels_are_terminal() {
        let change = Event::Change(ChangeEvent::new(ChangeKind::Change, None));
        assert!(!change.is_terminal());
        assert!(Event::Close.is_terminal());
        assert!(Event::Error(WatchError::FileSystemError("boom".into())).is_terminal());
    }

    #[test]
    fn byte_names_render_lossily() {
        let name = FileName::Bytes(vec![b'a', 0xff, b'b']);
        assert_eq!(name.as_str(), None);
        assert_eq!(name.as_bytes(), &[b'a', 0xff, b'b']);
        assert_eq!(name.to_string(), "a\u{fffd}b");
    }
}
