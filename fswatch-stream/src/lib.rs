mod errors;
mod event;
mod opts;
mod platforms;
mod queue;
mod sequence;
mod target;

#[cfg(test)]
mod testing;

use std::path::Path;

pub use errors::WatchError;
pub use event::{ChangeEvent, ChangeKind, FileName};
pub use opts::{Encoding, WatchEngine, WatchOptions};
pub use platforms::*;
pub use sequence::{CancelHandle, EventSink, SequenceState, WatchSequence};
pub use target::WatchTarget;

use tracing::debug;

/// A running watch that feeds an [`EventSink`].
pub trait WatchSource: Send + 'static {
    /// Stops producing events.
    /// Only called when the consumer cancels; a source that ended on its own
    /// (by reporting close or error to its sink) is simply dropped.
    fn close(&mut self);
}

/// Something that can start a [`WatchSource`] on a path.
pub trait WatchBackend {
    type Source: WatchSource;

    /// Starts watching `path`, reporting into `sink`.
    /// Failures to set the watch up are returned here rather than through the sink.
    fn open(
        &self,
        path: &Path,
        options: &WatchOptions,
        sink: EventSink,
    ) -> Result<Self::Source, WatchError>;
}

/// Watches `target` with the platform's default engine (or `options.force_engine`).
///
/// The target is validated before anything is opened, so an unsupported
/// representation fails here and never reaches a backend.
pub fn watch(
    target: impl Into<WatchTarget>,
    options: impl Into<WatchOptions>,
) -> Result<WatchSequence, WatchError> {
    let path = target.into().validate()?;
    let options = options.into();

    match options.engine() {
        #[cfg(target_os = "linux")]
        WatchEngine::Inotify => open_with(&InotifyBackend, &path, &options),
        #[cfg(not(target_os = "linux"))]
        WatchEngine::Inotify => Err(WatchError::EngineUnavailable("inotify".to_owned())),
        WatchEngine::Notify => open_with(&NotifyBackend, &path, &options),
    }
}

/// Same as [`watch`], with a caller-supplied backend.
pub fn watch_with<B: WatchBackend>(
    backend: &B,
    target: impl Into<WatchTarget>,
    options: impl Into<WatchOptions>,
) -> Result<WatchSequence, WatchError> {
    let path = target.into().validate()?;
    open_with(backend, &path, &options.into())
}

fn open_with<B: WatchBackend>(
    backend: &B,
    path: &Path,
    options: &WatchOptions,
) -> Result<WatchSequence, WatchError> {
    debug!(path = %path.display(), recursive = options.recursive, "opening watch");
    WatchSequence::open(options, |sink| {
        let source = backend.open(path, options, sink)?;
        Ok(Box::new(source) as Box<dyn WatchSource>)
    })
}
