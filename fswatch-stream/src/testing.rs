use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{EventSink, WatchBackend, WatchError, WatchOptions, WatchSource};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Backend whose events are pushed by hand through [`MockBackend::sink`].
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    sink: Arc<Mutex<Option<EventSink>>>,
    path: Arc<Mutex<Option<PathBuf>>>,
}

impl MockBackend {
    pub fn sink(&self) -> EventSink {
        self.sink
            .lock()
            .clone()
            .expect("mock backend was never opened")
    }

    pub fn opened_path(&self) -> Option<PathBuf> {
        self.path.lock().clone()
    }
}

pub(crate) struct MockSource {
    closes: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl WatchSource for MockSource {
    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl WatchBackend for MockBackend {
    type Source = MockSource;

    fn open(
        &self,
        path: &Path,
        _options: &WatchOptions,
        sink: EventSink,
    ) -> Result<MockSource, WatchError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = Some(sink);
        *self.path.lock() = Some(path.to_path_buf());
        Ok(MockSource {
            closes: self.closes.clone(),
            releases: self.releases.clone(),
        })
    }
}
