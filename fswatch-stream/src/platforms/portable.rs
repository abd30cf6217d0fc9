use std::{
    fs,
    path::{self, Path, PathBuf},
};

use notify::{
    event::ModifyKind, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::{debug, trace, warn};

use crate::{ChangeKind, EventSink, WatchBackend, WatchError, WatchOptions, WatchSource};

/// Cross-platform watch engine backed by the `notify` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotifyBackend;

pub struct NotifySource {
    watcher: Option<RecommendedWatcher>,
    root: PathBuf,
}

impl WatchSource for NotifySource {
    fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            debug!(path = %self.root.display(), "closing notify watch");
            if let Err(e) = watcher.unwatch(&self.root) {
                trace!("unwatch failed: {e}");
            }
        }
    }
}

impl WatchBackend for NotifyBackend {
    type Source = NotifySource;

    fn open(
        &self,
        path: &Path,
        options: &WatchOptions,
        sink: EventSink,
    ) -> Result<NotifySource, WatchError> {
        // Some platforms report canonical paths, so names are taken relative to that.
        let root = path::absolute(path)?.canonicalize()?;
        let metadata = fs::metadata(&root)?;

        let base = if metadata.is_dir() {
            root.clone()
        } else {
            root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone())
        };
        let mode = if options.recursive && metadata.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let forward_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward(&sink, &forward_root, &base, res)
        })?;
        watcher.watch(&root, mode)?;

        debug!(path = %root.display(), ?mode, "notify watch started");

        Ok(NotifySource {
            watcher: Some(watcher),
            root,
        })
    }
}

fn forward(sink: &EventSink, root: &Path, base: &Path, res: notify::Result<Event>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            warn!("notify watcher failed: {e}");
            sink.error(e);
            return;
        }
    };

    let kind = match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            ChangeKind::Rename
        }
        EventKind::Modify(_) => ChangeKind::Change,
        _ => {
            trace!(?event, "ignoring notify event");
            return;
        }
    };

    for path in &event.paths {
        let relative = match path.strip_prefix(base) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => path.file_name().map(Path::new).unwrap_or(path.as_path()),
        };
        sink.change(kind, Some(relative.as_os_str()));

        if matches!(event.kind, EventKind::Remove(_)) && path == root {
            sink.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{watch, ChangeEvent, FileName, WatchEngine};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reports_a_created_file_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = watch(
            dir.path(),
            WatchOptions::default().with_engine(WatchEngine::Notify),
        )
        .unwrap();

        fs::File::create(dir.path().join("a.txt")).unwrap();

        let event = timeout(Duration::from_secs(5), sequence.next())
            .await
            .expect("no notify event")
            .unwrap();
        assert_eq!(
            event,
            Some(ChangeEvent::new(
                ChangeKind::Rename,
                Some(FileName::from("a.txt"))
            ))
        );

        sequence.cancel();
        assert_eq!(sequence.next().await, Ok(None));
    }

    #[test]
    fn missing_path_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let result = watch(
            dir.path().join("missing"),
            WatchOptions::default().with_engine(WatchEngine::Notify),
        );
        assert!(matches!(result, Err(WatchError::FileSystemError(_))));
    }
}
