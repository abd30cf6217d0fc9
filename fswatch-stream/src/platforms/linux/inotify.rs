use std::{
    collections::{HashMap, HashSet, VecDeque},
    ffi::OsString,
    fs,
    ops::ControlFlow,
    os::{fd::AsFd, unix::fs::MetadataExt},
    path::{self, Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};

use nix::errno::Errno;
use nix::sys::{
    epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags},
    eventfd::{EfdFlags, EventFd},
    inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{ChangeKind, EventSink, WatchBackend, WatchError, WatchOptions, WatchSource};

// Close wakes the reader through the eventfd; this only bounds how long a
// detached reader outlives a dropped sink.
const POLL_INTERVAL_MS: u16 = 1000;

const INOTIFY_TOKEN: u64 = 0;
const WAKE_TOKEN: u64 = 1;

/// Linux watch engine built directly on inotify.
#[derive(Clone, Copy, Debug, Default)]
pub struct InotifyBackend;

pub struct InotifySource {
    cancellation_token: CancellationToken,
    wake: Arc<EventFd>,
    reader: Option<JoinHandle<()>>,
    persistent: bool,
}

impl InotifySource {
    fn stop(&mut self) {
        self.cancellation_token.cancel();

        if let Some(reader) = self.reader.take() {
            if let Err(e) = self.wake.write(1) {
                warn!("unable to wake inotify reader: {e}");
            }

            if self.persistent && reader.thread().id() != thread::current().id() {
                if reader.join().is_err() {
                    warn!("inotify reader thread panicked");
                }
            }
        }
    }
}

impl WatchSource for InotifySource {
    fn close(&mut self) {
        debug!("closing inotify watch");
        self.stop();
    }
}

impl Drop for InotifySource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WatchBackend for InotifyBackend {
    type Source = InotifySource;

    fn open(
        &self,
        path: &Path,
        options: &WatchOptions,
        sink: EventSink,
    ) -> Result<InotifySource, WatchError> {
        let root = path::absolute(path)?;
        let metadata = fs::metadata(&root)?;

        let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)?;

        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        epoll.add(
            inotify.as_fd(),
            EpollEvent::new(EpollFlags::EPOLLIN, INOTIFY_TOKEN),
        )?;

        let wake = Arc::new(EventFd::from_flags(
            EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK,
        )?);
        epoll.add(wake.as_fd(), EpollEvent::new(EpollFlags::EPOLLIN, WAKE_TOKEN))?;

        let mut watches = WatchTable::new(&root, metadata.is_dir());
        watches.root_wd = Some(watches.mark(&inotify, &root, PathBuf::new())?);

        let recursive = options.recursive && metadata.is_dir();
        if recursive {
            watches.mark_subtree(&inotify, &root, &PathBuf::new());
        }

        let cancellation_token = CancellationToken::new();
        let reader = Reader {
            inotify,
            epoll,
            watches,
            sink,
            recursive,
            cancellation_token: cancellation_token.clone(),
            _wake: wake.clone(),
        };

        let handle = thread::Builder::new()
            .name("fswatch-inotify".to_owned())
            .spawn(move || reader.run())?;

        debug!(path = %root.display(), recursive, "inotify watch started");

        Ok(InotifySource {
            cancellation_token,
            wake,
            reader: Some(handle),
            persistent: options.persistent,
        })
    }
}

/// Maps watch descriptors back to directories relative to the watched root.
struct WatchTable {
    root: PathBuf,
    root_wd: Option<WatchDescriptor>,
    root_is_dir: bool,
    root_name: Option<OsString>,
    dirs: HashMap<WatchDescriptor, PathBuf>,
}

impl WatchTable {
    fn new(root: &Path, root_is_dir: bool) -> Self {
        WatchTable {
            root: root.to_path_buf(),
            root_wd: None,
            root_is_dir,
            root_name: root.file_name().map(|name| name.to_os_string()),
            dirs: HashMap::new(),
        }
    }

    fn mark(
        &mut self,
        inotify: &Inotify,
        path: &Path,
        relative: PathBuf,
    ) -> Result<WatchDescriptor, WatchError> {
        let mask = AddWatchFlags::IN_CREATE
            | AddWatchFlags::IN_MODIFY
            | AddWatchFlags::IN_ATTRIB
            | AddWatchFlags::IN_MOVE
            | AddWatchFlags::IN_DELETE
            | AddWatchFlags::IN_DELETE_SELF
            | AddWatchFlags::IN_MOVE_SELF;

        let wd = inotify.add_watch(path, mask)?;
        trace!(path = %path.display(), "marked");
        self.dirs.insert(wd, relative);
        Ok(wd)
    }

    /// Marks every directory below `dir`, breadth first. Symlinks are not
    /// followed and each inode is visited once.
    fn mark_subtree(&mut self, inotify: &Inotify, dir: &Path, relative: &Path) {
        let mut traversal_queue = VecDeque::from([(dir.to_path_buf(), relative.to_path_buf())]);
        let mut visited = HashSet::<u64>::new();

        while let Some((next_dir, next_relative)) = traversal_queue.pop_front() {
            let dir_items = match fs::read_dir(&next_dir) {
                Ok(items) => items,
                Err(e) => {
                    warn!(path = %next_dir.display(), "unable to read directory: {e}");
                    continue;
                }
            };

            for dir_item in dir_items.flatten() {
                let Ok(metadata) = dir_item.metadata() else {
                    continue;
                };

                if metadata.is_symlink() || !metadata.is_dir() || !visited.insert(metadata.ino()) {
                    continue;
                }

                let child = dir_item.path();
                let child_relative = next_relative.join(dir_item.file_name());
                match self.mark(inotify, &child, child_relative.clone()) {
                    Ok(_) => traversal_queue.push_back((child, child_relative)),
                    Err(e) => warn!(path = %child.display(), "unable to watch directory: {e}"),
                }
            }
        }
    }

    /// Drops every watch at or below `relative`.
    fn unmark_subtree(&mut self, inotify: &Inotify, relative: &Path) {
        self.dirs.retain(|wd, dir| {
            if dir.starts_with(relative) {
                let _ = inotify.rm_watch(*wd);
                false
            } else {
                true
            }
        });
    }

    fn is_root(&self, wd: WatchDescriptor) -> bool {
        self.root_wd == Some(wd)
    }

    fn root_name(&self) -> Option<PathBuf> {
        self.root_name.as_ref().map(PathBuf::from)
    }
}

struct Reader {
    inotify: Inotify,
    epoll: Epoll,
    watches: WatchTable,
    sink: EventSink,
    recursive: bool,
    cancellation_token: CancellationToken,
    // Keeps the eventfd registered with `epoll` open for as long as the reader runs.
    _wake: Arc<EventFd>,
}

impl Reader {
    fn run(mut self) {
        let mut events = [EpollEvent::empty(); 2];

        while !self.cancellation_token.is_cancelled() && !self.sink.is_closed() {
            events.fill(EpollEvent::empty());

            match self.epoll.wait(&mut events, POLL_INTERVAL_MS) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(ready) => {
                    if !events[..ready].iter().any(|e| e.data() == INOTIFY_TOKEN) {
                        // Only the wake eventfd fired; the loop condition sees the close.
                        continue;
                    }
                }
                Err(e) => {
                    warn!("epoll failed: {e}");
                    self.sink.error(e);
                    return;
                }
            }

            let records = match self.inotify.read_events() {
                Ok(records) => records,
                Err(Errno::EAGAIN) => continue,
                Err(e) => {
                    warn!("reading inotify events failed: {e}");
                    self.sink.error(e);
                    return;
                }
            };

            for record in records {
                if self.cancellation_token.is_cancelled() {
                    break;
                }
                if self.dispatch(record).is_break() {
                    trace!("inotify watch ended by source");
                    return;
                }
            }
        }

        trace!("inotify reader stopped");
    }

    fn dispatch(&mut self, record: InotifyEvent) -> ControlFlow<()> {
        let mask = record.mask;

        if mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
            self.sink.error(WatchError::FileSystemError(
                "inotify event queue overflowed".to_owned(),
            ));
            return ControlFlow::Break(());
        }

        if mask.contains(AddWatchFlags::IN_IGNORED) {
            self.watches.dirs.remove(&record.wd);
            if self.watches.is_root(record.wd) {
                // The kernel dropped the root watch, e.g. its filesystem was unmounted.
                self.sink.close();
                return ControlFlow::Break(());
            }
            return ControlFlow::Continue(());
        }

        let is_root = self.watches.is_root(record.wd);
        let self_event =
            mask.intersects(AddWatchFlags::IN_DELETE_SELF | AddWatchFlags::IN_MOVE_SELF);

        if self_event && !is_root {
            // Already reported by the parent directory's watch.
            return ControlFlow::Continue(());
        }

        let Some(dir) = self.watches.dirs.get(&record.wd).cloned() else {
            trace!(wd = ?record.wd, "event for unknown watch descriptor");
            return ControlFlow::Continue(());
        };

        let name = match &record.name {
            Some(name) => Some(dir.join(name)),
            None if is_root && (self_event || !self.watches.root_is_dir) => {
                self.watches.root_name()
            }
            None => None,
        };

        let kind = if mask.intersects(AddWatchFlags::IN_MODIFY | AddWatchFlags::IN_ATTRIB) {
            ChangeKind::Change
        } else if mask.intersects(
            AddWatchFlags::IN_CREATE
                | AddWatchFlags::IN_DELETE
                | AddWatchFlags::IN_MOVE
                | AddWatchFlags::IN_DELETE_SELF
                | AddWatchFlags::IN_MOVE_SELF,
        ) {
            ChangeKind::Rename
        } else {
            trace!(?mask, "unhandled inotify mask");
            return ControlFlow::Continue(());
        };

        if self.recursive && mask.contains(AddWatchFlags::IN_ISDIR) {
            if let Some(relative) = &name {
                self.follow_directory(mask, relative);
            }
        }

        self.sink.change(kind, name.as_deref().map(Path::as_os_str));

        if is_root && self_event {
            self.sink.close();
            return ControlFlow::Break(());
        }

        ControlFlow::Continue(())
    }

    /// Keeps the watch set in step with directories appearing or leaving.
    fn follow_directory(&mut self, mask: AddWatchFlags, relative: &Path) {
        if mask.intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO) {
            let absolute = self.watches.root.join(relative);
            match self
                .watches
                .mark(&self.inotify, &absolute, relative.to_path_buf())
            {
                Ok(_) => self
                    .watches
                    .mark_subtree(&self.inotify, &absolute, relative),
                Err(e) => debug!(path = %absolute.display(), "new directory vanished before it was watched: {e}"),
            }
        } else if mask.intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM) {
            self.watches.unmark_subtree(&self.inotify, relative);
        }
    }
}
