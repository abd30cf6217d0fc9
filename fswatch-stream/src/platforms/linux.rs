mod inotify;

pub use inotify::{InotifyBackend, InotifySource};
