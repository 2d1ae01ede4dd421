//! File watching: notify-based watcher, debouncing, event routing.

pub mod debouncer;
pub mod router;
pub mod watch;

pub use debouncer::Debouncer;
pub use router::{FileEvent, FileEventKind, FileEventRouter};
pub use watch::FileWatcher;
