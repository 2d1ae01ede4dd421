//! Event debouncing for file modifications.
//!
//! Editors often emit bursts of events for one save. The debouncer holds
//! each path until no further event arrives for the configured window.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: Duration::from_millis(window_ms),
            pending: HashMap::new(),
        }
    }

    /// Record an event for a path, restarting its quiet window.
    pub fn record(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    /// Drain paths whose quiet window has elapsed.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, recorded)| now.duration_since(**recorded) >= self.window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
