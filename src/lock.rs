//! File-based single-writer instance lock.
//!
//! A `mrcis.lock` file in the data directory holds the holder PID on the
//! first line and an ISO timestamp on the second. Acquisition succeeds when
//! the file is absent, malformed, owned by a dead PID, or older than the
//! staleness window. This is a cooperative PID-liveness + freshness check,
//! not an OS advisory lock; freshness is always evaluated against the local
//! clock, which tolerates clock skew between writers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

use crate::error::LockError;

pub const LOCK_FILE_NAME: &str = "mrcis.lock";
const DEFAULT_STALE_SECONDS: i64 = 90;

pub struct InstanceLock {
    lock_path: PathBuf,
    stale_seconds: i64,
    held: bool,
}

impl InstanceLock {
    pub fn new(data_directory: &Path) -> Self {
        Self::with_stale_seconds(data_directory, DEFAULT_STALE_SECONDS)
    }

    pub fn with_stale_seconds(data_directory: &Path, stale_seconds: i64) -> Self {
        Self {
            lock_path: data_directory.join(LOCK_FILE_NAME),
            stale_seconds,
            held: false,
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Heartbeat cadence for holders, a third of the staleness window.
    pub fn heartbeat_seconds(&self) -> u64 {
        (self.stale_seconds / 3).max(1) as u64
    }

    /// Try to take the writer lock. Idempotent when already held.
    pub fn try_acquire(&mut self) -> bool {
        if self.held {
            return true;
        }
        if let Some((pid, timestamp)) = Self::read_lock(&self.lock_path) {
            let holder_alive = Self::is_process_alive(pid);
            let fresh = Utc::now().signed_duration_since(timestamp).num_seconds()
                < self.stale_seconds;
            if holder_alive && fresh {
                return false;
            }
            tracing::info!(
                pid,
                alive = holder_alive,
                fresh,
                "taking over stale writer lock"
            );
        }

        match self.write_lock() {
            Ok(()) => {
                self.held = true;
                true
            }
            Err(e) => {
                tracing::warn!("failed to write lock file: {e}");
                false
            }
        }
    }

    /// Refresh the timestamp while holding the lock. No-op otherwise.
    pub fn heartbeat(&self) {
        if !self.held {
            return;
        }
        if let Err(e) = self.write_lock() {
            tracing::warn!("lock heartbeat failed: {e}");
        }
    }

    /// Delete the lock file if this process holds it.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.lock_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("failed to remove lock file: {e}");
        }
        self.held = false;
    }

    /// Attempt acquisition when not currently held. Returns whether this
    /// call promoted the instance to writer.
    pub fn check_and_promote(&mut self) -> bool {
        if self.held {
            return false;
        }
        self.try_acquire()
    }

    fn write_lock(&self) -> Result<(), LockError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Write {
                path: self.lock_path.clone(),
                source: e,
            })?;
        }
        let content = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
        std::fs::write(&self.lock_path, content).map_err(|e| LockError::Write {
            path: self.lock_path.clone(),
            source: e,
        })
    }

    /// Parse `pid\ntimestamp` from a lock file; `None` when missing or
    /// malformed. Naive timestamps are treated as UTC.
    fn read_lock(path: &Path) -> Option<(u32, DateTime<Utc>)> {
        let content = std::fs::read_to_string(path).ok()?;
        let mut lines = content.lines();
        let pid: u32 = lines.next()?.trim().parse().ok()?;
        let raw = lines.next()?.trim();
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|n| n.and_utc())
            })
            .ok()?;
        Some((pid, timestamp))
    }

    fn is_process_alive(pid: u32) -> bool {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        system.process(Pid::from_u32(pid)).is_some()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    const DEAD_PID: u32 = 4_000_000_000;

    fn write_lock_file(dir: &Path, pid: u32, timestamp: DateTime<Utc>) {
        std::fs::write(
            dir.join(LOCK_FILE_NAME),
            format!("{pid}\n{}\n", timestamp.to_rfc3339()),
        )
        .unwrap();
    }

    #[test]
    fn test_acquire_when_no_lock_exists() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        assert!(lock.try_acquire());
        assert!(lock.is_held());
        assert!(lock.lock_path().exists());
    }

    #[test]
    fn test_acquire_writes_pid_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        lock.try_acquire();

        let content = std::fs::read_to_string(lock.lock_path()).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].parse::<u32>().unwrap(), std::process::id());
        DateTime::parse_from_rfc3339(lines[1]).unwrap();
    }

    #[test]
    fn test_acquire_fails_when_held_by_live_process() {
        let dir = TempDir::new().unwrap();
        // Current PID is definitely alive
        write_lock_file(dir.path(), std::process::id(), Utc::now());

        let mut lock = InstanceLock::new(dir.path());
        assert!(!lock.try_acquire());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_acquire_succeeds_when_holder_is_dead() {
        let dir = TempDir::new().unwrap();
        write_lock_file(dir.path(), DEAD_PID, Utc::now());

        let mut lock = InstanceLock::new(dir.path());
        assert!(lock.try_acquire());

        let content = std::fs::read_to_string(lock.lock_path()).unwrap();
        let first_line = content.lines().next().unwrap();
        assert_eq!(first_line.parse::<u32>().unwrap(), std::process::id());
    }

    #[test]
    fn test_acquire_succeeds_when_timestamp_expired() {
        let dir = TempDir::new().unwrap();
        // Live PID but expired timestamp
        write_lock_file(
            dir.path(),
            std::process::id(),
            Utc::now() - Duration::seconds(200),
        );

        let mut lock = InstanceLock::with_stale_seconds(dir.path(), 90);
        assert!(lock.try_acquire());
        assert!(lock.is_held());
    }

    #[test]
    fn test_acquire_succeeds_when_lock_file_malformed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "garbage content\n").unwrap();

        let mut lock = InstanceLock::new(dir.path());
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_acquire_idempotent_when_already_held() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        assert!(lock.try_acquire());
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_release_deletes_lock_file() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        lock.try_acquire();
        lock.release();
        assert!(!lock.lock_path().exists());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_release_noop_when_not_held() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_release_handles_already_deleted_file() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        lock.try_acquire();
        std::fs::remove_file(lock.lock_path()).unwrap();
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_heartbeat_updates_timestamp_keeps_pid() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        lock.try_acquire();

        let before = std::fs::read_to_string(lock.lock_path()).unwrap();
        lock.heartbeat();
        let after = std::fs::read_to_string(lock.lock_path()).unwrap();

        assert_eq!(
            before.lines().next().unwrap(),
            after.lines().next().unwrap()
        );
        DateTime::parse_from_rfc3339(after.lines().nth(1).unwrap()).unwrap();
    }

    #[test]
    fn test_heartbeat_noop_when_not_held() {
        let dir = TempDir::new().unwrap();
        let lock = InstanceLock::new(dir.path());
        lock.heartbeat();
        assert!(!lock.lock_path().exists());
    }

    #[test]
    fn test_promote_returns_false_when_lock_is_fresh() {
        let dir = TempDir::new().unwrap();
        write_lock_file(dir.path(), std::process::id(), Utc::now());

        let mut lock = InstanceLock::new(dir.path());
        assert!(!lock.check_and_promote());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_promote_succeeds_when_holder_dead() {
        let dir = TempDir::new().unwrap();
        write_lock_file(dir.path(), DEAD_PID, Utc::now());

        let mut lock = InstanceLock::new(dir.path());
        assert!(lock.check_and_promote());
        assert!(lock.is_held());
    }

    #[test]
    fn test_promote_when_lock_file_missing() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        assert!(lock.check_and_promote());
        assert!(lock.is_held());
    }

    #[test]
    fn test_promote_noop_when_already_held() {
        let dir = TempDir::new().unwrap();
        let mut lock = InstanceLock::new(dir.path());
        lock.try_acquire();
        assert!(!lock.check_and_promote());
    }

    #[test]
    fn test_second_lock_instance_cannot_acquire() {
        let dir = TempDir::new().unwrap();
        let mut lock1 = InstanceLock::new(dir.path());
        let mut lock2 = InstanceLock::new(dir.path());

        assert!(lock1.try_acquire());
        assert!(!lock2.try_acquire());
    }

    #[test]
    fn test_second_instance_acquires_after_release() {
        let dir = TempDir::new().unwrap();
        let mut lock1 = InstanceLock::new(dir.path());
        let mut lock2 = InstanceLock::new(dir.path());

        lock1.try_acquire();
        lock1.release();
        assert!(lock2.try_acquire());
    }

    #[test]
    fn test_read_lock_rejects_malformed_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.lock");

        std::fs::write(&path, "").unwrap();
        assert!(InstanceLock::read_lock(&path).is_none());

        std::fs::write(&path, "12345\n").unwrap();
        assert!(InstanceLock::read_lock(&path).is_none());

        std::fs::write(&path, "not_a_pid\n2024-01-01T00:00:00Z\n").unwrap();
        assert!(InstanceLock::read_lock(&path).is_none());

        std::fs::write(&path, "12345\nnot_a_timestamp\n").unwrap();
        assert!(InstanceLock::read_lock(&path).is_none());
    }

    #[test]
    fn test_read_lock_accepts_naive_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("naive.lock");
        std::fs::write(&path, "12345\n2024-06-01T10:00:00\n").unwrap();

        let (pid, _timestamp) = InstanceLock::read_lock(&path).unwrap();
        assert_eq!(pid, 12345);
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(InstanceLock::is_process_alive(std::process::id()));
        assert!(!InstanceLock::is_process_alive(DEAD_PID));
    }
}
