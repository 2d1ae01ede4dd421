//! Notify-based repository watcher.
//!
//! Watches every configured repository root recursively, debounces
//! modification bursts, and forwards events to the router. Inter-event
//! ordering is preserved per path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

use crate::config::RepositoryConfig;

use super::debouncer::Debouncer;
use super::router::{FileEvent, FileEventKind, FileEventRouter};

pub struct FileWatcher {
    repo_configs: Vec<RepositoryConfig>,
    debounce_ms: u64,
    shutdown: Arc<AtomicBool>,
}

impl FileWatcher {
    pub fn new(repo_configs: Vec<RepositoryConfig>, debounce_ms: u64) -> Self {
        Self {
            repo_configs,
            debounce_ms,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Watch all repository roots and route events until stopped.
    pub async fn watch(&self, router: Arc<FileEventRouter>) -> notify::Result<()> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(256);

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.blocking_send(res);
        })?;

        // Longest root first so nested repositories resolve to the deeper one
        let mut roots: Vec<(PathBuf, String)> = Vec::new();
        for repo in &self.repo_configs {
            match watcher.watch(&repo.path, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::info!(repo = %repo.name, path = %repo.path.display(), "watching");
                    roots.push((repo.path.clone(), repo.name.clone()));
                }
                Err(e) => {
                    tracing::warn!(repo = %repo.name, "failed to watch: {e}");
                }
            }
        }
        roots.sort_by_key(|(path, _)| std::cmp::Reverse(path.as_os_str().len()));

        let mut debouncer = Debouncer::new(self.debounce_ms);
        // Deletions bypass the debouncer so the existence probe runs promptly
        let mut pending_kinds: HashMap<PathBuf, FileEventKind> = HashMap::new();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let tick = sleep(Duration::from_millis(100));
            tokio::pin!(tick);

            tokio::select! {
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    match event {
                        Ok(event) => {
                            self.record_event(&event, &roots, &mut debouncer, &mut pending_kinds, &router).await;
                        }
                        Err(e) => tracing::error!("watch error: {e}"),
                    }
                }
                _ = &mut tick => {
                    for path in debouncer.take_ready() {
                        let Some(kind) = pending_kinds.remove(&path) else { continue };
                        let Some(repo) = Self::repo_for(&roots, &path) else { continue };
                        let routed = FileEvent { kind, path, repository: repo };
                        if let Err(e) = router.handle(routed).await {
                            tracing::warn!("event routing failed: {e}");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn record_event(
        &self,
        event: &Event,
        roots: &[(PathBuf, String)],
        debouncer: &mut Debouncer,
        pending_kinds: &mut HashMap<PathBuf, FileEventKind>,
        router: &Arc<FileEventRouter>,
    ) {
        let kind = match event.kind {
            EventKind::Create(_) => FileEventKind::Created,
            EventKind::Modify(_) => FileEventKind::Modified,
            EventKind::Remove(_) => FileEventKind::Deleted,
            _ => return,
        };

        for path in &event.paths {
            if kind == FileEventKind::Deleted {
                // Route immediately: the atomic-save probe checks the disk
                let Some(repo) = Self::repo_for(roots, path) else {
                    continue;
                };
                let routed = FileEvent {
                    kind,
                    path: path.clone(),
                    repository: repo,
                };
                if let Err(e) = router.handle(routed).await {
                    tracing::warn!("event routing failed: {e}");
                }
            } else {
                pending_kinds.insert(path.clone(), kind);
                debouncer.record(path.clone());
            }
        }
    }

    fn repo_for(roots: &[(PathBuf, String)], path: &Path) -> Option<String> {
        roots
            .iter()
            .find(|(root, _)| path.starts_with(root))
            .map(|(_, name)| name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_for_prefers_deepest_root() {
        let mut roots = vec![
            (PathBuf::from("/repos/sdk"), "sdk".to_string()),
            (PathBuf::from("/repos/sdk/vendor/lib"), "lib".to_string()),
        ];
        roots.sort_by_key(|(path, _)| std::cmp::Reverse(path.as_os_str().len()));

        assert_eq!(
            FileWatcher::repo_for(&roots, Path::new("/repos/sdk/vendor/lib/a.py")),
            Some("lib".to_string())
        );
        assert_eq!(
            FileWatcher::repo_for(&roots, Path::new("/repos/sdk/src/a.py")),
            Some("sdk".to_string())
        );
        assert_eq!(
            FileWatcher::repo_for(&roots, Path::new("/elsewhere/a.py")),
            None
        );
    }
}
