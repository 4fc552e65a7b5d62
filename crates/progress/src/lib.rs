//! Progress registry (spec.md §4.8, C8): tracks download, export, and peer
//! transfer progress by operation id so control endpoints can poll without
//! the caller having to hold a connection open for the whole transfer.
//!
//! Grounded on the teacher's `SessionManager`: a `parking_lot::RwLock`-guarded
//! map plus a `tokio::select!` background sweep that a `watch::channel` can
//! shut down cleanly, except here entries are swept by "terminal for longer
//! than the grace period" rather than "expired by idle timeout".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gateway_core::progress::{TransferProgress, TransferStatus};
use parking_lot::RwLock;
use tokio::sync::watch;

struct Entry {
    progress: TransferProgress,
    /// Set the moment the entry first becomes terminal; the GC sweep reaps
    /// it once this is older than the configured grace period.
    terminal_since: Option<DateTime<Utc>>,
}

pub struct ProgressRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    grace: Duration,
}

impl ProgressRegistry {
    pub fn new(grace: Duration) -> Self {
        ProgressRegistry { entries: RwLock::new(HashMap::new()), grace }
    }

    /// Registers a new pending transfer, overwriting any prior entry for
    /// the same id (a caller starting the same operation id twice means the
    /// previous attempt is being superseded).
    pub fn register(&self, id: impl Into<String>, total_bytes: u64) {
        let mut entries = self.entries.write();
        entries.insert(id.into(), Entry { progress: TransferProgress::pending(total_bytes), terminal_since: None });
    }

    pub fn advance(&self, id: &str, bytes_transferred: u64) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(id) {
            entry.progress.advance(bytes_transferred);
        }
    }

    pub fn complete(&self, id: &str) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(id) {
            entry.progress.complete();
            entry.terminal_since = Some(Utc::now());
        }
    }

    pub fn fail(&self, id: &str, error: impl Into<String>) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(id) {
            entry.progress.fail(error);
            entry.terminal_since = Some(Utc::now());
        }
    }

    pub fn get(&self, id: &str) -> Option<TransferProgress> {
        self.entries.read().get(id).map(|e| e.progress.clone())
    }

    pub fn list(&self) -> Vec<(String, TransferProgress)> {
        self.entries.read().iter().map(|(id, e)| (id.clone(), e.progress.clone())).collect()
    }

    pub fn remove(&self, id: &str) {
        self.entries.write().remove(id);
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Reaps entries that have been terminal for longer than the grace
    /// period. Entries still `Pending`/`Transferring` are never swept here —
    /// only a stuck background task leaks those, and that's a bug to find,
    /// not paper over.
    pub fn sweep(&self) {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::zero());
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.retain(|_, e| match (e.progress.status, e.terminal_since) {
            (TransferStatus::Complete, Some(at)) | (TransferStatus::Failed, Some(at)) => now - at <= grace,
            _ => true,
        });
    }

    /// Spawns the periodic GC sweep. Returns the shutdown handle; dropping
    /// or sending `true` on it stops the task.
    pub fn start_gc_task(self: &Arc<Self>, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = registry.count();
                        registry.sweep();
                        let after = registry.count();
                        if before != after {
                            tracing::debug!(reaped = before - after, remaining = after, "progress registry gc swept terminal entries");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("progress registry gc task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_advance_updates_progress() {
        let registry = ProgressRegistry::new(Duration::from_secs(60));
        registry.register("dl-1", 100);
        registry.advance("dl-1", 40);
        let progress = registry.get("dl-1").unwrap();
        assert_eq!(progress.bytes_transferred, 40);
        assert_eq!(progress.status, TransferStatus::Transferring);
    }

    #[test]
    fn complete_marks_terminal_and_sets_full_bytes() {
        let registry = ProgressRegistry::new(Duration::from_secs(60));
        registry.register("dl-1", 100);
        registry.advance("dl-1", 50);
        registry.complete("dl-1");
        let progress = registry.get("dl-1").unwrap();
        assert!(progress.is_terminal());
        assert_eq!(progress.bytes_transferred, 100);
    }

    #[test]
    fn sweep_leaves_non_terminal_entries_alone() {
        let registry = ProgressRegistry::new(Duration::from_secs(0));
        registry.register("dl-1", 100);
        registry.advance("dl-1", 10);
        registry.sweep();
        assert!(registry.get("dl-1").is_some());
    }

    #[test]
    fn sweep_reaps_terminal_entries_past_grace() {
        let registry = ProgressRegistry::new(Duration::from_secs(0));
        registry.register("dl-1", 100);
        registry.complete("dl-1");
        std::thread::sleep(Duration::from_millis(5));
        registry.sweep();
        assert!(registry.get("dl-1").is_none());
    }

    #[test]
    fn sweep_keeps_terminal_entries_within_grace() {
        let registry = ProgressRegistry::new(Duration::from_secs(300));
        registry.register("dl-1", 100);
        registry.complete("dl-1");
        registry.sweep();
        assert!(registry.get("dl-1").is_some());
    }

    #[test]
    fn missing_operation_id_returns_none() {
        let registry = ProgressRegistry::new(Duration::from_secs(60));
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test]
    async fn gc_task_reaps_on_shutdown_signal_without_panicking() {
        let registry = Arc::new(ProgressRegistry::new(Duration::from_secs(0)));
        registry.register("dl-1", 10);
        registry.complete("dl-1");
        let shutdown = registry.start_gc_task(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = shutdown.send(true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(registry.get("dl-1").is_none());
    }
}
