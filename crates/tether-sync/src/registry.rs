//! # Sync Registry
//!
//! Process-wide record of which owners have a sync running, with a
//! cooperative stop flag per run.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  register_sync(owner) ──► SyncHandle ─────────────────┐                │
//! │        │                     │                         │                │
//! │        │ (second call for    │ record_page()           │ drop           │
//! │        │  same owner)        │ record_counts()         ▼                │
//! │        ▼                     │                  entry removed           │
//! │  Err(SyncAlreadyActive)      │                  (only if run_id still   │
//! │                              ▼                   matches)               │
//! │  request_stop(owner) ──► stop flag ──► should_stop(&handle)            │
//! │                                        polled at page boundaries        │
//! │                                                                         │
//! │  get_sync_status(owner) ──► SyncRunSnapshot (read-only copy)           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The map lock is only held for insert, remove and snapshot; progress
//! updates go through atomics on the entry.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use tether_core::{SyncCounts, SyncRunSnapshot};

// =============================================================================
// Run State
// =============================================================================

#[derive(Debug, Default)]
struct RunProgress {
    table: OnceLock<String>,
    current_page: AtomicU32,
    seen: AtomicU64,
    transformed: AtomicU64,
    upserted: AtomicU64,
    errors: AtomicU64,
}

impl RunProgress {
    fn counts(&self) -> SyncCounts {
        SyncCounts {
            seen: self.seen.load(Ordering::Relaxed),
            transformed: self.transformed.load(Ordering::Relaxed),
            upserted: self.upserted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
struct RunEntry {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    stop: Arc<AtomicBool>,
    progress: Arc<RunProgress>,
}

type RunMap = Arc<RwLock<HashMap<String, RunEntry>>>;

// =============================================================================
// Sync Handle
// =============================================================================

/// Proof of registration for one run.
///
/// Dropping the handle unregisters the run, so every exit path of a sync
/// (including panics and early returns) releases the owner.
#[derive(Debug)]
pub struct SyncHandle {
    owner_id: String,
    run_id: Uuid,
    stop: Arc<AtomicBool>,
    progress: Arc<RunProgress>,
    runs: RunMap,
}

impl SyncHandle {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Attaches the table being synced. First call wins.
    pub fn set_table(&self, table: &str) {
        let _ = self.progress.table.set(table.to_string());
    }

    pub fn record_page(&self, page: u32) {
        self.progress.current_page.store(page, Ordering::Relaxed);
    }

    pub fn record_counts(&self, counts: &SyncCounts) {
        let p = &self.progress;
        p.seen.store(counts.seen, Ordering::Relaxed);
        p.transformed.store(counts.transformed, Ordering::Relaxed);
        p.upserted.store(counts.upserted, Ordering::Relaxed);
        p.errors.store(counts.errors, Ordering::Relaxed);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if runs
            .get(&self.owner_id)
            .is_some_and(|entry| entry.run_id == self.run_id)
        {
            runs.remove(&self.owner_id);
            debug!(owner_id = %self.owner_id, run_id = %self.run_id, "Sync unregistered");
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// At most one active sync per owner.
///
/// Shared by reference (`Arc<SyncRegistry>`) between the orchestrator and
/// whatever serves stop and status requests.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    runs: RunMap,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `owner_id` as syncing.
    ///
    /// ## Errors
    /// `SyncAlreadyActive` if the owner already has a run. The check and the
    /// insert happen under one write lock, so of two racing callers exactly
    /// one wins.
    pub fn register_sync(&self, owner_id: &str) -> SyncResult<SyncHandle> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(owner_id) {
            return Err(SyncError::SyncAlreadyActive(owner_id.to_string()));
        }

        let entry = RunEntry {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            stop: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(RunProgress::default()),
        };
        let handle = SyncHandle {
            owner_id: owner_id.to_string(),
            run_id: entry.run_id,
            stop: Arc::clone(&entry.stop),
            progress: Arc::clone(&entry.progress),
            runs: Arc::clone(&self.runs),
        };
        runs.insert(owner_id.to_string(), entry);

        info!(owner_id, run_id = %handle.run_id, "Sync registered");
        Ok(handle)
    }

    /// Asks the owner's run to stop at its next page boundary.
    ///
    /// Returns false when no run is active. Idempotent.
    pub fn request_stop(&self, owner_id: &str) -> bool {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        match runs.get(owner_id) {
            Some(entry) => {
                if !entry.stop.swap(true, Ordering::SeqCst) {
                    info!(owner_id, run_id = %entry.run_id, "Stop requested");
                }
                true
            }
            None => false,
        }
    }

    /// Whether the run behind `handle` has been asked to stop.
    pub fn should_stop(&self, handle: &SyncHandle) -> bool {
        handle.stop_requested()
    }

    /// Removes the owner's entry regardless of run.
    ///
    /// Runs normally unregister by dropping their handle; this is the escape
    /// hatch for operators. Returns whether an entry existed.
    pub fn unregister_sync(&self, owner_id: &str) -> bool {
        let removed = self
            .runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(owner_id);
        if let Some(entry) = &removed {
            info!(owner_id, run_id = %entry.run_id, "Sync unregistered by request");
        }
        removed.is_some()
    }

    pub fn is_active(&self, owner_id: &str) -> bool {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(owner_id)
    }

    /// Snapshot of the owner's run, if one is active.
    pub fn get_sync_status(&self, owner_id: &str) -> Option<SyncRunSnapshot> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(owner_id).map(|entry| SyncRunSnapshot {
            run_id: entry.run_id.to_string(),
            owner_id: owner_id.to_string(),
            table: entry.progress.table.get().cloned(),
            started_at: entry.started_at,
            current_page: entry.progress.current_page.load(Ordering::Relaxed),
            stop_requested: entry.stop.load(Ordering::SeqCst),
            counts: entry.progress.counts(),
        })
    }

    /// Owners with an active run, sorted.
    pub fn active_owners(&self) -> Vec<String> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        let mut owners: Vec<String> = runs.keys().cloned().collect();
        owners.sort();
        owners
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_register_rejected() {
        let registry = SyncRegistry::new();

        let _handle = registry.register_sync("u1").unwrap();
        let err = registry.register_sync("u1").unwrap_err();
        assert!(matches!(err, SyncError::SyncAlreadyActive(owner) if owner == "u1"));

        // Other owners are unaffected.
        assert!(registry.register_sync("u2").is_ok());
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = SyncRegistry::new();

        let handle = registry.register_sync("u1").unwrap();
        assert!(registry.is_active("u1"));
        drop(handle);

        assert!(!registry.is_active("u1"));
        assert!(registry.register_sync("u1").is_ok());
    }

    #[test]
    fn test_stale_handle_does_not_remove_new_run() {
        let registry = SyncRegistry::new();

        let old = registry.register_sync("u1").unwrap();
        assert!(registry.unregister_sync("u1"));
        let new = registry.register_sync("u1").unwrap();

        drop(old);
        let status = registry.get_sync_status("u1").unwrap();
        assert_eq!(status.run_id, new.run_id().to_string());
    }

    #[test]
    fn test_stop_flag() {
        let registry = SyncRegistry::new();
        assert!(!registry.request_stop("u1"));

        let handle = registry.register_sync("u1").unwrap();
        assert!(!registry.should_stop(&handle));

        assert!(registry.request_stop("u1"));
        assert!(registry.request_stop("u1"));
        assert!(registry.should_stop(&handle));
        assert!(registry.get_sync_status("u1").unwrap().stop_requested);
    }

    #[test]
    fn test_status_snapshot() {
        let registry = SyncRegistry::new();
        assert!(registry.get_sync_status("u1").is_none());

        let handle = registry.register_sync("u1").unwrap();
        handle.set_table("items");
        handle.record_page(3);
        handle.record_counts(&SyncCounts {
            seen: 10,
            transformed: 8,
            upserted: 8,
            errors: 2,
        });

        let status = registry.get_sync_status("u1").unwrap();
        assert_eq!(status.table.as_deref(), Some("items"));
        assert_eq!(status.current_page, 3);
        assert_eq!(status.counts.upserted, 8);
        assert!(!status.stop_requested);
    }

    #[test]
    fn test_active_owners_sorted() {
        let registry = SyncRegistry::new();
        let _b = registry.register_sync("b").unwrap();
        let _a = registry.register_sync("a").unwrap();

        assert_eq!(registry.active_owners(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_single_winner() {
        let registry = Arc::new(SyncRegistry::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                registry.register_sync("shared-owner")
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            if let Ok(handle) = task.await.unwrap() {
                winners.push(handle);
            }
        }
        assert_eq!(winners.len(), 1);
    }
}
