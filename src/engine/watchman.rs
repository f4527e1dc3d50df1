// src/engine/watchman.rs

//! Per-target run tracking.
//!
//! Every invocation of a target increments `started` when it passes the
//! gate and `finished` when its [`RunGuard`] drops, on every exit path
//! including panics. A target is running while `started > finished`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::trace;

use crate::types::TargetId;

/// Counters of one target.
#[derive(Debug, Default)]
pub struct RunRecord {
    started: AtomicU64,
    finished: AtomicU64,
    idle: Notify,
}

impl RunRecord {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        // Read `finished` first so a concurrent finish can only make us
        // report "running" spuriously, never `finished > started`.
        let finished = self.finished();
        self.started() > finished
    }
}

/// Held for the duration of one target invocation.
#[derive(Debug)]
pub struct RunGuard {
    id: TargetId,
    record: Arc<RunRecord>,
}

impl RunGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.record.finished.fetch_add(1, Ordering::SeqCst);
        trace!(target_id = %self.id, "run finished");
        self.record.idle.notify_waiters();
    }
}

/// Run tracker shared by every invocation of one executor.
#[derive(Debug, Default)]
pub struct Watchman {
    records: Mutex<HashMap<TargetId, Arc<RunRecord>>>,
}

impl Watchman {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &str) -> Arc<RunRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.entry(id.to_string()).or_default().clone()
    }

    fn existing(&self, id: &str) -> Option<Arc<RunRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned()
    }

    /// Gate and count in one step.
    ///
    /// Returns `None` if `id` is running and `allow_multi_run` is off.
    pub fn try_begin(&self, id: &str, allow_multi_run: bool) -> Option<RunGuard> {
        let record = self.record(id);
        loop {
            let started = record.started.load(Ordering::SeqCst);
            if !allow_multi_run && started > record.finished() {
                return None;
            }
            if record
                .started
                .compare_exchange(started, started + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                trace!(target_id = %id, run = started + 1, "run started");
                return Some(RunGuard {
                    id: id.to_string(),
                    record,
                });
            }
        }
    }

    /// Gate for needs: succeeds only for the very first run of `id`.
    pub fn try_begin_once(&self, id: &str) -> Option<RunGuard> {
        let record = self.record(id);
        record
            .started
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        trace!(target_id = %id, "first run started");
        Some(RunGuard {
            id: id.to_string(),
            record,
        })
    }

    pub fn has_started(&self, id: &str) -> bool {
        self.existing(id).is_some_and(|r| r.started() > 0)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.existing(id).is_some_and(|r| r.is_running())
    }

    /// `(started, finished)` for `id`.
    pub fn counts(&self, id: &str) -> (u64, u64) {
        self.existing(id)
            .map(|r| (r.started(), r.finished()))
            .unwrap_or((0, 0))
    }

    /// Resolve once `id` is not running anymore.
    pub async fn wait_idle(&self, id: &str) {
        let record = self.record(id);
        loop {
            let notified = record.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a finish in between is not lost.
            notified.as_mut().enable();
            if !record.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Forget every record.
    pub fn reset(&self) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn gate_refuses_second_run_unless_multi_run() {
        let watchman = Watchman::new();
        let first = watchman.try_begin("x", false).unwrap();
        assert!(watchman.try_begin("x", false).is_none());

        let second = watchman.try_begin("x", true).unwrap();
        assert_eq!(watchman.counts("x"), (2, 0));

        drop(first);
        drop(second);
        assert_eq!(watchman.counts("x"), (2, 2));
        assert!(!watchman.is_running("x"));
        assert!(watchman.has_started("x"));
    }

    #[test]
    fn once_gate_admits_only_the_first_run() {
        let watchman = Watchman::new();
        let first = watchman.try_begin_once("n");
        assert!(first.is_some());
        assert!(watchman.try_begin_once("n").is_none());
        drop(first);
        assert!(watchman.try_begin_once("n").is_none());
        assert_eq!(watchman.counts("n"), (1, 1));

        // A regular run counts as started too.
        drop(watchman.try_begin("m", false));
        assert!(watchman.try_begin_once("m").is_none());
    }

    #[test]
    fn reset_forgets_history() {
        let watchman = Watchman::new();
        drop(watchman.try_begin("x", false));
        watchman.reset();
        assert!(!watchman.has_started("x"));
        assert_eq!(watchman.counts("x"), (0, 0));
    }

    #[test]
    fn guard_counts_finish_on_panic() {
        let watchman = Arc::new(Watchman::new());
        let w = watchman.clone();
        let result = std::thread::spawn(move || {
            let _guard = w.try_begin("boom", false).unwrap();
            panic!("block failed");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(watchman.counts("boom"), (1, 1));
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_guard_drops() {
        let watchman = Arc::new(Watchman::new());
        let guard = watchman.try_begin("slow", false).unwrap();

        let w = watchman.clone();
        let waiter = tokio::spawn(async move { w.wait_idle("slow").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake up")
            .unwrap();
    }
}
