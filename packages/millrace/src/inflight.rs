//! Correlation-scoped tracking of in-flight effect work.
//!
//! The store increments the count for a correlation ID once per interested
//! effect worker when it publishes an envelope; each worker decrements
//! exactly once per matched envelope, via an RAII guard so that cancelled
//! (switch) and dropped (exhaust) triggers still settle.
//!
//! Unlike the usual pending-work trackers there is no error channel here:
//! effect failures are converted into actions and re-enter dispatch, so the
//! only question this module answers is "is anything still running?".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::action::CorrelationId;

/// Entry tracking in-flight work for a single correlation ID.
struct InflightEntry {
    /// Count of pending work items for this correlation.
    count: AtomicUsize,
    /// Notifier for waiters when the count hits zero.
    notify: Notify,
}

impl InflightEntry {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }
}

/// Tracks in-flight effect work per correlation ID.
#[derive(Default)]
pub(crate) struct InflightTracker {
    entries: DashMap<CorrelationId, Arc<InflightEntry>>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Increment the in-flight count for a correlation ID.
    ///
    /// Called by the store before publishing an envelope, once per worker
    /// whose input type matches.
    pub fn inc(&self, cid: CorrelationId, n: usize) {
        if cid.is_none() || n == 0 {
            return;
        }
        let entry = self
            .entries
            .entry(cid)
            .or_insert_with(|| Arc::new(InflightEntry::new()))
            .clone();
        entry.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Decrement the in-flight count for a correlation ID.
    ///
    /// When the count hits zero the entry is removed and all waiters are
    /// notified.
    pub fn dec(&self, cid: CorrelationId, n: usize) {
        if cid.is_none() || n == 0 {
            return;
        }
        if let Some(entry) = self.entries.get(&cid) {
            let prev = entry.count.fetch_sub(n, Ordering::AcqRel);
            if prev == n {
                entry.notify.notify_waiters();
                // Release the map ref before removing the shard entry.
                drop(entry);
                self.entries.remove(&cid);
            }
        }
    }

    /// Wait for the in-flight count for a correlation ID to reach zero.
    ///
    /// Returns immediately if nothing is (or ever was) tracked for this ID.
    /// Notify is edge-triggered, so the loop re-checks after every wakeup.
    pub async fn wait_zero(&self, cid: CorrelationId) {
        loop {
            // Clone the Arc so we own the entry independent of the map.
            let entry = match self.entries.get(&cid) {
                None => return,
                Some(entry) => entry.clone(),
            };

            // Register for notification BEFORE checking the count. This
            // prevents the race where dec() notifies between our check and
            // our await.
            let notified = entry.notify.notified();

            if entry.count.load(Ordering::Acquire) == 0 {
                self.entries.remove(&cid);
                return;
            }

            notified.await;
        }
    }

    /// True if no work is tracked for this correlation ID.
    pub fn is_idle(&self, cid: CorrelationId) -> bool {
        match self.entries.get(&cid) {
            None => true,
            Some(entry) => entry.count.load(Ordering::Acquire) == 0,
        }
    }
}

impl std::fmt::Debug for InflightTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflightTracker")
            .field("tracked", &self.entries.len())
            .finish()
    }
}

/// RAII guard decrementing one unit of in-flight work on drop.
///
/// Effect workers create one per matched envelope and move it into the task
/// handling it. Dropping the task, whether it ran to completion, was aborted
/// by the switch policy, or was skipped by the exhaust policy, releases the
/// unit exactly once.
pub(crate) struct InflightGuard {
    tracker: Arc<InflightTracker>,
    cid: CorrelationId,
}

impl InflightGuard {
    pub fn new(tracker: Arc<InflightTracker>, cid: CorrelationId) -> Self {
        Self { tracker, cid }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.tracker.dec(self.cid, 1);
    }
}
