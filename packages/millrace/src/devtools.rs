//! Dev-tool action log: an append-only record of committed dispatches.
//!
//! The log is a [`StoreTap`] that records, for every committed dispatch,
//! the action, the correlation ID, the features whose slices changed, and
//! the resulting tree. It is purely observational; the store never depends
//! on it for correctness.
//!
//! Two consumers are served:
//! - **Inspection**: `summaries()` / `to_json()` export the entry metadata
//!   for external tooling.
//! - **Replay**: `replay()` re-dispatches the recorded payloads into a
//!   store, which, reducers being pure, deterministically reproduces the
//!   recorded final state.
//!
//! # Example
//!
//! ```ignore
//! let log = Arc::new(ActionLog::new());
//! let store = StoreBuilder::new(())
//!     .with_feature("spinner", SpinnerReducer)
//!     .with_tap(log.clone(), "action_log")
//!     .build();
//!
//! store.dispatch(SpinnerAction::Start)?;
//! assert_eq!(log.len(), 1);
//! println!("{}", log.to_json()?);
//! ```

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::action::{ActionEnvelope, CorrelationId};
use crate::state::StateTree;
use crate::store::Store;
use crate::tap::StoreTap;

/// One committed dispatch, as recorded by the log.
#[derive(Clone)]
pub struct ActionLogEntry {
    /// Position in the log, starting at 0.
    pub seq: u64,
    /// Wall-clock time the dispatch was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Type name of the dispatched action.
    pub action_type: &'static str,
    /// Correlation ID of the dispatch.
    pub cid: CorrelationId,
    /// Features whose slice identity changed.
    pub changed: Vec<&'static str>,
    /// The tree as committed by this dispatch.
    pub state: Arc<StateTree>,
    type_id: TypeId,
    payload: Arc<dyn Any + Send + Sync>,
}

impl ActionLogEntry {
    /// Downcast the recorded action payload.
    pub fn action<A: Any>(&self) -> Option<&A> {
        self.payload.downcast_ref()
    }
}

impl std::fmt::Debug for ActionLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLogEntry")
            .field("seq", &self.seq)
            .field("action_type", &self.action_type)
            .field("changed", &self.changed)
            .finish_non_exhaustive()
    }
}

/// Serializable projection of an entry, for export.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    /// Position in the log.
    pub seq: u64,
    /// Wall-clock time the dispatch was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Type name of the dispatched action.
    pub action_type: &'static str,
    /// Correlation ID of the dispatch.
    pub cid: CorrelationId,
    /// Features whose slice identity changed.
    pub changed: Vec<&'static str>,
}

/// Append-only in-memory log of committed dispatches.
///
/// Register an `Arc<ActionLog>` as a tap and keep the other handle for
/// queries.
#[derive(Default)]
pub struct ActionLog {
    seq: AtomicU64,
    entries: Mutex<Vec<ActionLogEntry>>,
}

impl ActionLog {
    /// An empty log.
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Number of recorded dispatches.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all entries in dispatch order.
    pub fn entries(&self) -> Vec<ActionLogEntry> {
        self.lock().clone()
    }

    /// Drop all recorded entries. The sequence counter keeps counting.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Serializable summaries of all entries, in dispatch order.
    pub fn summaries(&self) -> Vec<ActionSummary> {
        self.lock()
            .iter()
            .map(|entry| ActionSummary {
                seq: entry.seq,
                recorded_at: entry.recorded_at,
                action_type: entry.action_type,
                cid: entry.cid,
                changed: entry.changed.clone(),
            })
            .collect()
    }

    /// The entry summaries as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.summaries())
    }

    /// Re-dispatch every recorded action into a store, in order.
    ///
    /// Each action is replayed under a fresh correlation ID. Against a
    /// store with the same reducers and initial state, replay reproduces
    /// the recorded final state exactly.
    pub fn replay<D: Send + Sync + 'static>(&self, store: &Store<D>) -> Result<(), crate::StoreError> {
        for entry in self.entries() {
            store.shared().dispatch_envelope(ActionEnvelope::from_parts(
                CorrelationId::new(),
                entry.type_id,
                entry.action_type,
                entry.payload.clone(),
            ))?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ActionLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreTap for ActionLog {
    fn on_action(
        &self,
        action: &ActionEnvelope,
        state: &Arc<StateTree>,
        changed: &[&'static str],
    ) -> Result<()> {
        let entry = ActionLogEntry {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            recorded_at: Utc::now(),
            action_type: action.type_name,
            cid: action.cid,
            changed: changed.to_vec(),
            state: state.clone(),
            type_id: action.type_id,
            payload: action.payload.clone(),
        };
        self.lock().push(entry);
        Ok(())
    }
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::Reducer;
    use crate::store::StoreBuilder;

    #[derive(Debug, Clone, PartialEq)]
    struct SpinnerState {
        is_on: bool,
    }

    #[derive(Debug, Clone)]
    enum SpinnerAction {
        Start,
        Stop,
    }

    struct SpinnerReducer;

    impl Reducer for SpinnerReducer {
        type State = SpinnerState;
        type Action = SpinnerAction;

        fn initial(&self) -> SpinnerState {
            SpinnerState { is_on: false }
        }

        fn reduce(&self, _state: Arc<SpinnerState>, action: &SpinnerAction) -> Arc<SpinnerState> {
            match action {
                SpinnerAction::Start => Arc::new(SpinnerState { is_on: true }),
                SpinnerAction::Stop => Arc::new(SpinnerState { is_on: false }),
            }
        }
    }

    fn logged_store() -> (Store, Arc<ActionLog>) {
        let log = Arc::new(ActionLog::new());
        let store = StoreBuilder::new(())
            .with_feature("spinner", SpinnerReducer)
            .with_tap(log.clone(), "action_log")
            .build();
        (store, log)
    }

    #[test]
    fn test_log_records_dispatches_in_order() {
        let (store, log) = logged_store();

        store.dispatch(SpinnerAction::Start).unwrap();
        store.dispatch(SpinnerAction::Stop).unwrap();

        assert_eq!(log.len(), 2);
        let entries = log.entries();
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert!(entries[0].action_type.ends_with("SpinnerAction"));
        assert_eq!(entries[0].changed, vec!["spinner"]);
        assert!(entries[0].state.slice::<SpinnerState>("spinner").unwrap().is_on);
        assert!(matches!(
            entries[0].action::<SpinnerAction>(),
            Some(SpinnerAction::Start)
        ));
    }

    #[test]
    fn test_log_records_noop_dispatches_with_empty_changed() {
        #[derive(Debug, Clone)]
        struct ForeignAction;

        let (store, log) = logged_store();
        store.dispatch(ForeignAction).unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].changed.is_empty());
    }

    #[test]
    fn test_summaries_and_json_export() {
        let (store, log) = logged_store();
        store.dispatch(SpinnerAction::Start).unwrap();

        let summaries = log.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].changed, vec!["spinner"]);

        let json = log.to_json().unwrap();
        assert!(json.contains("SpinnerAction"));
        assert!(json.contains("spinner"));
    }

    #[test]
    fn test_clear_keeps_counting() {
        let (store, log) = logged_store();

        store.dispatch(SpinnerAction::Start).unwrap();
        log.clear();
        assert!(log.is_empty());

        store.dispatch(SpinnerAction::Stop).unwrap();
        assert_eq!(log.entries()[0].seq, 1);
    }

    #[test]
    fn test_replay_reproduces_final_state() {
        let (store, log) = logged_store();

        store.dispatch(SpinnerAction::Start).unwrap();
        store.dispatch(SpinnerAction::Stop).unwrap();
        store.dispatch(SpinnerAction::Start).unwrap();
        let recorded = store.state().slice::<SpinnerState>("spinner").unwrap();

        let fresh = StoreBuilder::new(())
            .with_feature("spinner", SpinnerReducer)
            .build();
        log.replay(&fresh).unwrap();

        let replayed = fresh.state().slice::<SpinnerState>("spinner").unwrap();
        assert_eq!(*recorded, *replayed);
    }

    #[test]
    fn test_debug_impl() {
        let log = ActionLog::new();
        let debug = format!("{:?}", log);
        assert!(debug.contains("ActionLog"));
    }
}
