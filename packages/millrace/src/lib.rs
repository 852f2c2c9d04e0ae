//! # Millrace
//!
//! A unidirectional state container where actions describe, reducers
//! decide, and effects execute.
//!
//! ## Core Concepts
//!
//! Millrace separates **what happened** from **what it means** and **what
//! to do about it**:
//! - [`Action`] = a tagged, immutable message ("something happened")
//! - [`Reducer`] = a pure function folding actions into feature state
//! - [`Effect`] = an asynchronous coordinator turning actions into IO and
//!   IO outcomes back into actions
//!
//! The store owns the composed [`StateTree`] exclusively. State only ever
//! changes on the serialized dispatch path; everything else holds immutable
//! snapshots.
//!
//! ## Architecture
//!
//! ```text
//! UI / edge
//!     │
//!     ▼ dispatch()
//! Store ──────────────────────────────────────────┐
//!     │                                           │
//!     ├─► Reducer A ─► new slice ──┐              │
//!     ├─► Reducer B ─► (identity)  ├─► commit     │
//!     └─► Reducer C ─► new slice ──┘    │         │
//!                                       ▼         │
//!                              subscribers, taps  │
//!                                       │         │
//!                                       ▼         │
//!                                 ActionBus       │
//!                                       │         │
//!                        ┌──────────────┤         │
//!                        ▼              ▼         │
//!                 Effect worker   Effect worker   │
//!                 (switch/concat/merge/exhaust)   │
//!                        │                        │
//!                        └─► follow-up action ────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Actions are immutable** - created once, observed everywhere
//! 2. **Reducers are pure** - no IO, no mutation, unrecognized actions
//!    return the identical input reference
//! 3. **Dispatch is serialized** - two dispatches never interleave, and
//!    reducers or subscribers may not dispatch
//! 4. **The store is the only writer** - structural sharing makes `Arc`
//!    identity a valid change signal
//! 5. **Effect failures are data** - converted into actions, never thrown
//!    across the effect boundary
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use millrace::{
//!     async_trait, ConcurrencyPolicy, Effect, EffectContext, EntityAdapter,
//!     EntityState, Reducer, StoreBuilder,
//! };
//!
//! // 1. Define the feature state and its actions
//! #[derive(Debug, Clone, PartialEq)]
//! struct AttendeeState {
//!     collection: Arc<EntityState<Attendee>>,
//!     loading: bool,
//! }
//!
//! #[derive(Debug, Clone)]
//! enum AttendeeAction {
//!     Load,
//!     LoadSucceeded { attendees: Vec<Attendee> },
//!     LoadFailed { message: String },
//! }
//!
//! // 2. Define the reducer (pure decisions)
//! struct AttendeeReducer {
//!     adapter: EntityAdapter<Attendee>,
//! }
//!
//! impl Reducer for AttendeeReducer {
//!     type State = AttendeeState;
//!     type Action = AttendeeAction;
//!
//!     fn initial(&self) -> AttendeeState { /* ... */ }
//!
//!     fn reduce(&self, state: Arc<AttendeeState>, action: &AttendeeAction) -> Arc<AttendeeState> {
//!         match action {
//!             AttendeeAction::Load => Arc::new(AttendeeState {
//!                 loading: true,
//!                 collection: state.collection.clone(),
//!             }),
//!             AttendeeAction::LoadSucceeded { attendees } => Arc::new(AttendeeState {
//!                 loading: false,
//!                 collection: self.adapter.set_all(&state.collection, attendees.clone()),
//!             }),
//!             AttendeeAction::LoadFailed { .. } => Arc::new(AttendeeState {
//!                 loading: false,
//!                 collection: state.collection.clone(),
//!             }),
//!         }
//!     }
//! }
//!
//! // 3. Define the effect (IO, outcomes become actions)
//! struct LoadAttendeesEffect;
//!
//! #[async_trait]
//! impl Effect<ApiClient> for LoadAttendeesEffect {
//!     type Input = AttendeeAction;
//!     type Output = AttendeeAction;
//!
//!     async fn run(
//!         &self,
//!         action: AttendeeAction,
//!         ctx: EffectContext<ApiClient>,
//!     ) -> anyhow::Result<Option<AttendeeAction>> {
//!         match action {
//!             AttendeeAction::Load => {
//!                 let attendees = ctx.deps().fetch_attendees().await?;
//!                 Ok(Some(AttendeeAction::LoadSucceeded { attendees }))
//!             }
//!             _ => Ok(None), // only Load triggers IO
//!         }
//!     }
//!
//!     fn policy(&self) -> ConcurrencyPolicy {
//!         ConcurrencyPolicy::Switch
//!     }
//! }
//!
//! // 4. Wire together and run
//! let store = StoreBuilder::new(ApiClient::new())
//!     .with_feature("attendees", AttendeeReducer::new())
//!     .with_effect(LoadAttendeesEffect)
//!     .build();
//!
//! store.dispatch(AttendeeAction::Load)?;
//! ```
//!
//! ## What This Is Not
//!
//! Millrace is **not**:
//! - An event-sourcing system (the action log is in-memory and observational)
//! - A job queue (effects are in-process tasks)
//! - An actor framework
//!
//! Millrace **is**:
//! > A unidirectional state container where actions describe, reducers
//! > decide, and effects execute.

// Core modules
mod action;
mod bus;
mod devtools;
mod effect;
mod entity;
mod error;
mod inflight;
mod reducer;
mod selector;
mod state;
mod store;
mod tap;

// Testing utilities (feature-gated, also compiled for this crate's tests)
#[cfg(any(test, feature = "testing"))]
pub mod testing;



// Re-export action types
pub use crate::action::{Action, ActionEnvelope, ActionMatch, CorrelationId, MatchChain};

// Re-export state types
pub use crate::state::StateTree;

// Re-export reducer types
pub use crate::reducer::Reducer;

// Re-export store types
pub use crate::store::{Store, StoreBuilder, Subscription, DEFAULT_SETTLE_TIMEOUT};

// Re-export selector types
pub use crate::selector::{Selector, Selector2};

// Re-export entity adapter types
pub use crate::entity::{Entity, EntityAdapter, EntityState, Update};

// Re-export effect types
pub use crate::effect::{ConcurrencyPolicy, Effect, EffectContext};

// Re-export error types
pub use crate::error::{EffectFailed, StoreError};

// Re-export tap and devtools types
pub use crate::devtools::{ActionLog, ActionLogEntry, ActionSummary};
pub use crate::tap::StoreTap;

// Re-export commonly used external types
pub use async_trait::async_trait;
