//! Testing utilities for reducers and stores.
//!
//! This module provides ergonomic helpers for testing state transitions:
//! a macro for concise transition tables, a fluent harness for longer
//! scenarios, and a tap that records dispatched actions for assertions.
//!
//! # Feature Flag
//!
//! Outside this crate's own tests, the module is only available with the
//! `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! millrace = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Using `assert_reduces!`
//!
//! ```ignore
//! use millrace::assert_reduces;
//!
//! assert_reduces!(
//!     SpinnerReducer,
//!     SpinnerState { is_on: false },
//!     SpinnerAction::Start => SpinnerState { is_on: true },
//!     SpinnerAction::Stop => SpinnerState { is_on: false },
//! );
//! ```
//!
//! ## Using the Fluent Harness
//!
//! ```ignore
//! use millrace::testing::ReducerHarness;
//!
//! ReducerHarness::new(AttendeeReducer::new())
//!     .given(AttendeeAction::Load)
//!     .expect_state(|s| s.loading)
//!     .given(AttendeeAction::LoadSucceeded { attendees })
//!     .expect_state(|s| !s.loading && s.collection.len() == 1)
//!     .expect_unchanged(AttendeeAction::Noop);
//! ```
//!
//! ## Recording Actions
//!
//! ```ignore
//! let recorder = Arc::new(ActionRecorder::new());
//! let store = StoreBuilder::new(deps)
//!     .with_effect(LoadAttendeesEffect)
//!     .with_tap(recorder.clone(), "recorder")
//!     .build();
//!
//! store.dispatch_and_settle(LoadAttendees).await?;
//! assert_eq!(recorder.count_of::<AttendeeLoaded>(), 1);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use crate::action::{Action, ActionEnvelope};
use crate::reducer::Reducer;
use crate::state::StateTree;
use crate::tap::StoreTap;

/// Asserts a table of action to expected-state transitions for a reducer.
///
/// The state threads through the table: each row reduces the state the
/// previous row produced. The macro evaluates to the final `Arc<State>`.
///
/// # Panics
///
/// Panics if any transition does not produce the expected state. Requires
/// the state type to implement `PartialEq` and `Debug`.
#[macro_export]
macro_rules! assert_reduces {
    ($reducer:expr, $initial:expr, $($action:expr => $expected:expr),+ $(,)?) => {{
        let __reducer = $reducer;
        let mut __state = ::std::sync::Arc::new($initial);
        $(
            __state = $crate::Reducer::reduce(&__reducer, __state, &$action);
            assert_eq!(
                *__state,
                $expected,
                "unexpected state after {}",
                stringify!($action)
            );
        )+
        __state
    }};
}

/// Fluent given/expect harness for reducer scenarios.
///
/// Starts from the reducer's `initial()` state unless
/// [`ReducerHarness::with_state`] overrides it.
pub struct ReducerHarness<R: Reducer> {
    reducer: R,
    state: Arc<R::State>,
}

impl<R: Reducer> ReducerHarness<R> {
    /// Start from the reducer's initial state.
    pub fn new(reducer: R) -> Self {
        let state = Arc::new(reducer.initial());
        Self { reducer, state }
    }

    /// Start from an explicit state.
    pub fn with_state(reducer: R, state: R::State) -> Self {
        Self {
            reducer,
            state: Arc::new(state),
        }
    }

    /// Reduce an action into the current state.
    pub fn given(mut self, action: R::Action) -> Self {
        self.state = self.reducer.reduce(self.state.clone(), &action);
        self
    }

    /// Assert a predicate over the current state.
    ///
    /// # Panics
    ///
    /// Panics if the predicate returns false.
    pub fn expect_state(self, predicate: impl FnOnce(&R::State) -> bool) -> Self {
        assert!(predicate(&self.state), "state predicate failed");
        self
    }

    /// Assert the current state equals an expected value.
    pub fn expect(self, expected: R::State) -> Self
    where
        R::State: PartialEq + std::fmt::Debug,
    {
        assert_eq!(*self.state, expected);
        self
    }

    /// Assert an action is an identity-preserving no-op for the current
    /// state (same `Arc`, not merely an equal value).
    pub fn expect_unchanged(mut self, action: R::Action) -> Self {
        let before = self.state.clone();
        self.state = self.reducer.reduce(self.state.clone(), &action);
        assert!(
            Arc::ptr_eq(&before, &self.state),
            "expected identity-preserving no-op"
        );
        self
    }

    /// The current state.
    pub fn state(&self) -> &R::State {
        &self.state
    }
}

/// A tap that records every committed dispatch for later assertions.
///
/// Register an `Arc<ActionRecorder>` as a tap and keep the other handle.
#[derive(Default)]
pub struct ActionRecorder {
    seen: Mutex<Vec<ActionEnvelope>>,
}

impl ActionRecorder {
    /// An empty recorder.
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Total number of recorded dispatches.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All recorded envelopes, in dispatch order.
    pub fn envelopes(&self) -> Vec<ActionEnvelope> {
        self.lock().clone()
    }

    /// The recorded actions of one type, in dispatch order.
    pub fn actions_of<A: Action + Clone>(&self) -> Vec<A> {
        self.lock()
            .iter()
            .filter_map(|env| env.downcast_ref::<A>().cloned())
            .collect()
    }

    /// How many recorded dispatches carry this action type.
    pub fn count_of<A: Action>(&self) -> usize {
        self.lock()
            .iter()
            .filter(|env| env.downcast_ref::<A>().is_some())
            .count()
    }

    /// The first recorded action of this type, if any.
    pub fn first_of<A: Action + Clone>(&self) -> Option<A> {
        self.lock()
            .iter()
            .find_map(|env| env.downcast_ref::<A>().cloned())
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ActionEnvelope>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreTap for ActionRecorder {
    fn on_action(
        &self,
        action: &ActionEnvelope,
        _state: &Arc<StateTree>,
        _changed: &[&'static str],
    ) -> Result<()> {
        self.lock().push(action.clone());
        Ok(())
    }
}

impl std::fmt::Debug for ActionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRecorder")
            .field("recorded", &self.len())
            .finish()
    }
}
