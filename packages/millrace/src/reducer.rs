//! Reducer trait and type-erased runner.
//!
//! Reducers are pure functions that fold actions into feature state. The
//! store calls them synchronously, serially, and never lets them perform IO.
//!
//! # Key Properties
//!
//! - **Pure**: no IO, no mutation of the input, no external mutable state
//! - **Identity-preserving**: an unrecognized action returns the input `Arc`
//!   unchanged, which is what makes `Arc::ptr_eq` a valid change signal
//! - **Panic-isolated**: a panicking reducer rejects the dispatch as a whole;
//!   the prior state is retained and the error surfaces to the caller

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::action::Action;
use crate::state::SliceEntry;

/// A pure function from (feature state, action) to the next feature state.
///
/// # Identity Contract
///
/// When the action is not recognized, `reduce` must return the `state` `Arc`
/// it received. The store compares identities to decide whether the slice
/// changed, so a reducer that rebuilds equal-but-new state on every action
/// defeats change detection downstream.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq)]
/// struct SpinnerState {
///     is_on: bool,
/// }
///
/// #[derive(Debug, Clone)]
/// enum SpinnerAction {
///     Start,
///     Stop,
/// }
///
/// struct SpinnerReducer;
///
/// impl Reducer for SpinnerReducer {
///     type State = SpinnerState;
///     type Action = SpinnerAction;
///
///     fn initial(&self) -> SpinnerState {
///         SpinnerState { is_on: false }
///     }
///
///     fn reduce(&self, state: Arc<SpinnerState>, action: &SpinnerAction) -> Arc<SpinnerState> {
///         match action {
///             SpinnerAction::Start => Arc::new(SpinnerState { is_on: true }),
///             SpinnerAction::Stop => Arc::new(SpinnerState { is_on: false }),
///         }
///     }
/// }
/// ```
pub trait Reducer: Send + Sync + 'static {
    /// The feature state this reducer owns.
    type State: Send + Sync + 'static;

    /// The action type this reducer folds.
    type Action: Action;

    /// The slice value the store starts from.
    fn initial(&self) -> Self::State;

    /// Compute the next state for an action.
    ///
    /// # Guarantees
    ///
    /// - Called synchronously (no async)
    /// - Called serially (no concurrent calls)
    /// - Never called with an action of a foreign type
    fn reduce(&self, state: Arc<Self::State>, action: &Self::Action) -> Arc<Self::State>;
}

/// Type-erased reducer trait for internal use.
trait AnyReducer: Send + Sync {
    /// Fold a type-erased action into a type-erased slice.
    ///
    /// Actions of a foreign type pass the slice through untouched.
    fn reduce_any(
        &self,
        slice: Arc<dyn Any + Send + Sync>,
        action: &dyn Any,
    ) -> Arc<dyn Any + Send + Sync>;
}

impl<R: Reducer> AnyReducer for R {
    fn reduce_any(
        &self,
        slice: Arc<dyn Any + Send + Sync>,
        action: &dyn Any,
    ) -> Arc<dyn Any + Send + Sync> {
        let Some(action) = action.downcast_ref::<R::Action>() else {
            return slice;
        };
        // The runner created this slice from `initial()`, so the downcast
        // cannot fail; passing the original through keeps the store sane
        // even if that invariant is ever broken.
        let typed = match slice.downcast::<R::State>() {
            Ok(typed) => typed,
            Err(original) => return original,
        };
        self.reduce(typed, action)
    }
}

/// Type-erased wrapper for reducers.
///
/// `ReducerRunner` lets the store hold reducers for different state and
/// action types in a single collection, and isolates reducer panics from
/// the dispatch loop.
pub(crate) struct ReducerRunner {
    feature: &'static str,
    inner: Box<dyn AnyReducer>,
    initial: SliceEntry,
}

impl ReducerRunner {
    /// Wrap a reducer registered under the given feature name.
    pub fn new<R: Reducer>(feature: &'static str, reducer: R) -> Self {
        let initial = SliceEntry {
            value: Arc::new(reducer.initial()),
            type_name: std::any::type_name::<R::State>(),
        };
        Self {
            feature,
            inner: Box::new(reducer),
            initial,
        }
    }

    /// The feature name this reducer owns.
    pub fn feature(&self) -> &'static str {
        self.feature
    }

    /// The initial slice for the root tree.
    pub fn initial_entry(&self) -> SliceEntry {
        self.initial.clone()
    }

    /// Fold an action into the current slice.
    ///
    /// Returns the (possibly identical) next slice, or the captured panic
    /// message if the reducer panicked. The caller decides what a panic
    /// means; the store rejects the whole dispatch.
    pub fn reduce(
        &self,
        slice: &Arc<dyn Any + Send + Sync>,
        action: &dyn Any,
    ) -> Result<Arc<dyn Any + Send + Sync>, String> {
        // AssertUnwindSafe is needed because the boxed reducer is not
        // UnwindSafe by default. The reducer is stateless (&self), so there
        // is no state to observe in a broken condition afterwards.
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.inner.reduce_any(slice.clone(), action)
        }));

        match result {
            Ok(next) => Ok(next),
            Err(panic_info) => {
                let message = panic_message(panic_info.as_ref());
                error!(
                    feature = self.feature,
                    panic = %message,
                    "reducer panicked"
                );
                Err(message)
            }
        }
    }
}

impl std::fmt::Debug for ReducerRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerRunner")
            .field("feature", &self.feature)
            .finish_non_exhaustive()
    }
}

/// Extract a printable message from a captured panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
