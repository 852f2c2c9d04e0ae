//! Structured error types and the failure action for millrace.
//!
//! `StoreError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`. `EffectFailed` is the action dispatched when an effect
//! returns an error it does not map to a domain action itself.
//!
//! # The Error Boundary Rule
//!
//! > **No `anyhow::Error` ever crosses back into the dispatch path.**
//!
//! Pure-path faults (reducers, selectors) are synchronous and surface
//! immediately to the caller. Impure-path faults (effects) are always
//! converted into data, an [`EffectFailed`] or a domain failure action, and
//! fed back through normal dispatch. The UI observes failure exclusively
//! through selected state, never through exceptions.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::action::CorrelationId;

/// Errors surfaced by the store's synchronous paths.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A reducer panicked while computing the next state.
    ///
    /// The dispatch was rejected as a whole and the prior state retained.
    #[error("reducer for feature '{feature}' panicked: {message}")]
    ReducerPanicked {
        /// The feature whose reducer panicked.
        feature: &'static str,
        /// The captured panic message.
        message: String,
    },

    /// `dispatch` was called from inside a dispatch cycle.
    ///
    /// Reducers are pure and subscribers run under the dispatch lock, so
    /// neither may dispatch.
    #[error("dispatch called from within a dispatch cycle")]
    ReentrantDispatch,

    /// Two reducers were registered under the same feature name.
    #[error("feature '{feature}' is already registered")]
    FeatureAlreadyRegistered {
        /// The duplicated feature name.
        feature: &'static str,
    },

    /// No reducer is registered under this feature name.
    #[error("no feature named '{feature}' is registered")]
    UnknownFeature {
        /// The requested feature name.
        feature: String,
    },

    /// The feature exists but holds a different slice type.
    #[error("feature '{feature}' holds {actual}, not {requested}")]
    SliceTypeMismatch {
        /// The requested feature name.
        feature: String,
        /// The type the slice actually holds.
        actual: &'static str,
        /// The type the caller asked for.
        requested: &'static str,
    },

    /// Cascading effect work did not finish within the settle timeout.
    ///
    /// This usually means an effect is stuck, or an effect worker lagged
    /// and missed the triggering action.
    #[error("effect work for correlation {cid} did not settle within {timeout:?}")]
    SettleTimeout {
        /// The correlation being awaited.
        cid: CorrelationId,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

/// Action dispatched when an effect fails without mapping the error itself.
///
/// This is the only form in which an asynchronous failure re-enters the
/// dispatch path. Reducers can fold it into an `error` field for the UI, and
/// recovery effects can react to it.
///
/// # Example
///
/// ```ignore
/// impl Reducer for AttendeeReducer {
///     type State = AttendeeState;
///     type Action = EffectFailed;
///
///     fn reduce(&self, state: Arc<AttendeeState>, action: &EffectFailed) -> Arc<AttendeeState> {
///         Arc::new(AttendeeState {
///             error: Some(action.message.clone()),
///             loading: false,
///             ..(*state).clone()
///         })
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EffectFailed {
    /// Name of the effect that failed.
    pub effect: &'static str,
    /// The rendered error message.
    pub message: String,
    /// The correlation ID of the triggering action.
    pub cid: CorrelationId,
}

impl fmt::Display for EffectFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect {} failed: {}", self.effect, self.message)
    }
}

// EffectFailed automatically implements Action via the blanket impl
// (Clone + Send + Sync + 'static).

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::ReducerPanicked {
            feature: "spinner",
            message: "boom".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("spinner"));
        assert!(rendered.contains("boom"));

        assert_eq!(
            StoreError::ReentrantDispatch.to_string(),
            "dispatch called from within a dispatch cycle"
        );
    }

    #[test]
    fn test_slice_type_mismatch_display() {
        let err = StoreError::SliceTypeMismatch {
            feature: "spinner".to_string(),
            actual: "SpinnerState",
            requested: "CounterState",
        };
        let rendered = err.to_string();
        assert!(rendered.contains("SpinnerState"));
        assert!(rendered.contains("CounterState"));
    }

    #[test]
    fn test_settle_timeout_display() {
        let err = StoreError::SettleTimeout {
            cid: CorrelationId::NONE,
            timeout: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("NONE"));
    }

    #[test]
    fn test_effect_failed_display() {
        let failed = EffectFailed {
            effect: "LoadAttendeesEffect",
            message: "connection refused".to_string(),
            cid: CorrelationId::new(),
        };
        let rendered = failed.to_string();
        assert!(rendered.contains("LoadAttendeesEffect"));
        assert!(rendered.contains("connection refused"));
    }
}
