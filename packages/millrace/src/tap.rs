//! Store taps - observe committed dispatches without taking part in them.
//!
//! Taps are the observation layer of millrace:
//!
//! | Role       | Purpose             | Can decide? | Can mutate? | Can dispatch? |
//! |------------|---------------------|-------------|-------------|---------------|
//! | Reducer    | Compute next state  | yes         | no          | no            |
//! | Effect     | Execute IO          | no          | yes         | yes           |
//! | Tap        | Observe commits     | no          | no          | no            |
//!
//! # Execution Order
//!
//! Taps run at the end of each dispatch, after the tree is committed,
//! subscribers are notified, and the action is published to effect workers.
//! They receive the action, the committed tree, and the list of features
//! whose slices changed.
//!
//! Tap errors are logged and ignored; tap panics are caught. A tap can never
//! fail a dispatch.
//!
//! # Example
//!
//! ```ignore
//! struct ChangeLogger;
//!
//! impl StoreTap for ChangeLogger {
//!     fn on_action(
//!         &self,
//!         action: &ActionEnvelope,
//!         _state: &Arc<StateTree>,
//!         changed: &[&'static str],
//!     ) -> anyhow::Result<()> {
//!         tracing::info!(action = action.type_name, ?changed, "committed");
//!         Ok(())
//!     }
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::action::ActionEnvelope;
use crate::reducer::panic_message;
use crate::state::StateTree;

/// Trait for observing committed dispatches.
///
/// Taps run synchronously on the dispatch path, so they should be cheap.
/// Anything expensive belongs in an effect instead. Taps must not call back
/// into the store.
pub trait StoreTap: Send + Sync + 'static {
    /// Called once per committed dispatch.
    ///
    /// `changed` lists the features whose slice identity changed; it is
    /// empty for dispatches no reducer recognized.
    ///
    /// Errors are logged but do not affect the dispatch.
    fn on_action(
        &self,
        action: &ActionEnvelope,
        state: &Arc<StateTree>,
        changed: &[&'static str],
    ) -> Result<()>;
}

// Allow registering a shared tap while keeping a handle to it, e.g. an
// Arc<ActionLog> that is both registered and queried later.
impl<T: StoreTap> StoreTap for Arc<T> {
    fn on_action(
        &self,
        action: &ActionEnvelope,
        state: &Arc<StateTree>,
        changed: &[&'static str],
    ) -> Result<()> {
        (**self).on_action(action, state, changed)
    }
}

/// A registered tap plus its display name.
struct TapRunner {
    inner: Box<dyn StoreTap>,
    name: &'static str,
}

/// Registry of store taps, run in registration order.
#[derive(Default)]
pub(crate) struct TapRegistry {
    taps: Vec<TapRunner>,
}

impl TapRegistry {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    /// Register a tap under a display name.
    pub fn register<T: StoreTap>(&mut self, tap: T, name: &'static str) {
        self.taps.push(TapRunner {
            inner: Box::new(tap),
            name,
        });
    }

    /// Run every tap against a committed dispatch.
    ///
    /// Failures and panics are contained per tap.
    pub fn run_all(
        &self,
        action: &ActionEnvelope,
        state: &Arc<StateTree>,
        changed: &[&'static str],
    ) {
        for tap in &self.taps {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                tap.inner.on_action(action, state, changed)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(tap = tap.name, error = %error, "tap failed");
                }
                Err(panic_info) => {
                    warn!(
                        tap = tap.name,
                        panic = %panic_message(panic_info.as_ref()),
                        "tap panicked"
                    );
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapRegistry")
            .field("tap_count", &self.taps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct TestAction {
        value: i32,
    }

    struct CountingTap {
        count: Arc<AtomicUsize>,
    }

    impl StoreTap for CountingTap {
        fn on_action(
            &self,
            _action: &ActionEnvelope,
            _state: &Arc<StateTree>,
            _changed: &[&'static str],
        ) -> Result<()> {
            self.count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn empty_tree() -> Arc<StateTree> {
        Arc::new(StateTree::default())
    }

    #[test]
    fn test_registry_runs_taps() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = TapRegistry::new();
        registry.register(
            CountingTap {
                count: count.clone(),
            },
            "counting",
        );

        let env = ActionEnvelope::new_random(TestAction { value: 1 });
        registry.run_all(&env, &empty_tree(), &[]);
        registry.run_all(&env, &empty_tree(), &["spinner"]);

        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_failing_tap_does_not_stop_others() {
        struct FailingTap;

        impl StoreTap for FailingTap {
            fn on_action(
                &self,
                _action: &ActionEnvelope,
                _state: &Arc<StateTree>,
                _changed: &[&'static str],
            ) -> Result<()> {
                Err(anyhow::anyhow!("tap exploded"))
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = TapRegistry::new();
        registry.register(FailingTap, "failing");
        registry.register(
            CountingTap {
                count: count.clone(),
            },
            "counting",
        );

        let env = ActionEnvelope::new_random(TestAction { value: 1 });
        registry.run_all(&env, &empty_tree(), &[]);

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_tap_is_contained() {
        struct PanickingTap;

        impl StoreTap for PanickingTap {
            fn on_action(
                &self,
                _action: &ActionEnvelope,
                _state: &Arc<StateTree>,
                _changed: &[&'static str],
            ) -> Result<()> {
                panic!("tap panic");
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = TapRegistry::new();
        registry.register(PanickingTap, "panicking");
        registry.register(
            CountingTap {
                count: count.clone(),
            },
            "counting",
        );

        let env = ActionEnvelope::new_random(TestAction { value: 1 });
        registry.run_all(&env, &empty_tree(), &[]);

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_arc_tap_registration() {
        let count = Arc::new(AtomicUsize::new(0));
        let tap = Arc::new(CountingTap {
            count: count.clone(),
        });

        let mut registry = TapRegistry::new();
        registry.register(tap.clone(), "shared");

        let env = ActionEnvelope::new_random(TestAction { value: 1 });
        registry.run_all(&env, &empty_tree(), &[]);

        // The caller-side handle observes the same tap state.
        assert_eq!(tap.count.load(Ordering::Relaxed), 1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
