//! The store: state ownership, serialized dispatch, subscription, lifecycle.
//!
//! The store owns the composed state tree and is the only thing that may
//! replace it. `dispatch` is synchronous: it runs every reducer, commits the
//! new tree, notifies subscribers, publishes the action to effect workers,
//! and runs taps, all under a single lock, so dispatches are processed in
//! call order and never interleave.
//!
//! Effects run on their own tasks and re-enter this same path by
//! dispatching follow-up actions. Nothing ever mutates state from outside.
//!
//! # Dispatch Pipeline
//!
//! ```text
//! dispatch(action)
//!     │
//!     ├─ 1. every reducer folds its slice (pure, panic-isolated)
//!     ├─ 2. changed slices committed into a new tree (structural sharing)
//!     ├─ 3. subscribers notified in registration order
//!     ├─ 4. envelope published to effect workers ──► async, later
//!     └─ 5. taps observe (action, tree, changed)       │
//!                                                      ▼
//!                                        effect dispatches follow-up
//!                                        (re-enters this pipeline)
//! ```
//!
//! # Failure Policy
//!
//! A panicking reducer rejects the dispatch as a whole: no slice is
//! committed, the prior tree is retained, and the error surfaces to the
//! dispatch caller. Subscriber and tap panics are contained and logged;
//! they cannot fail a committed dispatch.

use std::any::TypeId;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use smallvec::SmallVec;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionEnvelope, CorrelationId};
use crate::bus::{ActionBus, DEFAULT_CAPACITY};
use crate::effect::{Effect, EffectRunner, ErasedAction};
use crate::error::StoreError;
use crate::inflight::InflightTracker;
use crate::reducer::{Reducer, ReducerRunner};
use crate::selector::Selector;
use crate::state::StateTree;
use crate::tap::{StoreTap, TapRegistry};

/// Default timeout for [`Store::dispatch_and_settle`].
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// RAII marker for "this thread is inside a dispatch cycle".
///
/// Reducers are pure and subscribers run under the dispatch lock, so a
/// dispatch issued from either would deadlock on the core mutex. The
/// thread-local depth turns that deadlock into [`StoreError::ReentrantDispatch`].
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, StoreError> {
        DISPATCH_DEPTH.with(|depth| {
            if depth.get() > 0 {
                Err(StoreError::ReentrantDispatch)
            } else {
                depth.set(1);
                Ok(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(0));
    }
}

fn in_dispatch() -> bool {
    DISPATCH_DEPTH.with(|depth| depth.get() > 0)
}

type Listener = Box<dyn Fn(Arc<StateTree>) + Send + Sync>;

/// State behind the dispatch lock.
pub(crate) struct Core {
    tree: Arc<StateTree>,
    reducers: Vec<ReducerRunner>,
    listeners: BTreeMap<u64, Listener>,
    next_listener: u64,
}

/// Everything the store, its effect workers, and effect contexts share.
pub(crate) struct Shared<D> {
    core: Mutex<Core>,
    /// Committed tree, readable without contending the dispatch lock.
    snapshot: RwLock<Arc<StateTree>>,
    pub(crate) bus: ActionBus,
    pub(crate) inflight: Arc<InflightTracker>,
    /// How many effect workers want each action type; used to pre-increment
    /// the inflight count before publishing.
    interest: HashMap<TypeId, usize>,
    taps: TapRegistry,
    pub(crate) deps: Arc<D>,
}

impl<D: Send + Sync + 'static> Shared<D> {
    /// The committed state tree.
    pub(crate) fn state(&self) -> Arc<StateTree> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dispatch an already type-erased follow-up action (effects, replay).
    pub(crate) fn dispatch_erased(
        &self,
        action: ErasedAction,
        cid: CorrelationId,
    ) -> Result<(), StoreError> {
        self.dispatch_envelope(action.into_envelope(cid))
    }

    /// The serialized dispatch pipeline.
    pub(crate) fn dispatch_envelope(&self, envelope: ActionEnvelope) -> Result<(), StoreError> {
        let _depth = DepthGuard::enter()?;
        let mut core = self.core.lock().unwrap_or_else(PoisonError::into_inner);

        // 1. Fold the action through every reducer. Nothing is committed
        //    until all of them succeeded.
        let mut replaced: SmallVec<[(usize, Arc<dyn std::any::Any + Send + Sync>); 4]> =
            SmallVec::new();
        for (index, runner) in core.reducers.iter().enumerate() {
            let feature = runner.feature();
            let Some(entry) = core.tree.entry(feature) else {
                continue;
            };
            match runner.reduce(&entry.value, envelope.payload.as_ref()) {
                Ok(next) => {
                    if !Arc::ptr_eq(&entry.value, &next) {
                        replaced.push((index, next));
                    }
                }
                Err(message) => {
                    return Err(StoreError::ReducerPanicked { feature, message });
                }
            }
        }

        // 2. Commit. Untouched slices keep their identity.
        let mut changed: SmallVec<[&'static str; 4]> = SmallVec::new();
        if !replaced.is_empty() {
            let mut entries = Vec::with_capacity(replaced.len());
            for (index, next) in replaced {
                let feature = core.reducers[index].feature();
                let type_name = core
                    .tree
                    .entry(feature)
                    .map(|entry| entry.type_name)
                    .unwrap_or("unknown");
                changed.push(feature);
                entries.push((
                    feature,
                    crate::state::SliceEntry {
                        value: next,
                        type_name,
                    },
                ));
            }
            core.tree = Arc::new(core.tree.with_entries(entries));
            *self
                .snapshot
                .write()
                .unwrap_or_else(PoisonError::into_inner) = core.tree.clone();
        }
        let tree = core.tree.clone();

        debug!(
            action = envelope.type_name,
            cid = %envelope.cid,
            changed = ?changed,
            "action dispatched"
        );

        // 3. Notify subscribers in registration order. A panicking listener
        //    is contained; the dispatch already committed.
        for listener in core.listeners.values() {
            if catch_unwind(AssertUnwindSafe(|| listener(tree.clone()))).is_err() {
                warn!(action = envelope.type_name, "subscriber panicked");
            }
        }

        // 4. Publish to effect workers, pre-incrementing the inflight count
        //    so settle cannot observe a transient zero before workers pick
        //    the envelope up.
        if let Some(&workers) = self.interest.get(&envelope.type_id) {
            self.inflight.inc(envelope.cid, workers);
        }
        self.bus.publish(envelope.clone());

        // 5. Taps observe the committed dispatch.
        if !self.taps.is_empty() {
            self.taps.run_all(&envelope, &tree, &changed);
        }

        Ok(())
    }
}

/// The process-wide state container.
///
/// Built with [`StoreBuilder`]. Dropping the store (or calling
/// [`Store::teardown`]) aborts the effect workers.
///
/// # Example
///
/// ```ignore
/// let store = StoreBuilder::new(HttpDeps::new())
///     .with_feature("spinner", SpinnerReducer)
///     .with_feature("attendees", AttendeeReducer::new())
///     .with_effect(LoadAttendeesEffect)
///     .build();
///
/// store.dispatch(SpinnerAction::Start)?;
/// let spinner = store.state().slice::<SpinnerState>("spinner").unwrap();
/// assert!(spinner.is_on);
/// ```
pub struct Store<D = ()> {
    shared: Arc<Shared<D>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: Send + Sync + 'static> Store<D> {
    /// Dispatch an action under a fresh correlation ID.
    ///
    /// Synchronous; returns once reducers have committed, subscribers were
    /// notified, and the action was handed to effect workers. Never blocks
    /// on IO.
    ///
    /// # Errors
    ///
    /// [`StoreError::ReducerPanicked`] if a reducer panicked (the prior
    /// state is retained), [`StoreError::ReentrantDispatch`] if called from
    /// a reducer or subscriber.
    pub fn dispatch<A: Action>(&self, action: A) -> Result<(), StoreError> {
        self.shared.dispatch_envelope(ActionEnvelope::new_random(action))
    }

    /// Dispatch an action under a caller-supplied correlation ID.
    pub fn dispatch_with_correlation<A: Action>(
        &self,
        action: A,
        cid: CorrelationId,
    ) -> Result<(), StoreError> {
        self.shared.dispatch_envelope(ActionEnvelope::new(cid, action))
    }

    /// Dispatch an action and wait until all cascading effect work settled.
    ///
    /// Uses [`DEFAULT_SETTLE_TIMEOUT`] as the backstop.
    pub async fn dispatch_and_settle<A: Action>(&self, action: A) -> Result<(), StoreError> {
        self.dispatch_and_settle_timeout(action, DEFAULT_SETTLE_TIMEOUT)
            .await
    }

    /// Dispatch an action and wait, with an explicit timeout, until every
    /// effect triggered by it (transitively) has completed.
    ///
    /// Settling says nothing about effect success: failures come back as
    /// actions and will have been dispatched by the time this returns.
    pub async fn dispatch_and_settle_timeout<A: Action>(
        &self,
        action: A,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let cid = CorrelationId::new();
        self.dispatch_with_correlation(action, cid)?;
        match tokio::time::timeout(timeout, self.shared.inflight.wait_zero(cid)).await {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::SettleTimeout { cid, timeout }),
        }
    }

    /// The committed state tree.
    ///
    /// Cheap and safe to call from anywhere, including subscribers and
    /// effects.
    pub fn state(&self) -> Arc<StateTree> {
        self.shared.state()
    }

    /// Select a derived value from a feature slice through a memoized
    /// selector.
    pub fn select<S, T>(
        &self,
        feature: &str,
        selector: &Selector<S, T>,
    ) -> Result<Arc<T>, StoreError>
    where
        S: Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let slice = self.state().try_slice::<S>(feature)?;
        Ok(selector.select(&slice))
    }

    /// Register a listener invoked with the tree after every dispatch.
    ///
    /// Listeners are called in registration order, under the dispatch lock.
    /// They must be cheap and must not call back into the store; dispatching
    /// from a listener yields [`StoreError::ReentrantDispatch`].
    ///
    /// The returned [`Subscription`] deregisters on drop; call
    /// [`Subscription::detach`] to keep the listener for the life of the
    /// store.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a dispatch cycle.
    pub fn subscribe(&self, listener: impl Fn(Arc<StateTree>) + Send + Sync + 'static) -> Subscription {
        assert!(
            !in_dispatch(),
            "subscribe must not be called from inside a dispatch cycle"
        );
        let mut core = self.shared.core.lock().unwrap_or_else(PoisonError::into_inner);
        let id = core.next_listener;
        core.next_listener += 1;
        core.listeners.insert(id, Box::new(listener));
        drop(core);

        let shared = Arc::downgrade(&self.shared);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    let mut core = shared.core.lock().unwrap_or_else(PoisonError::into_inner);
                    core.listeners.remove(&id);
                }
            })),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    /// Shared effect dependencies.
    pub fn deps(&self) -> &D {
        &self.shared.deps
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<D>> {
        &self.shared
    }
}

impl<D> Store<D> {
    /// Stop the effect workers.
    ///
    /// Dispatch keeps working afterwards, but no effect reacts anymore.
    /// Called automatically on drop.
    pub fn teardown(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.is_empty() {
            return;
        }
        for worker in workers.drain(..) {
            worker.abort();
        }
        info!("store effect workers stopped");
    }
}

impl<D> Drop for Store<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<D> std::fmt::Debug for Store<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Deregistration handle returned by [`Store::subscribe`].
///
/// Dropping it removes the listener. Must not be dropped from inside a
/// listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the listener registered for the life of the store.
    pub fn detach(mut self) {
        self.cancel.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Builder assembling reducers, effects, and taps into a [`Store`].
///
/// # Example
///
/// ```ignore
/// let log = Arc::new(ActionLog::new());
/// let store = StoreBuilder::new(deps)
///     .with_feature("spinner", SpinnerReducer)
///     .with_effect(LoadAttendeesEffect)
///     .with_tap(log.clone(), "action_log")
///     .build();
/// ```
pub struct StoreBuilder<D = ()> {
    deps: D,
    reducers: Vec<ReducerRunner>,
    effects: Vec<EffectRunner<D>>,
    taps: TapRegistry,
    capacity: usize,
}

impl<D: Send + Sync + 'static> StoreBuilder<D> {
    /// Start a builder with the dependencies effects will receive.
    pub fn new(deps: D) -> Self {
        Self {
            deps,
            reducers: Vec::new(),
            effects: Vec::new(),
            taps: TapRegistry::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Register a reducer under a feature name.
    ///
    /// # Panics
    ///
    /// Panics if the feature name is already registered. Use
    /// [`StoreBuilder::try_with_feature`] for a non-panicking version.
    pub fn with_feature<R: Reducer>(self, feature: &'static str, reducer: R) -> Self {
        self.try_with_feature(feature, reducer).unwrap_or_else(|error| {
            panic!("{}", error);
        })
    }

    /// Register a reducer under a feature name, rejecting duplicates.
    pub fn try_with_feature<R: Reducer>(
        mut self,
        feature: &'static str,
        reducer: R,
    ) -> Result<Self, StoreError> {
        if self.reducers.iter().any(|runner| runner.feature() == feature) {
            return Err(StoreError::FeatureAlreadyRegistered { feature });
        }
        self.reducers.push(ReducerRunner::new(feature, reducer));
        Ok(self)
    }

    /// Register an effect. Its policy and name come from the trait impl.
    pub fn with_effect<E: Effect<D>>(mut self, effect: E) -> Self {
        self.effects.push(EffectRunner::new(effect));
        self
    }

    /// Register a tap under a display name.
    pub fn with_tap<T: StoreTap>(mut self, tap: T, name: &'static str) -> Self {
        self.taps.register(tap, name);
        self
    }

    /// Capacity of the internal action bus (how far effect workers may fall
    /// behind before missing actions).
    pub fn bus_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Build the store and spawn one worker task per registered effect.
    ///
    /// # Panics
    ///
    /// Building a store with effects must happen inside a Tokio runtime,
    /// because the workers are spawned here. A store without effects works
    /// anywhere.
    pub fn build(self) -> Store<D> {
        let tree = Arc::new(StateTree::from_entries(
            self.reducers
                .iter()
                .map(|runner| (runner.feature(), runner.initial_entry())),
        ));

        let mut interest: HashMap<TypeId, usize> = HashMap::new();
        for effect in &self.effects {
            *interest.entry(effect.input_type()).or_insert(0) += 1;
        }

        let feature_count = self.reducers.len();
        let effect_count = self.effects.len();

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                tree: tree.clone(),
                reducers: self.reducers,
                listeners: BTreeMap::new(),
                next_listener: 0,
            }),
            snapshot: RwLock::new(tree),
            bus: ActionBus::with_capacity(self.capacity),
            inflight: Arc::new(InflightTracker::new()),
            interest,
            taps: self.taps,
            deps: Arc::new(self.deps),
        });

        // Subscribe before spawning so a dispatch issued right after
        // build() cannot race past a worker that has not subscribed yet.
        let workers = self
            .effects
            .into_iter()
            .map(|runner| {
                let receiver = shared.bus.subscribe();
                tokio::spawn(runner.run(shared.clone(), receiver))
            })
            .collect();

        info!(
            features = feature_count,
            effects = effect_count,
            "store built"
        );

        Store {
            shared,
            workers: Mutex::new(workers),
        }
    }
}

impl<D> std::fmt::Debug for StoreBuilder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("features", &self.reducers.len())
            .field("effects", &self.effects.len())
            .field("taps", &self.taps.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[derive(Debug, Clone, PartialEq)]
    struct CounterState {
        count: i32,
    }

    #[derive(Debug, Clone)]
    enum CounterAction {
        Increment,
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = CounterState;
        type Action = CounterAction;

        fn initial(&self) -> CounterState {
            CounterState { count: 0 }
        }

        fn reduce(&self, state: Arc<CounterState>, action: &CounterAction) -> Arc<CounterState> {
            match action {
                CounterAction::Increment => Arc::new(CounterState {
                    count: state.count + 1,
                }),
            }
        }
    }

    fn two_feature_store() -> Store {
        StoreBuilder::new(())
            .with_feature("spinner", SpinnerReducer)
            .with_feature("counter", CounterReducer)
            .build()
    }

    #[test]
    fn test_initial_state_from_reducers() {
        let store = two_feature_store();
        let tree = store.state();

        assert_eq!(
            *tree.slice::<SpinnerState>("spinner").unwrap(),
            SpinnerState { is_on: false }
        );
        assert_eq!(
            *tree.slice::<CounterState>("counter").unwrap(),
            CounterState { count: 0 }
        );
    }

    #[test]
    fn test_dispatch_updates_only_matching_slice() {
        let store = two_feature_store();
        let before = store.state();

        store.dispatch(SpinnerAction::Start).unwrap();
        let after = store.state();

        assert!(after.slice::<SpinnerState>("spinner").unwrap().is_on);

        // The counter slice kept its identity.
        let counter_before = before.slice::<CounterState>("counter").unwrap();
        let counter_after = after.slice::<CounterState>("counter").unwrap();
        assert!(Arc::ptr_eq(&counter_before, &counter_after));
    }

    #[test]
    fn test_unrecognized_action_preserves_tree_identity() {
        #[derive(Debug, Clone)]
        struct ForeignAction;

        let store = two_feature_store();
        let before = store.state();

        store.dispatch(ForeignAction).unwrap();
        let after = store.state();

        assert!(Arc::ptr_eq(&before, &after), "no-op dispatch must keep the tree");
    }

    #[test]
    fn test_subscribers_notified_in_registration_order() {
        let store = two_feature_store();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        let _sub_a = store.subscribe(move |_| order_a.lock().unwrap().push("a"));
        let order_b = order.clone();
        let _sub_b = store.subscribe(move |_| order_b.lock().unwrap().push("b"));

        store.dispatch(SpinnerAction::Start).unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_subscription_drop_deregisters() {
        let store = two_feature_store();
        let seen = Arc::new(Mutex::new(0));

        let seen_in_listener = seen.clone();
        let subscription = store.subscribe(move |_| *seen_in_listener.lock().unwrap() += 1);
        assert_eq!(store.listener_count(), 1);

        store.dispatch(SpinnerAction::Start).unwrap();
        drop(subscription);
        assert_eq!(store.listener_count(), 0);

        store.dispatch(SpinnerAction::Stop).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_subscription_unsubscribe_and_detach() {
        let store = two_feature_store();

        let sub = store.subscribe(|_| {});
        sub.unsubscribe();
        assert_eq!(store.listener_count(), 0);

        store.subscribe(|_| {}).detach();
        assert_eq!(store.listener_count(), 1);
    }

    #[test]
    fn test_reducer_panic_rejects_dispatch_and_keeps_state() {
        #[derive(Debug, Clone)]
        struct Explode;

        struct ExplosiveReducer;

        impl Reducer for ExplosiveReducer {
            type State = CounterState;
            type Action = Explode;

            fn initial(&self) -> CounterState {
                CounterState { count: 0 }
            }

            fn reduce(&self, _state: Arc<CounterState>, _action: &Explode) -> Arc<CounterState> {
                panic!("kaboom");
            }
        }

        let store = StoreBuilder::new(())
            .with_feature("counter", CounterReducer)
            .with_feature("explosive", ExplosiveReducer)
            .build();

        store.dispatch(CounterAction::Increment).unwrap();
        let before = store.state();

        let result = store.dispatch(Explode);
        match result {
            Err(StoreError::ReducerPanicked { feature, message }) => {
                assert_eq!(feature, "explosive");
                assert!(message.contains("kaboom"));
            }
            other => panic!("expected ReducerPanicked, got {:?}", other),
        }

        // Prior state retained wholesale.
        let after = store.state();
        assert!(Arc::ptr_eq(&before, &after));

        // The store still works.
        store.dispatch(CounterAction::Increment).unwrap();
        assert_eq!(
            store.state().slice::<CounterState>("counter").unwrap().count,
            2
        );
    }

    #[test]
    fn test_dispatch_from_subscriber_is_rejected() {
        let store = Arc::new(two_feature_store());
        let result = Arc::new(Mutex::new(None));

        let store_in_listener = Arc::downgrade(&store);
        let result_in_listener = result.clone();
        store
            .subscribe(move |_| {
                if let Some(store) = store_in_listener.upgrade() {
                    let outcome = store.dispatch(CounterAction::Increment);
                    *result_in_listener.lock().unwrap() = Some(outcome);
                }
            })
            .detach();

        store.dispatch(SpinnerAction::Start).unwrap();

        let outcome = result.lock().unwrap().take().expect("listener ran");
        assert!(matches!(outcome, Err(StoreError::ReentrantDispatch)));
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let result = StoreBuilder::new(())
            .try_with_feature("spinner", SpinnerReducer)
            .and_then(|builder| builder.try_with_feature("spinner", SpinnerReducer));

        assert!(matches!(
            result,
            Err(StoreError::FeatureAlreadyRegistered { feature: "spinner" })
        ));
    }

    #[test]
    fn test_select_through_store() {
        let store = two_feature_store();
        let doubled = Selector::new(|s: &CounterState| s.count * 2);

        store.dispatch(CounterAction::Increment).unwrap();
        assert_eq!(*store.select("counter", &doubled).unwrap(), 2);

        assert!(matches!(
            store.select("nope", &doubled),
            Err(StoreError::UnknownFeature { .. })
        ));
    }

    #[test]
    fn test_replay_determinism() {
        let actions = [
            SpinnerAction::Start,
            SpinnerAction::Stop,
            SpinnerAction::Start,
        ];

        let run = || {
            let store = two_feature_store();
            for action in actions.iter().cloned() {
                store.dispatch(action).unwrap();
            }
            store.dispatch(CounterAction::Increment).unwrap();
            let tree = store.state();
            (
                tree.slice::<SpinnerState>("spinner").unwrap().is_on,
                tree.slice::<CounterState>("counter").unwrap().count,
            )
        };

        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn test_settle_without_effects_is_immediate() {
        let store = two_feature_store();
        store
            .dispatch_and_settle(SpinnerAction::Start)
            .await
            .unwrap();
        assert!(store.state().slice::<SpinnerState>("spinner").unwrap().is_on);
    }

    #[test]
    fn test_spinner_scenario_produces_distinct_objects() {
        let store = two_feature_store();

        store.dispatch(SpinnerAction::Start).unwrap();
        let on = store.state().slice::<SpinnerState>("spinner").unwrap();
        assert_eq!(*on, SpinnerState { is_on: true });

        store.dispatch(SpinnerAction::Stop).unwrap();
        let off = store.state().slice::<SpinnerState>("spinner").unwrap();
        assert_eq!(*off, SpinnerState { is_on: false });

        assert!(!Arc::ptr_eq(&on, &off));
    }
}
