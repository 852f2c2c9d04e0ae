//! Effect trait, context, and the per-effect worker.
//!
//! Effects bridge side-effecting operations into the pure dispatch cycle.
//! Each registered effect gets its own worker task that observes the stream
//! of committed actions, filters for its input type, runs the asynchronous
//! operation, and dispatches a follow-up action with the outcome. The
//! dispatch path itself never blocks on an effect.
//!
//! # Key Properties
//!
//! - **Stateless**: actions carry all needed data; dependencies come from
//!   the context
//! - **Return actions**: effects return their follow-up action; the worker
//!   is the sole dispatcher
//! - **Failures become data**: an error is converted into a failure action,
//!   never thrown across the effect boundary
//!
//! # Concurrency Policies
//!
//! The policy decides what happens when a new trigger arrives while a
//! previous one is still running. This is the most consequential
//! correctness decision in the pattern: the wrong choice causes stale
//! responses overwriting fresher ones, or requests being dropped.
//!
//! | Policy    | Overlapping trigger                                  |
//! |-----------|------------------------------------------------------|
//! | `Switch`  | cancels the in-flight run; its result is discarded   |
//! | `Concat`  | queues; runs one at a time in arrival order          |
//! | `Merge`   | runs concurrently; no ordering among completions     |
//! | `Exhaust` | is dropped until the in-flight run completes         |

use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::action::{Action, ActionEnvelope, CorrelationId};
use crate::error::EffectFailed;
use crate::inflight::InflightGuard;
use crate::reducer::panic_message;
use crate::state::StateTree;
use crate::store::Shared;

/// How an effect handles a trigger that overlaps an in-flight run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Cancel the in-flight run; only the newest trigger's result is ever
    /// dispatched. Use for queries where a stale response is worse than a
    /// wasted request (typeahead, reloads).
    Switch,
    /// Run one at a time in arrival order. Use when responses must be
    /// applied in trigger order.
    Concat,
    /// Run all triggers concurrently. No ordering promise among
    /// completions. Use for independent writes.
    Merge,
    /// Ignore new triggers until the in-flight run completes. Use to
    /// debounce non-idempotent operations (submit buttons).
    Exhaust,
}

/// Context passed to effect handlers.
///
/// `EffectContext` is immutable and cheap to clone; clones are semantically
/// identical. It is intentionally narrow: effects can read dependencies and
/// the committed state snapshot, and that is all. Effects do not get a
/// dispatch handle; they *return* their follow-up action and the worker
/// dispatches it.
pub struct EffectContext<D> {
    shared: Arc<Shared<D>>,
    cid: CorrelationId,
}

impl<D: Send + Sync + 'static> EffectContext<D> {
    pub(crate) fn new(shared: Arc<Shared<D>>, cid: CorrelationId) -> Self {
        Self { shared, cid }
    }

    /// Shared dependencies: HTTP clients, database pools, configuration.
    pub fn deps(&self) -> &D {
        &self.shared.deps
    }

    /// The committed state tree at the time of the call.
    ///
    /// This is a snapshot; it does not change under the effect while it
    /// runs.
    pub fn state(&self) -> Arc<StateTree> {
        self.shared.state()
    }

    /// The correlation ID of the triggering action.
    ///
    /// The worker dispatches the follow-up action under the same ID, which
    /// is what `Store::dispatch_and_settle` relies on.
    pub fn correlation_id(&self) -> CorrelationId {
        self.cid
    }
}

impl<D> Clone for EffectContext<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            cid: self.cid,
        }
    }
}

impl<D> std::fmt::Debug for EffectContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectContext")
            .field("cid", &self.cid)
            .finish_non_exhaustive()
    }
}

/// An asynchronous side-effect coordinator.
///
/// The worker clones the triggering action out of the envelope, runs
/// `run`, and dispatches the returned action. On error it dispatches the
/// result of [`Effect::map_error`], or a generic [`EffectFailed`] when
/// `map_error` declines.
///
/// Workers filter by the `Input` *type*. When `Input` is a feature's whole
/// action enum, `run` must return `Ok(None)` for the variants it does not
/// react to; returning the action it was triggered by would dispatch it
/// again and loop forever.
///
/// # Example
///
/// ```ignore
/// struct LoadAttendeesEffect;
///
/// #[async_trait]
/// impl Effect<HttpDeps> for LoadAttendeesEffect {
///     type Input = AttendeeAction;
///     type Output = AttendeeAction;
///
///     async fn run(&self, action: AttendeeAction, ctx: EffectContext<HttpDeps>) -> Result<Option<AttendeeAction>> {
///         match action {
///             AttendeeAction::Load => {
///                 let attendees = ctx.deps().api.fetch_attendees().await?;
///                 Ok(Some(AttendeeAction::LoadSucceeded { attendees }))
///             }
///             _ => Ok(None),
///         }
///     }
///
///     fn policy(&self) -> ConcurrencyPolicy {
///         ConcurrencyPolicy::Switch
///     }
///
///     fn map_error(&self, error: &anyhow::Error) -> Option<AttendeeAction> {
///         Some(AttendeeAction::LoadFailed { message: error.to_string() })
///     }
/// }
/// ```
#[async_trait]
pub trait Effect<D>: Send + Sync + 'static {
    /// The action type that triggers this effect.
    type Input: Action + Clone;

    /// The follow-up action type this effect dispatches.
    type Output: Action;

    /// Execute the asynchronous operation for one trigger.
    ///
    /// Return `Ok(Some(action))` to dispatch a follow-up, `Ok(None)` when
    /// the trigger needs no reaction.
    ///
    /// # Errors
    ///
    /// Return `Err` if the operation fails. The worker converts errors into
    /// actions; they never propagate as exceptions.
    async fn run(&self, action: Self::Input, ctx: EffectContext<D>)
        -> Result<Option<Self::Output>>;

    /// The concurrency policy for overlapping triggers.
    fn policy(&self) -> ConcurrencyPolicy {
        ConcurrencyPolicy::Merge
    }

    /// Display name for logs and failure actions.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Map an error to a domain failure action.
    ///
    /// Return `None` to fall back to the generic [`EffectFailed`] action.
    fn map_error(&self, error: &anyhow::Error) -> Option<Self::Output> {
        let _ = error;
        None
    }
}

/// A follow-up action with its typing erased, ready to dispatch.
pub(crate) struct ErasedAction {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl ErasedAction {
    pub fn of<A: Action>(action: A) -> Self {
        Self {
            type_id: TypeId::of::<A>(),
            type_name: std::any::type_name::<A>(),
            payload: Arc::new(action),
        }
    }

    pub(crate) fn into_envelope(self, cid: CorrelationId) -> ActionEnvelope {
        ActionEnvelope::from_parts(cid, self.type_id, self.type_name, self.payload)
    }
}

/// Type-erased effect trait for internal use.
#[async_trait]
trait AnyEffect<D>: Send + Sync {
    async fn run_any(
        &self,
        payload: Arc<dyn Any + Send + Sync>,
        ctx: EffectContext<D>,
    ) -> Result<Option<ErasedAction>>;

    fn map_error_any(&self, error: &anyhow::Error) -> Option<ErasedAction>;
}

/// Wrapper making a concrete effect implement `AnyEffect`.
struct EffectWrapper<E> {
    effect: E,
}

#[async_trait]
impl<D, E> AnyEffect<D> for EffectWrapper<E>
where
    D: Send + Sync + 'static,
    E: Effect<D>,
{
    async fn run_any(
        &self,
        payload: Arc<dyn Any + Send + Sync>,
        ctx: EffectContext<D>,
    ) -> Result<Option<ErasedAction>> {
        let action = payload
            .downcast_ref::<E::Input>()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "action type mismatch: expected {}",
                    std::any::type_name::<E::Input>()
                )
            })?
            .clone();
        let output = self.effect.run(action, ctx).await?;
        Ok(output.map(ErasedAction::of))
    }

    fn map_error_any(&self, error: &anyhow::Error) -> Option<ErasedAction> {
        self.effect.map_error(error).map(ErasedAction::of)
    }
}

/// Generation counter shared between a switch-policy worker and its tasks.
///
/// The worker bumps it when a new trigger supersedes the in-flight run; a
/// task dispatches its result only while its own generation is current, and
/// the check happens under the lock so supersession and dispatch cannot
/// interleave.
type SwitchGen = Arc<Mutex<u64>>;

/// Per-effect worker: subscribes to the action bus and applies the policy.
pub(crate) struct EffectRunner<D> {
    effect: Arc<dyn AnyEffect<D>>,
    input_type: TypeId,
    name: &'static str,
    policy: ConcurrencyPolicy,
}

impl<D: Send + Sync + 'static> EffectRunner<D> {
    pub fn new<E: Effect<D>>(effect: E) -> Self {
        let name = effect.name();
        let policy = effect.policy();
        Self {
            effect: Arc::new(EffectWrapper { effect }),
            input_type: TypeId::of::<E::Input>(),
            name,
            policy,
        }
    }

    pub fn input_type(&self) -> TypeId {
        self.input_type
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The worker loop. Runs until the store is torn down.
    ///
    /// The receiver is subscribed by the builder before the worker is
    /// spawned, so a dispatch immediately after `build()` cannot be missed.
    pub async fn run(self, shared: Arc<Shared<D>>, mut rx: broadcast::Receiver<ActionEnvelope>) {
        debug!(effect = self.name, policy = ?self.policy, "effect worker started");

        let switch_gen: SwitchGen = Arc::new(Mutex::new(0));
        let mut current: Option<JoinHandle<()>> = None;

        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if envelope.type_id != self.input_type {
                        continue;
                    }
                    // The store pre-incremented one unit for this worker;
                    // the guard releases it on every path, including abort.
                    let guard = InflightGuard::new(shared.inflight.clone(), envelope.cid);

                    match self.policy {
                        ConcurrencyPolicy::Merge => {
                            // Fire-and-forget: completions are independent.
                            let _ = self.spawn(shared.clone(), envelope, guard, None);
                        }
                        ConcurrencyPolicy::Concat => {
                            // Await inline: the bus buffers the queue and
                            // arrival order is preserved.
                            execute_one(
                                self.effect.clone(),
                                self.name,
                                shared.clone(),
                                envelope,
                                guard,
                                None,
                            )
                            .await;
                        }
                        ConcurrencyPolicy::Switch => {
                            let my_gen = {
                                let mut generation = lock_gen(&switch_gen);
                                *generation += 1;
                                *generation
                            };
                            if let Some(handle) = current.take() {
                                handle.abort();
                            }
                            current = Some(self.spawn(
                                shared.clone(),
                                envelope,
                                guard,
                                Some((switch_gen.clone(), my_gen)),
                            ));
                        }
                        ConcurrencyPolicy::Exhaust => {
                            let busy = current.as_ref().is_some_and(|handle| !handle.is_finished());
                            if busy {
                                trace!(effect = self.name, "exhaust policy dropped trigger");
                                drop(guard);
                            } else {
                                current = Some(self.spawn(shared.clone(), envelope, guard, None));
                            }
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(effect = self.name, missed, "effect worker lagged, missed actions");
                }
                Err(RecvError::Closed) => break,
            }
        }

        debug!(effect = self.name, "effect worker stopped");
    }

    fn spawn(
        &self,
        shared: Arc<Shared<D>>,
        envelope: ActionEnvelope,
        guard: InflightGuard,
        switch: Option<(SwitchGen, u64)>,
    ) -> JoinHandle<()> {
        let effect = self.effect.clone();
        let name = self.name;
        tokio::spawn(execute_one(effect, name, shared, envelope, guard, switch))
    }
}

impl<D> std::fmt::Debug for EffectRunner<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRunner")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn lock_gen(generation: &SwitchGen) -> std::sync::MutexGuard<'_, u64> {
    generation.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one trigger through an effect and dispatch the outcome.
async fn execute_one<D: Send + Sync + 'static>(
    effect: Arc<dyn AnyEffect<D>>,
    name: &'static str,
    shared: Arc<Shared<D>>,
    envelope: ActionEnvelope,
    guard: InflightGuard,
    switch: Option<(SwitchGen, u64)>,
) {
    let cid = envelope.cid;
    let ctx = EffectContext::new(shared.clone(), cid);

    // AssertUnwindSafe is required because the effect future is not
    // UnwindSafe; the effect is stateless so nothing observes a broken
    // invariant afterwards.
    let outcome = match AssertUnwindSafe(effect.run_any(envelope.payload.clone(), ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic_info) => Err(anyhow::anyhow!(
            "effect '{}' panicked: {}",
            name,
            panic_message(panic_info.as_ref())
        )),
    };

    let follow_up = match outcome {
        Ok(action) => action,
        Err(error) => {
            error!(effect = name, %cid, error = %error, "effect failed");
            Some(effect.map_error_any(&error).unwrap_or_else(|| {
                ErasedAction::of(EffectFailed {
                    effect: name,
                    message: error.to_string(),
                    cid,
                })
            }))
        }
    };

    if let Some(follow_up) = follow_up {
        let dispatched = match switch {
            Some((generation, my_gen)) => {
                // Hold the generation lock across dispatch so a superseding
                // trigger cannot slip between the check and the dispatch.
                let generation = lock_gen(&generation);
                if *generation == my_gen {
                    Some(shared.dispatch_erased(follow_up, cid))
                } else {
                    debug!(effect = name, %cid, "discarding superseded effect result");
                    None
                }
            }
            None => Some(shared.dispatch_erased(follow_up, cid)),
        };

        if let Some(Err(error)) = dispatched {
            error!(effect = name, %cid, error = %error, "follow-up dispatch failed");
        }
    }

    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_default_is_merge() {
        struct DefaultEffect;

        #[derive(Debug, Clone)]
        struct Ping;

        #[async_trait]
        impl Effect<()> for DefaultEffect {
            type Input = Ping;
            type Output = Ping;

            async fn run(&self, action: Ping, _ctx: EffectContext<()>) -> Result<Option<Ping>> {
                Ok(Some(action))
            }
        }

        assert_eq!(DefaultEffect.policy(), ConcurrencyPolicy::Merge);
        assert!(DefaultEffect.name().contains("DefaultEffect"));
        assert!(DefaultEffect.map_error(&anyhow::anyhow!("x")).is_none());
    }

    #[test]
    fn test_erased_action_round_trip() {
        #[derive(Debug, Clone, PartialEq)]
        struct Done {
            value: i32,
        }

        let erased = ErasedAction::of(Done { value: 3 });
        assert_eq!(erased.type_id, TypeId::of::<Done>());
        assert!(erased.type_name.ends_with("Done"));

        let envelope = erased.into_envelope(CorrelationId::NONE);
        assert_eq!(envelope.downcast_ref::<Done>(), Some(&Done { value: 3 }));
        assert!(envelope.cid.is_none());
    }

    #[test]
    fn test_runner_captures_declared_types() {
        struct TypedEffect;

        #[derive(Debug, Clone)]
        struct In;
        #[derive(Debug, Clone)]
        struct Out;

        #[async_trait]
        impl Effect<()> for TypedEffect {
            type Input = In;
            type Output = Out;

            async fn run(&self, _action: In, _ctx: EffectContext<()>) -> Result<Option<Out>> {
                Ok(Some(Out))
            }

            fn policy(&self) -> ConcurrencyPolicy {
                ConcurrencyPolicy::Exhaust
            }

            fn name(&self) -> &'static str {
                "typed_effect"
            }
        }

        let runner = EffectRunner::new(TypedEffect);
        assert_eq!(runner.input_type(), TypeId::of::<In>());
        assert_eq!(runner.name(), "typed_effect");
        assert_eq!(runner.policy, ConcurrencyPolicy::Exhaust);
    }
}
