//! Core action types for the millrace state container.
//!
//! # Overview
//!
//! An action is an immutable, uniquely tagged message describing something
//! that happened. Actions are the only input to the store: reducers fold them
//! into state, effects react to them with IO, taps observe them after commit.
//!
//! Actions travel through the store type-erased, wrapped in an
//! [`ActionEnvelope`] that carries a [`CorrelationId`] plus the payload's
//! `TypeId`. Reducers and effects restore static typing at their boundary by
//! downcasting, so domain action enums stay clean of transport concerns.
//!
//! # Correlation
//!
//! Every dispatch carries a correlation ID. Follow-up actions dispatched by
//! effects propagate the triggering action's ID, which is what allows
//! `Store::dispatch_and_settle` to wait for all cascading work.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// A tagged message describing an event, dispatched to the store.
///
/// Actions are immutable once created. They contain no IO and no behavior;
/// reducers interpret them synchronously and effects interpret them
/// asynchronously.
///
/// **Note**: This trait is automatically implemented for any type that is
/// `Clone + Send + Sync + 'static`. You don't need to implement it manually.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone)]
/// enum AttendeeAction {
///     Load,
///     LoadSucceeded { attendees: Vec<Attendee> },
///     LoadFailed { message: String },
/// }
/// // Action is automatically implemented.
/// ```
pub trait Action: Any + Send + Sync + 'static {}

// Blanket implementation for any type that meets the requirements
impl<T: Clone + Send + Sync + 'static> Action for T {}

/// Correlation ID for tracking an action and all the work it cascades into.
///
/// Each dispatch is tagged with a correlation ID. Effects dispatch their
/// follow-up actions with the same ID, so the store can answer "has all
/// asynchronous work triggered by this dispatch finished?".
///
/// Use `CorrelationId::NONE` for uncorrelated actions, or
/// `CorrelationId::new()` to generate a fresh ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Sentinel value for uncorrelated actions.
    ///
    /// Uses nil UUID (`00000000-0000-0000-0000-000000000000`).
    pub const NONE: Self = Self(Uuid::nil());

    /// Create a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Check if this is the NONE sentinel value.
    pub fn is_none(&self) -> bool {
        self.0.is_nil()
    }

    /// Check if this is a real correlation ID (not NONE).
    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CorrelationId> for Uuid {
    fn from(cid: CorrelationId) -> Uuid {
        cid.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Envelope wrapping an action with transport metadata.
///
/// `ActionEnvelope` is the internal transport format for dispatched actions.
/// It carries:
/// - The correlation ID for tracking cascading work
/// - The type ID and type name of the payload
/// - The action payload itself
///
/// Domain action enums remain clean - correlation is transport-level metadata.
#[derive(Clone)]
pub struct ActionEnvelope {
    /// Correlation ID for tracking cascading work
    pub cid: CorrelationId,
    /// Type ID of the payload action
    pub type_id: TypeId,
    /// Type name of the payload action, for logs and the devtools log
    pub type_name: &'static str,
    /// The actual action payload
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl ActionEnvelope {
    /// Create a new action envelope.
    pub fn new<A: Action>(cid: CorrelationId, action: A) -> Self {
        Self {
            cid,
            type_id: TypeId::of::<A>(),
            type_name: std::any::type_name::<A>(),
            payload: Arc::new(action),
        }
    }

    /// Create an envelope with a new random correlation ID.
    pub fn new_random<A: Action>(action: A) -> Self {
        Self::new(CorrelationId::new(), action)
    }

    /// Rebuild an envelope from already type-erased parts.
    ///
    /// Used by the devtools log to replay recorded payloads.
    pub(crate) fn from_parts(
        cid: CorrelationId,
        type_id: TypeId,
        type_name: &'static str,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            cid,
            type_id,
            type_name,
            payload,
        }
    }

    /// Downcast the payload to a concrete action type.
    pub fn downcast_ref<A: Any>(&self) -> Option<&A> {
        self.payload.downcast_ref()
    }
}

impl fmt::Debug for ActionEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEnvelope")
            .field("cid", &self.cid)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionMatch - Ergonomic action matching
// ─────────────────────────────────────────────────────────────────────────────

/// Ergonomic wrapper for matching actions in an envelope.
///
/// Provides a cleaner API for downcasting action envelopes without
/// verbose `downcast_ref` calls scattered through tap and test code.
///
/// # Example
///
/// ```ignore
/// use millrace::ActionMatch;
///
/// let label = ActionMatch::new(&envelope)
///     .try_match(|a: &SpinnerAction| match a {
///         SpinnerAction::Start => Some("spinner on"),
///         SpinnerAction::Stop => Some("spinner off"),
///     })
///     .or_try(|_: &AttendeeAction| Some("attendees"))
///     .result();
/// ```
pub struct ActionMatch<'a> {
    env: &'a ActionEnvelope,
}

impl<'a> ActionMatch<'a> {
    /// Create a new action matcher.
    pub fn new(env: &'a ActionEnvelope) -> Self {
        Self { env }
    }

    /// Try to downcast to a specific action type.
    pub fn action<A: 'static>(&self) -> Option<&A> {
        self.env.downcast_ref::<A>()
    }

    /// Check if the envelope contains this action type.
    pub fn is<A: 'static>(&self) -> bool {
        self.env.type_id == TypeId::of::<A>()
    }

    /// Try to extract and map an action type.
    pub fn map<A: 'static, T>(&self, f: impl FnOnce(&A) -> T) -> Option<T> {
        self.action::<A>().map(f)
    }

    /// Start a match chain with the first action type to try.
    pub fn try_match<A: 'static, T>(&self, f: impl FnOnce(&A) -> Option<T>) -> MatchChain<'a, T> {
        MatchChain {
            env: self.env,
            result: self.action::<A>().and_then(f),
        }
    }
}

/// A chain of action type matches.
///
/// Created by [`ActionMatch::try_match`] and extended with [`MatchChain::or_try`].
pub struct MatchChain<'a, T> {
    env: &'a ActionEnvelope,
    result: Option<T>,
}

impl<'a, T> MatchChain<'a, T> {
    /// Try another action type if the previous didn't match.
    pub fn or_try<A: 'static>(self, f: impl FnOnce(&A) -> Option<T>) -> Self {
        if self.result.is_some() {
            return self;
        }
        Self {
            env: self.env,
            result: self.env.downcast_ref::<A>().and_then(f),
        }
    }

    /// Get the match result.
    pub fn result(self) -> Option<T> {
        self.result
    }
}
