//! Normalized collection management.
//!
//! An [`EntityState`] stores uniquely identified records as an ordered id
//! list plus an id-to-record map, giving O(1) lookup while preserving a
//! caller-visible ordering. An [`EntityAdapter`] provides the pure mutation
//! operations reducers use to produce the next collection.
//!
//! # Invariant
//!
//! `ids` contains exactly the keys present in `entities`, with no
//! duplicates. Every operation in this module preserves that bijection.
//!
//! # Ordering
//!
//! An adapter built with [`EntityAdapter::new`] keeps insertion order; one
//! built with [`EntityAdapter::sorted_by`] keeps the comparator's order, and
//! applies it consistently across every mutating operation, including
//! updates that change a record's sort key.
//!
//! # Identity
//!
//! Operations take `&Arc<EntityState<E>>` and return `Arc<EntityState<E>>`.
//! A no-op (adding a duplicate, removing an absent id, updating an absent
//! id) returns the input `Arc` unchanged, so reducers built on the adapter
//! keep the identity-preserving contract for free.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// A record with a unique identifier.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq)]
/// struct Attendee {
///     id: u64,
///     name: String,
/// }
///
/// impl Entity for Attendee {
///     type Id = u64;
///
///     fn id(&self) -> u64 {
///         self.id
///     }
/// }
/// ```
pub trait Entity: Clone + Send + Sync + 'static {
    /// The identifier type.
    type Id: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static;

    /// The record's identifier.
    fn id(&self) -> Self::Id;
}

/// A normalized collection: ordered ids plus an id-to-record map.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState<E: Entity> {
    ids: Vec<E::Id>,
    entities: HashMap<E::Id, E>,
}

impl<E: Entity> EntityState<E> {
    /// The empty collection.
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            entities: HashMap::new(),
        }
    }

    /// The ids in collection order.
    pub fn ids(&self) -> &[E::Id] {
        &self.ids
    }

    /// The id-to-record map.
    pub fn entities(&self) -> &HashMap<E::Id, E> {
        &self.entities
    }

    /// Look up a record by id.
    pub fn get(&self, id: &E::Id) -> Option<&E> {
        self.entities.get(id)
    }

    /// True if a record with this id is present.
    pub fn contains(&self, id: &E::Id) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate records in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.ids.iter().map(|id| &self.entities[id])
    }
}

impl<E: Entity> Default for EntityState<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A patch to apply to one record, identified by id.
///
/// The `changes` closure receives the record by mutable reference. Patches
/// may change any field, including the id; the adapter re-keys the map when
/// they do.
pub struct Update<E: Entity> {
    /// The id of the record to patch.
    pub id: E::Id,
    /// The patch itself.
    pub changes: Box<dyn FnOnce(&mut E) + Send>,
}

impl<E: Entity> Update<E> {
    /// Build a patch for the record with the given id.
    pub fn new(id: E::Id, changes: impl FnOnce(&mut E) + Send + 'static) -> Self {
        Self {
            id,
            changes: Box::new(changes),
        }
    }
}

impl<E: Entity> fmt::Debug for Update<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update").field("id", &self.id).finish_non_exhaustive()
    }
}

type Comparator<E> = Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

/// Pure mutation operations over an [`EntityState`].
///
/// The adapter itself holds only the ordering strategy; collections are
/// passed in and returned, never stored.
///
/// # Example
///
/// ```ignore
/// let adapter: EntityAdapter<Attendee> = EntityAdapter::new();
///
/// fn reduce(state: Arc<AttendeeState>, action: &AttendeeAction) -> Arc<AttendeeState> {
///     match action {
///         AttendeeAction::LoadSucceeded { attendees } => Arc::new(AttendeeState {
///             collection: adapter.set_all(&state.collection, attendees.clone()),
///             loading: false,
///             ..
///         }),
///         ..
///     }
/// }
/// ```
pub struct EntityAdapter<E: Entity> {
    sort: Option<Comparator<E>>,
}

impl<E: Entity> EntityAdapter<E> {
    /// An adapter that keeps insertion order.
    pub fn new() -> Self {
        Self { sort: None }
    }

    /// An adapter that keeps the comparator's order.
    pub fn sorted_by(cmp: impl Fn(&E, &E) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            sort: Some(Arc::new(cmp)),
        }
    }

    /// The empty collection to start a feature slice from.
    pub fn initial_state(&self) -> EntityState<E> {
        EntityState::new()
    }

    /// Insert one record.
    ///
    /// If a record with the same id is already present the insert is
    /// silently ignored and the input collection is returned unchanged.
    pub fn add_one(&self, state: &Arc<EntityState<E>>, entity: E) -> Arc<EntityState<E>> {
        if state.contains(&entity.id()) {
            return Arc::clone(state);
        }
        let mut next = (**state).clone();
        self.insert(&mut next, entity);
        Arc::new(next)
    }

    /// Insert many records; ids already present are silently ignored.
    pub fn add_many(
        &self,
        state: &Arc<EntityState<E>>,
        entities: impl IntoIterator<Item = E>,
    ) -> Arc<EntityState<E>> {
        let mut next = (**state).clone();
        let mut inserted = false;
        for entity in entities {
            if next.contains(&entity.id()) {
                continue;
            }
            self.insert(&mut next, entity);
            inserted = true;
        }
        if inserted {
            Arc::new(next)
        } else {
            Arc::clone(state)
        }
    }

    /// Replace the entire collection.
    ///
    /// Ordering resets to the new sequence (or the comparator's order). A
    /// later record with a duplicate id overwrites the earlier one.
    pub fn set_all(
        &self,
        state: &Arc<EntityState<E>>,
        entities: impl IntoIterator<Item = E>,
    ) -> Arc<EntityState<E>> {
        let mut next = EntityState::new();
        for entity in entities {
            let id = entity.id();
            if next.entities.insert(id.clone(), entity).is_none() {
                next.ids.push(id);
            }
        }
        if let Some(cmp) = &self.sort {
            let entities = &next.entities;
            next.ids.sort_by(|a, b| cmp(&entities[a], &entities[b]));
        }
        if next.is_empty() && state.is_empty() {
            return Arc::clone(state);
        }
        Arc::new(next)
    }

    /// Remove one record by id. Absent ids are a no-op.
    pub fn remove_one(&self, state: &Arc<EntityState<E>>, id: &E::Id) -> Arc<EntityState<E>> {
        if !state.contains(id) {
            return Arc::clone(state);
        }
        let mut next = (**state).clone();
        next.entities.remove(id);
        next.ids.retain(|existing| existing != id);
        Arc::new(next)
    }

    /// Remove many records by id. Ids not present are ignored.
    pub fn remove_many(&self, state: &Arc<EntityState<E>>, ids: &[E::Id]) -> Arc<EntityState<E>> {
        let present: Vec<&E::Id> = ids.iter().filter(|id| state.contains(id)).collect();
        if present.is_empty() {
            return Arc::clone(state);
        }
        let mut next = (**state).clone();
        for id in present {
            next.entities.remove(id);
            next.ids.retain(|existing| existing != id);
        }
        Arc::new(next)
    }

    /// Clear the collection. An empty collection is a no-op.
    pub fn remove_all(&self, state: &Arc<EntityState<E>>) -> Arc<EntityState<E>> {
        if state.is_empty() {
            return Arc::clone(state);
        }
        Arc::new(EntityState::new())
    }

    /// Patch one record by id. Absent ids are a no-op.
    pub fn update_one(
        &self,
        state: &Arc<EntityState<E>>,
        id: &E::Id,
        changes: impl FnOnce(&mut E),
    ) -> Arc<EntityState<E>> {
        if !state.contains(id) {
            return Arc::clone(state);
        }
        let mut next = (**state).clone();
        self.apply_update(&mut next, id, changes);
        Arc::new(next)
    }

    /// Apply many patches. Patches whose id is absent are ignored.
    pub fn update_many(
        &self,
        state: &Arc<EntityState<E>>,
        updates: Vec<Update<E>>,
    ) -> Arc<EntityState<E>> {
        let mut next = (**state).clone();
        let mut applied = false;
        for update in updates {
            let Update { id, changes } = update;
            if !next.contains(&id) {
                continue;
            }
            self.apply_update(&mut next, &id, changes);
            applied = true;
        }
        if applied {
            Arc::new(next)
        } else {
            Arc::clone(state)
        }
    }

    /// Insert the record if absent, replace it if present.
    pub fn upsert_one(&self, state: &Arc<EntityState<E>>, entity: E) -> Arc<EntityState<E>> {
        let mut next = (**state).clone();
        self.upsert(&mut next, entity);
        Arc::new(next)
    }

    /// Upsert many records.
    pub fn upsert_many(
        &self,
        state: &Arc<EntityState<E>>,
        entities: impl IntoIterator<Item = E>,
    ) -> Arc<EntityState<E>> {
        let mut next = (**state).clone();
        let mut touched = false;
        for entity in entities {
            self.upsert(&mut next, entity);
            touched = true;
        }
        if touched {
            Arc::new(next)
        } else {
            Arc::clone(state)
        }
    }

    /// Insert a record known to be absent, at its ordering position.
    fn insert(&self, state: &mut EntityState<E>, entity: E) {
        let id = entity.id();
        let position = self.position_for(state, &entity);
        state.ids.insert(position, id.clone());
        state.entities.insert(id, entity);
    }

    /// Replace a record, repositioning it when the order is comparator-kept.
    fn upsert(&self, state: &mut EntityState<E>, entity: E) {
        let id = entity.id();
        if !state.contains(&id) {
            self.insert(state, entity);
            return;
        }
        // Replacement may change the sort key; insertion order keeps the slot.
        if self.sort.is_some() {
            state.ids.retain(|existing| existing != &id);
            let position = self.position_for(state, &entity);
            state.ids.insert(position, id.clone());
        }
        state.entities.insert(id, entity);
    }

    /// Patch a record known to be present, handling id and sort-key changes.
    fn apply_update(&self, state: &mut EntityState<E>, id: &E::Id, changes: impl FnOnce(&mut E)) {
        let mut entity = match state.entities.remove(id) {
            Some(entity) => entity,
            None => return,
        };
        changes(&mut entity);
        let new_id = entity.id();

        if new_id == *id {
            if self.sort.is_some() {
                state.ids.retain(|existing| existing != id);
                let position = self.position_for(state, &entity);
                state.ids.insert(position, new_id.clone());
            }
            state.entities.insert(new_id, entity);
            return;
        }

        // The patch changed the id. If it collides with another record, that
        // record is replaced and the old slot removed.
        if state.entities.remove(&new_id).is_some() {
            state.ids.retain(|existing| existing != &new_id);
        }
        match self.sort {
            Some(_) => {
                state.ids.retain(|existing| existing != id);
                let position = self.position_for(state, &entity);
                state.ids.insert(position, new_id.clone());
            }
            None => {
                if let Some(slot) = state.ids.iter().position(|existing| existing == id) {
                    state.ids[slot] = new_id.clone();
                }
            }
        }
        state.entities.insert(new_id, entity);
    }

    /// The ordering position for a record not currently listed in `ids`.
    fn position_for(&self, state: &EntityState<E>, entity: &E) -> usize {
        match &self.sort {
            None => state.ids.len(),
            Some(cmp) => {
                let entities = &state.entities;
                state
                    .ids
                    .binary_search_by(|existing| cmp(&entities[existing], entity))
                    .unwrap_or_else(|position| position)
            }
        }
    }
}

impl<E: Entity> Default for EntityAdapter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Clone for EntityAdapter<E> {
    fn clone(&self) -> Self {
        Self {
            sort: self.sort.clone(),
        }
    }
}

impl<E: Entity> fmt::Debug for EntityAdapter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAdapter")
            .field("sorted", &self.sort.is_some())
            .finish()
    }
}
