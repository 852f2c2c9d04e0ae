//! The composed state tree.
//!
//! The tree maps feature names to type-erased state slices. It is immutable:
//! every committed dispatch produces a new tree that shares every untouched
//! slice with its predecessor. Because slices are `Arc`s, identity comparison
//! (`Arc::ptr_eq`) is a valid "unchanged" signal, which is what selector
//! memoization and change detection rely on.
//!
//! The store exclusively owns the current tree. Everything else (subscribers,
//! effects, taps, selectors) holds immutable snapshots.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StoreError;

/// A single feature slice plus the diagnostics needed for good error messages.
#[derive(Clone)]
pub(crate) struct SliceEntry {
    pub(crate) value: Arc<dyn Any + Send + Sync>,
    pub(crate) type_name: &'static str,
}

/// Immutable mapping from feature name to feature-state slice.
///
/// # Example
///
/// ```ignore
/// let tree = store.state();
/// let spinner = tree.slice::<SpinnerState>("spinner").unwrap();
/// assert!(spinner.is_on);
/// ```
#[derive(Clone, Default)]
pub struct StateTree {
    slices: BTreeMap<&'static str, SliceEntry>,
}

impl StateTree {
    /// Build the root tree from the reducers' initial slices.
    pub(crate) fn from_entries(
        entries: impl IntoIterator<Item = (&'static str, SliceEntry)>,
    ) -> Self {
        Self {
            slices: entries.into_iter().collect(),
        }
    }

    /// Produce a new tree with the given entries replaced.
    ///
    /// Untouched slices keep their `Arc` identity.
    pub(crate) fn with_entries(
        &self,
        replaced: impl IntoIterator<Item = (&'static str, SliceEntry)>,
    ) -> Self {
        let mut slices = self.slices.clone();
        for (feature, entry) in replaced {
            slices.insert(feature, entry);
        }
        Self { slices }
    }

    pub(crate) fn entry(&self, feature: &str) -> Option<&SliceEntry> {
        self.slices.get(feature)
    }

    /// Typed access to a feature slice.
    ///
    /// Returns `None` if the feature is unknown or holds a different type.
    /// Use [`StateTree::try_slice`] when you want to know which.
    pub fn slice<S: Send + Sync + 'static>(&self, feature: &str) -> Option<Arc<S>> {
        let entry = self.slices.get(feature)?;
        entry.value.clone().downcast::<S>().ok()
    }

    /// Typed access to a feature slice, distinguishing the failure modes.
    pub fn try_slice<S: Send + Sync + 'static>(&self, feature: &str) -> Result<Arc<S>, StoreError> {
        let entry = self
            .slices
            .get(feature)
            .ok_or_else(|| StoreError::UnknownFeature {
                feature: feature.to_string(),
            })?;
        entry
            .value
            .clone()
            .downcast::<S>()
            .map_err(|_| StoreError::SliceTypeMismatch {
                feature: feature.to_string(),
                actual: entry.type_name,
                requested: std::any::type_name::<S>(),
            })
    }

    /// Check whether a feature is registered.
    pub fn contains(&self, feature: &str) -> bool {
        self.slices.contains_key(feature)
    }

    /// Iterate the registered feature names in deterministic order.
    pub fn features(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slices.keys().copied()
    }

    /// Number of registered features.
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// True if no features are registered.
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

impl std::fmt::Debug for StateTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTree")
            .field("features", &self.slices.keys().collect::<Vec<_>>())
            .finish()
    }
}
