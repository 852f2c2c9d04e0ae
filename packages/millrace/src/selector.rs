//! Memoized projections over state.
//!
//! A selector derives a value from one or more state slices without
//! recomputing when the inputs are unchanged. The cache holds exactly the
//! last call: inputs are compared by `Arc` identity, which is valid because
//! the store produces structurally shared trees where an untouched slice
//! keeps its `Arc`.
//!
//! Outputs are `Arc`s with stable identity on cache hits, so selectors
//! compose: feeding one selector's output into another preserves the
//! "unchanged input" signal down the chain.
//!
//! A panicking projection propagates to the caller and leaves the cache
//! untouched, so the last good value keeps being served for the old input.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A memoized projection from one input slice to a derived value.
///
/// # Example
///
/// ```ignore
/// let attendee_count = Selector::new(|s: &AttendeeState| s.collection.len());
///
/// let slice = tree.slice::<AttendeeState>("attendees").unwrap();
/// let count = attendee_count.select(&slice);
/// // Same slice identity: projection is not re-run.
/// let again = attendee_count.select(&slice);
/// assert!(Arc::ptr_eq(&count, &again));
/// ```
pub struct Selector<I, T> {
    project: Box<dyn Fn(&I) -> T + Send + Sync>,
    cache: Mutex<Option<(Arc<I>, Arc<T>)>>,
}

impl<I, T> Selector<I, T>
where
    I: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Build a selector from a pure projection function.
    pub fn new(project: impl Fn(&I) -> T + Send + Sync + 'static) -> Self {
        Self {
            project: Box::new(project),
            cache: Mutex::new(None),
        }
    }

    /// Project the input, reusing the cached output when the input identity
    /// matches the previous call.
    pub fn select(&self, input: &Arc<I>) -> Arc<T> {
        if let Some((cached_input, cached_output)) = &*self.lock() {
            if Arc::ptr_eq(cached_input, input) {
                return cached_output.clone();
            }
        }
        // Compute before taking the lock so a panicking projection leaves
        // the cache holding the last good value.
        let output = Arc::new((self.project)(input));
        *self.lock() = Some((input.clone(), output.clone()));
        output
    }

    fn lock(&self) -> MutexGuard<'_, Option<(Arc<I>, Arc<T>)>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<I, T> std::fmt::Debug for Selector<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector").finish_non_exhaustive()
    }
}

/// A memoized projection over two input slices.
///
/// The cache hits only when both input identities match the previous call.
pub struct Selector2<A, B, T> {
    project: Box<dyn Fn(&A, &B) -> T + Send + Sync>,
    #[allow(clippy::type_complexity)]
    cache: Mutex<Option<(Arc<A>, Arc<B>, Arc<T>)>>,
}

impl<A, B, T> Selector2<A, B, T>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Build a selector from a pure two-input projection function.
    pub fn new(project: impl Fn(&A, &B) -> T + Send + Sync + 'static) -> Self {
        Self {
            project: Box::new(project),
            cache: Mutex::new(None),
        }
    }

    /// Project the inputs, reusing the cached output when both identities
    /// match the previous call.
    pub fn select(&self, a: &Arc<A>, b: &Arc<B>) -> Arc<T> {
        if let Some((cached_a, cached_b, cached_output)) = &*self.lock() {
            if Arc::ptr_eq(cached_a, a) && Arc::ptr_eq(cached_b, b) {
                return cached_output.clone();
            }
        }
        let output = Arc::new((self.project)(a, b));
        *self.lock() = Some((a.clone(), b.clone(), output.clone()));
        output
    }

    #[allow(clippy::type_complexity)]
    fn lock(&self) -> MutexGuard<'_, Option<(Arc<A>, Arc<B>, Arc<T>)>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A, B, T> std::fmt::Debug for Selector2<A, B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector2").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Numbers {
        values: Vec<i32>,
    }

    #[test]
    fn test_select_computes_once_per_identity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_projection = calls.clone();
        let sum = Selector::new(move |n: &Numbers| {
            calls_in_projection.fetch_add(1, Ordering::Relaxed);
            n.values.iter().sum::<i32>()
        });

        let input = Arc::new(Numbers {
            values: vec![1, 2, 3],
        });

        assert_eq!(*sum.select(&input), 6);
        assert_eq!(*sum.select(&input), 6);
        assert_eq!(*sum.select(&input), 6);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_select_recomputes_on_new_identity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_projection = calls.clone();
        let len = Selector::new(move |n: &Numbers| {
            calls_in_projection.fetch_add(1, Ordering::Relaxed);
            n.values.len()
        });

        let first = Arc::new(Numbers { values: vec![1] });
        // Structurally equal but a different allocation: must recompute.
        let second = Arc::new(Numbers { values: vec![1] });

        len.select(&first);
        len.select(&second);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_cache_depth_is_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_projection = calls.clone();
        let len = Selector::new(move |n: &Numbers| {
            calls_in_projection.fetch_add(1, Ordering::Relaxed);
            n.values.len()
        });

        let a = Arc::new(Numbers { values: vec![1] });
        let b = Arc::new(Numbers { values: vec![1, 2] });

        len.select(&a);
        len.select(&b);
        // `a` was evicted by `b`: recomputes.
        len.select(&a);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_output_identity_stable_on_hit() {
        let ids = Selector::new(|n: &Numbers| n.values.clone());
        let input = Arc::new(Numbers {
            values: vec![1, 2],
        });

        let first = ids.select(&input);
        let second = ids.select(&input);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_selectors_compose() {
        let values = Selector::new(|n: &Numbers| n.values.clone());
        let count_calls = Arc::new(AtomicUsize::new(0));
        let count_calls_inner = count_calls.clone();
        let count = Selector::new(move |v: &Vec<i32>| {
            count_calls_inner.fetch_add(1, Ordering::Relaxed);
            v.len()
        });

        let input = Arc::new(Numbers {
            values: vec![1, 2, 3],
        });

        let derived = values.select(&input);
        assert_eq!(*count.select(&derived), 3);

        // Upstream hit keeps the derived identity, so the downstream
        // selector also hits.
        let derived_again = values.select(&input);
        assert_eq!(*count.select(&derived_again), 3);
        assert_eq!(count_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_projection_keeps_last_good_value() {
        let explosive = Selector::new(|n: &Numbers| {
            if n.values.is_empty() {
                panic!("empty input");
            }
            n.values[0]
        });

        let good = Arc::new(Numbers { values: vec![7] });
        let bad = Arc::new(Numbers { values: vec![] });

        assert_eq!(*explosive.select(&good), 7);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            explosive.select(&bad)
        }));
        assert!(result.is_err(), "projection panic must propagate");

        // The cache still serves the last good input without recomputing.
        assert_eq!(*explosive.select(&good), 7);
    }

    #[test]
    fn test_selector2_requires_both_identities() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = calls.clone();
        let combined = Selector2::new(move |a: &Numbers, b: &Numbers| {
            calls_inner.fetch_add(1, Ordering::Relaxed);
            a.values.len() + b.values.len()
        });

        let a = Arc::new(Numbers { values: vec![1] });
        let b = Arc::new(Numbers { values: vec![2, 3] });

        assert_eq!(*combined.select(&a, &b), 3);
        assert_eq!(*combined.select(&a, &b), 3);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // One changed identity invalidates.
        let b2 = Arc::new(Numbers { values: vec![2, 3] });
        assert_eq!(*combined.select(&a, &b2), 3);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
