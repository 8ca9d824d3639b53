// ============================================================================
// spark-state - Debug Registry
// Creation-ordered list of live instances, for diagnostics only
// ============================================================================
//
// Dispatch never consults this registry. It exists so tooling can answer
// "which instances does this subscription currently depend on?".
// ============================================================================

use std::cell::RefCell;
use std::rc::Weak;

use crate::core::types::InstanceId;
use crate::primitives::observable::{Observable, ObservableInner, WeakObservable};
use crate::primitives::subscription::Subscription;

thread_local! {
    static REGISTRY: RefCell<Vec<WeakObservable>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn register(id: InstanceId, inner: Weak<ObservableInner>) {
    REGISTRY.with(|r| r.borrow_mut().push(WeakObservable::from_inner(id, inner)));
}

pub(crate) fn unregister(id: InstanceId) {
    // The registry may already be gone during thread teardown
    let _ = REGISTRY.try_with(|r| {
        if let Ok(mut registry) = r.try_borrow_mut() {
            registry.retain(|w| w.id() != id);
        }
    });
}

/// Every live instance, in creation order.
pub fn live_instances() -> Vec<Observable> {
    REGISTRY.with(|r| r.borrow().iter().filter_map(WeakObservable::upgrade).collect())
}

/// Number of live instances on this thread
pub fn instance_count() -> usize {
    REGISTRY.with(|r| r.borrow().len())
}

/// Instances that currently record at least one key for `subscription`, in
/// creation order.
///
/// # Example
///
/// ```
/// use spark_state::{dependents_of, make_observable, run_tracked, Subscription};
///
/// let a = make_observable([("x", 1)]);
/// let b = make_observable([("y", 2)]);
/// let sub = Subscription::detached("inspect");
///
/// run_tracked(|| b.get("y"), &sub);
/// assert_eq!(dependents_of(&sub), vec![b.clone()]);
/// # drop(a);
/// ```
pub fn dependents_of(subscription: &Subscription) -> Vec<Observable> {
    live_instances()
        .into_iter()
        .filter(|instance| instance.is_tracked_by(subscription))
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::observable::make_observable;
    use crate::reactivity::tracking::{dispose, run_tracked};

    #[test]
    fn registry_follows_instance_lifetime() {
        let before = instance_count();
        let a = make_observable([("x", 1)]);
        let b = make_observable([("x", 2)]);
        assert_eq!(instance_count(), before + 2);

        let live = live_instances();
        let pos_a = live.iter().position(|o| *o == a);
        let pos_b = live.iter().position(|o| *o == b);
        assert!(pos_a < pos_b);

        drop(a);
        assert_eq!(instance_count(), before + 1);
        drop(b);
        assert_eq!(instance_count(), before);
    }

    #[test]
    fn dependents_reflect_tracking_and_disposal() {
        let a = make_observable([("x", 1)]);
        let b = make_observable([("x", 1)]);
        let c = make_observable([("x", 1)]);
        let sub = Subscription::detached("s");

        run_tracked(
            || {
                c.get("x");
                a.get("x");
            },
            &sub,
        );
        assert_eq!(dependents_of(&sub), vec![a.clone(), c.clone()]);
        assert!(!dependents_of(&sub).contains(&b));

        dispose(&sub);
        assert!(dependents_of(&sub).is_empty());
    }
}
