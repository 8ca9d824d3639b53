// ============================================================================
// spark-state - Observable State for Rust
// ============================================================================
//
// Property-bag instances that record which keys a subscription read, and a
// batching scheduler that reruns those subscriptions once per flush after a
// write. Classes add memoized computeds and watch methods on top.
//
// Everything is single-threaded: state lives in `Rc`/`RefCell` and the
// tracking context and scheduler are thread-local.
// ============================================================================

pub mod core;
mod macros;
pub mod primitives;
pub mod reactivity;

// Re-export core items at crate root
pub use crate::core::constants;
pub use crate::core::context::{
    current_subscription, is_tracking, is_untracking, tracking_depth, with_context,
    TrackingContext,
};
pub use crate::core::error::DefinitionError;
pub use crate::core::types::{InstanceId, Key, SubscriptionId, Value};

// Re-export primitives
pub use crate::primitives::class::{AccessorFn, MethodFn, ObservableClass};
pub use crate::primitives::debug::{dependents_of, instance_count, live_instances};
pub use crate::primitives::observable::{make_observable, Observable, WeakObservable};
pub use crate::primitives::subscription::{Callback, CleanupFn, Subscription, WeakSubscription};

// Re-export reactivity functions
pub use crate::reactivity::equality::{identical, not_identical};
pub use crate::reactivity::scheduling::{
    configure_scheduler, enqueue, flush, has_pending_flush, tick, with_scheduler, EnqueueOptions,
    Scheduler, SchedulerConfig, Task, TickHook,
};
pub use crate::reactivity::tracking::{dispose, rerun_tracked, run_tracked, try_run_tracked, untrack};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, move || c.set(c.get() + 1))
    }

    // =========================================================================
    // Plain observables
    // =========================================================================

    #[test]
    fn write_after_tracked_read_runs_subscription_once() {
        let obj = make_observable([("age", 17)]);
        let (runs, bump) = counter();
        let sub = Subscription::new("render", bump);

        run_tracked(|| obj.get("age"), &sub);
        assert!(obj.set("age", 18));
        assert!(has_pending_flush());
        assert_eq!(runs.get(), 0);

        flush();
        assert_eq!(runs.get(), 1);
        assert!(!has_pending_flush());
    }

    #[test]
    fn rerun_tracked_rebuilds_dependencies() {
        let obj = make_observable([("a", 1), ("b", 1)]);
        let (runs, bump) = counter();
        let sub = Subscription::new("view", bump);

        run_tracked(|| obj.get("a"), &sub);
        rerun_tracked(|| obj.get("b"), &sub);
        assert_eq!(obj.tracked_keys(&sub), vec![Key::from("b")]);

        obj.set("a", 2);
        flush();
        assert_eq!(runs.get(), 0);

        obj.set("b", 2);
        flush();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn self_retracking_subscription() {
        // A subscription that re-runs its own tracked read each time it fires
        let obj = make_observable([("n", 0)]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sub = Subscription::detached("self");
        {
            let weak = sub.downgrade();
            let obj = obj.clone();
            let seen = seen.clone();
            sub.set_callback(move || {
                if let Some(sub) = weak.upgrade() {
                    let v = rerun_tracked(|| obj.get("n"), &sub);
                    seen.borrow_mut().push(v);
                }
            });
        }
        run_tracked(|| obj.get("n"), &sub);

        obj.set("n", 1);
        flush();
        obj.set("n", 2);
        flush();
        assert_eq!(*seen.borrow(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn tracking_context_restored_after_run() {
        let sub = Subscription::detached("outer");
        assert!(!is_tracking());
        run_tracked(
            || {
                assert!(is_tracking());
                assert_eq!(current_subscription(), Some(sub.clone()));
                untrack(|| assert!(is_untracking()));
            },
            &sub,
        );
        assert!(!is_tracking());
        assert_eq!(tracking_depth(), 0);
    }

    // =========================================================================
    // Classes
    // =========================================================================

    fn user_class(accessor_runs: &Rc<Cell<u32>>, watch_runs: &Rc<Cell<u32>>) -> ObservableClass {
        let mut class = ObservableClass::new("User");
        {
            let accessor_runs = accessor_runs.clone();
            let watch_runs = watch_runs.clone();
            class
                .field("age", 17)
                .field("name", "gy")
                .accessor("age2", move |this| {
                    accessor_runs.set(accessor_runs.get() + 1);
                    Value::from(this.get("age").as_int().unwrap_or(0) + 1)
                })
                .method("greet", move |_| watch_runs.set(watch_runs.get() + 1));
        }
        class.define_computed("age2", &["age"]).unwrap();
        class.define_watch("greet", &["age", "name"]).unwrap();
        class
    }

    #[test]
    fn computed_age_scenario() {
        let accessor_runs = Rc::new(Cell::new(0));
        let watch_runs = Rc::new(Cell::new(0));
        let user = user_class(&accessor_runs, &watch_runs).instantiate();

        assert_eq!(accessor_runs.get(), 0);
        assert_eq!(user.get("age2").as_int(), Some(18));
        assert_eq!(accessor_runs.get(), 1);

        user.set("age", 20);
        assert_eq!(user.get("age2").as_int(), Some(21));
        assert_eq!(accessor_runs.get(), 2);
        flush();
        assert_eq!(accessor_runs.get(), 2);
    }

    #[test]
    fn watch_runs_once_per_batch() {
        let accessor_runs = Rc::new(Cell::new(0));
        let watch_runs = Rc::new(Cell::new(0));
        let user = user_class(&accessor_runs, &watch_runs).instantiate();
        flush();
        assert_eq!(watch_runs.get(), 1);

        user.set("age", 30);
        user.set("name", "other");
        flush();
        assert_eq!(watch_runs.get(), 2);
    }

    #[test]
    fn instances_do_not_share_state() {
        let accessor_runs = Rc::new(Cell::new(0));
        let watch_runs = Rc::new(Cell::new(0));
        let class = user_class(&accessor_runs, &watch_runs);
        let a = class.instantiate();
        let b = class.instantiate_with([("age", 40)]);
        flush();

        assert_eq!(a.get("age2").as_int(), Some(18));
        assert_eq!(b.get("age2").as_int(), Some(41));

        a.set("age", 1);
        assert_eq!(b.get("age2").as_int(), Some(41));
        assert_eq!(a.class_name(), Some("User"));
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let mut class = ObservableClass::new("Bad");
        class.field("x", 1).method("m", |_| {});

        assert!(matches!(
            class.define_watch("x", &["x"]),
            Err(DefinitionError::WatchOnNonMethod { .. })
        ));
        assert!(matches!(
            class.define_computed("m", &["x"]),
            Err(DefinitionError::ComputedOnNonAccessor { .. })
        ));
    }

    // =========================================================================
    // Scheduler
    // =========================================================================

    #[test]
    fn tick_hook_is_requested_once_per_batch() {
        let (requests, bump) = counter();
        configure_scheduler(SchedulerConfig::default().with_request_tick(bump));

        let obj = make_observable([("x", 0)]);
        let sub = Subscription::new("s", || {});
        run_tracked(|| obj.get("x"), &sub);

        obj.set("x", 1);
        obj.set("x", 2);
        assert_eq!(requests.get(), 1);
        assert_eq!(tick(), 1);
        assert_eq!(tick(), 0);

        configure_scheduler(SchedulerConfig::default());
    }

    #[test]
    fn immediate_enqueue_runs_inline() {
        let (runs, bump) = counter();
        enqueue(Subscription::new("now", bump), EnqueueOptions::immediate());
        assert_eq!(runs.get(), 1);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    #[test]
    fn dependents_track_disposal() {
        let a = make_observable([("x", 1)]);
        let sub = Subscription::detached("inspect");
        run_tracked(|| a.get("x"), &sub);
        assert_eq!(dependents_of(&sub), vec![a.clone()]);
        dispose(&sub);
        assert!(dependents_of(&sub).is_empty());
    }

    #[test]
    fn flag_constants_are_distinct() {
        assert_eq!(constants::CLEAN & constants::MAYBE_DIRTY, 0);
        assert_eq!(constants::MAYBE_DIRTY & constants::COMPUTING, 0);
        assert_eq!(constants::STATUS_MASK & constants::COMPUTING, constants::COMPUTING);
    }
}
