// ============================================================================
// spark-state - Dependency Tracking
// Run callbacks with a subscription collecting their reads
// ============================================================================
//
// run_tracked is the only way a read becomes a dependency. It pushes the
// subscription onto the thread-local context, runs the callback and pops the
// frame again, on the normal path and on unwind alike. A callback that fails
// (panics, or returns Err through try_run_tracked) leaves its subscription
// disposed, so partial dependency records never survive a failed run.
// ============================================================================

use crate::core::context::with_context;
use crate::primitives::subscription::Subscription;

// =============================================================================
// RUN TRACKED
// =============================================================================

/// Run `f` with `subscription` collecting every observable read it performs.
///
/// The previous context is restored afterwards, even if `f` panics. On panic
/// the subscription is disposed before the panic continues to the caller.
///
/// # Example
///
/// ```
/// use spark_state::{make_observable, run_tracked, Subscription};
///
/// let user = make_observable([("name", "gy")]);
/// let sub = Subscription::detached("probe");
///
/// let name = run_tracked(|| user.get("name"), &sub);
/// assert_eq!(name.as_str(), Some("gy"));
/// assert_eq!(user.tracked_keys(&sub).len(), 1);
/// ```
pub fn run_tracked<T>(f: impl FnOnce() -> T, subscription: &Subscription) -> T {
    with_context(|ctx| ctx.push_frame(Some(subscription.clone())));

    // Use a guard pattern to restore the context even on panic
    // Dispose only if `f` itself did not return, not on any unwind in progress
    struct TrackGuard<'a> {
        subscription: &'a Subscription,
        completed: bool,
    }

    impl Drop for TrackGuard<'_> {
        fn drop(&mut self) {
            with_context(|ctx| ctx.pop_frame());
            if !self.completed {
                tracing::debug!(sub = %self.subscription.id(), "tracked callback panicked, disposing");
                self.subscription.dispose();
            }
        }
    }

    let mut guard = TrackGuard {
        subscription,
        completed: false,
    };
    let value = f();
    guard.completed = true;
    value
}

/// Fallible form of [`run_tracked`].
///
/// If `f` returns `Err`, the subscription is disposed and the error is
/// returned unchanged.
pub fn try_run_tracked<T, E>(
    f: impl FnOnce() -> Result<T, E>,
    subscription: &Subscription,
) -> Result<T, E> {
    let result = run_tracked(f, subscription);
    if result.is_err() {
        tracing::debug!(sub = %subscription.id(), "tracked callback failed, disposing");
        subscription.dispose();
    }
    result
}

/// Dispose `subscription` and track `f` again from a clean slate.
///
/// Dependencies that `f` no longer reads are dropped. This is the shape of a
/// re-render: forget what the last run read, record what this one reads.
pub fn rerun_tracked<T>(f: impl FnOnce() -> T, subscription: &Subscription) -> T {
    subscription.dispose();
    run_tracked(f, subscription)
}

// =============================================================================
// UNTRACK
// =============================================================================

/// Run `f` without recording any reads, even inside an outer `run_tracked`.
///
/// # Example
///
/// ```
/// use spark_state::{make_observable, run_tracked, untrack, Subscription};
///
/// let user = make_observable([("age", 17), ("name", 0)]);
/// let sub = Subscription::detached("probe");
///
/// run_tracked(|| {
///     user.get("age");
///     untrack(|| user.get("name"));
/// }, &sub);
///
/// assert_eq!(user.tracked_keys(&sub).len(), 1);
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    with_context(|ctx| ctx.push_frame(None));

    struct UntrackGuard;

    impl Drop for UntrackGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.pop_frame());
        }
    }

    let _guard = UntrackGuard;
    f()
}

// =============================================================================
// DISPOSE
// =============================================================================

/// Run and clear every cleanup of `subscription`, detaching it from every
/// instance's dependency map. Returns the number of cleanups that ran.
pub fn dispose(subscription: &Subscription) -> usize {
    subscription.dispose()
}

// =============================================================================
// TESTS
// =============================================================================
