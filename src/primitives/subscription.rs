// ============================================================================
// spark-state - Subscription
// Identity-addressable listener with an optional callback and cleanups
// ============================================================================
//
// A Subscription is what gets tracked (reads recorded against it) and what
// gets scheduled (its callback runs in a flush). Identity is the allocation:
// clones are the same subscription, two `new` calls never are.
//
// Cleanups are registered by every observable instance that records an edge
// for the subscription. Disposing runs them, which removes the subscription
// from every dependency map that references it. Dropping the last handle
// disposes as well.
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::core::types::SubscriptionId;

// =============================================================================
// TYPE ALIASES
// =============================================================================

/// Callback run when the subscription is flushed
pub type Callback = Rc<dyn Fn()>;

/// Cleanup run (once) when the subscription is disposed
pub type CleanupFn = Box<dyn FnOnce()>;

// =============================================================================
// SUBSCRIPTION INNER
// =============================================================================

pub(crate) struct SubscriptionInner {
    id: SubscriptionId,
    label: Rc<str>,
    callback: RefCell<Option<Callback>>,
    cleanups: RefCell<Vec<CleanupFn>>,
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        let cleanups = std::mem::take(self.cleanups.get_mut());
        if !cleanups.is_empty() {
            tracing::debug!(sub = %self.id, label = %self.label, count = cleanups.len(), "subscription dropped, running cleanups");
        }
        for cleanup in cleanups {
            cleanup();
        }
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// A listener descriptor: `{ id, label, callback? }` plus cleanup callbacks.
///
/// # Example
///
/// ```
/// use spark_state::{make_observable, run_tracked, Subscription};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let hits = Rc::new(Cell::new(0));
/// let sub = Subscription::new("render", {
///     let hits = hits.clone();
///     move || hits.set(hits.get() + 1)
/// });
///
/// let user = make_observable([("age", 17)]);
/// run_tracked(|| user.get("age"), &sub);
///
/// user.set("age", 18);
/// spark_state::flush();
/// assert_eq!(hits.get(), 1);
/// ```
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl Subscription {
    /// Create a subscription with a live callback.
    pub fn new(label: impl Into<Rc<str>>, callback: impl Fn() + 'static) -> Self {
        Self::with_callback(label.into(), Some(Rc::new(callback)))
    }

    /// Create a subscription without a callback.
    ///
    /// Useful for pure dependency collection; a detached subscription found in
    /// a dependency map during notification is purged instead of scheduled.
    pub fn detached(label: impl Into<Rc<str>>) -> Self {
        Self::with_callback(label.into(), None)
    }

    fn with_callback(label: Rc<str>, callback: Option<Callback>) -> Self {
        Self {
            inner: Rc::new(SubscriptionInner {
                id: SubscriptionId::next(),
                label,
                callback: RefCell::new(callback),
                cleanups: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Debug label
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the subscription has a callback to run
    pub fn is_live(&self) -> bool {
        self.inner.callback.borrow().is_some()
    }

    /// Replace the callback.
    pub fn set_callback(&self, callback: impl Fn() + 'static) {
        *self.inner.callback.borrow_mut() = Some(Rc::new(callback));
    }

    /// Remove the callback, returning whether there was one.
    pub fn clear_callback(&self) -> bool {
        self.inner.callback.borrow_mut().take().is_some()
    }

    /// Run the callback if there is one. Returns whether it ran.
    ///
    /// The callback is cloned out before it runs, so it may replace or clear
    /// itself, dispose the subscription, or re-enter.
    pub fn run(&self) -> bool {
        let callback = self.inner.callback.borrow().clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Register a cleanup to run on the next disposal.
    pub fn on_dispose(&self, cleanup: impl FnOnce() + 'static) {
        self.inner.cleanups.borrow_mut().push(Box::new(cleanup));
    }

    /// Number of cleanups waiting for disposal
    pub fn cleanup_count(&self) -> usize {
        self.inner.cleanups.borrow().len()
    }

    /// Run and discard every registered cleanup, returning how many ran.
    ///
    /// The subscription stays usable: it can track again afterwards.
    pub fn dispose(&self) -> usize {
        let cleanups = self.inner.cleanups.take();
        let count = cleanups.len();
        tracing::debug!(sub = %self.inner.id, label = %self.inner.label, count, "dispose");
        for cleanup in cleanups {
            cleanup();
        }
        count
    }

    /// Clear the callback and dispose. A detached subscription is never run
    /// again, even if it is still sitting in a scheduler queue.
    pub fn detach(&self) {
        self.clear_callback();
        self.dispose();
    }

    pub fn downgrade(&self) -> WeakSubscription {
        WeakSubscription {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Subscription {}

impl Hash for Subscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("live", &self.is_live())
            .field("cleanups", &self.cleanup_count())
            .finish()
    }
}

// =============================================================================
// WEAK SUBSCRIPTION
// =============================================================================

/// Non-owning handle, kept by dependency maps so an instance never keeps a
/// subscription (and whatever its callback captured) alive.
#[derive(Clone)]
pub struct WeakSubscription {
    id: SubscriptionId,
    inner: Weak<SubscriptionInner>,
}

impl WeakSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Subscription> {
        self.inner.upgrade().map(|inner| Subscription { inner })
    }
}

impl fmt::Debug for WeakSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSubscription")
            .field("id", &self.id)
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
