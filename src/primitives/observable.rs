// ============================================================================
// spark-state - Observable
// Property bag that records tracked reads and dispatches on writes
// ============================================================================
//
// Reads (get) record `key` for the subscription at the top of the tracking
// context. Writes (set) compare by identity and, on change, run two
// notification paths:
//
// - coarse: every standing effect of the instance is enqueued, whatever
//   key changed (computeds and watches re-diff their own dependency lists)
// - fine-grained: every subscription whose recorded keys include `key` is
//   enqueued; ones without a callback are disposed on the spot
//
// Nothing runs inline. All borrows are released before anything is enqueued
// or disposed (collect-then-mutate), since cleanups re-enter the dependency
// map.
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::core::context::current_subscription;
use crate::core::types::{InstanceId, Key, Value};
use crate::primitives::class::{AccessorFn, ClassDef};
use crate::primitives::computed::{self, ComputedSlot};
use crate::primitives::debug;
use crate::primitives::registry::{DependencyMap, EffectList};
use crate::primitives::subscription::Subscription;
use crate::reactivity::equality::not_identical;
use crate::reactivity::scheduling::{enqueue, EnqueueOptions, Task};
use crate::reactivity::tracking::untrack;

// =============================================================================
// OBSERVABLE INNER
// =============================================================================

pub(crate) struct ObservableInner {
    id: InstanceId,

    /// Definition this instance was created from (None for plain objects)
    class: Option<Rc<ClassDef>>,

    fields: RefCell<FxHashMap<Key, Value>>,

    deps: RefCell<DependencyMap>,

    effects: RefCell<EffectList>,

    /// Memoized computeds, created on first access
    computeds: RefCell<FxHashMap<Key, Rc<ComputedSlot>>>,
}

impl Drop for ObservableInner {
    fn drop(&mut self) {
        tracing::debug!(instance = %self.id, "observable dropped");
        debug::unregister(self.id);
    }
}

// =============================================================================
// OBSERVABLE
// =============================================================================

/// An observable instance. Cloning yields another handle to the same
/// instance.
///
/// # Example
///
/// ```
/// use spark_state::{make_observable, run_tracked, Subscription};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let user = make_observable([("age", 17)]);
/// let renders = Rc::new(Cell::new(0));
/// let sub = Subscription::new("render", {
///     let renders = renders.clone();
///     move || renders.set(renders.get() + 1)
/// });
///
/// run_tracked(|| user.get("age"), &sub);
///
/// user.set("age", 17); // identical: nothing scheduled
/// user.set("age", 18);
/// user.set("age", 19);
/// spark_state::flush();
/// assert_eq!(renders.get(), 1);
/// ```
#[derive(Clone)]
pub struct Observable {
    inner: Rc<ObservableInner>,
}

/// Wrap a plain property bag.
pub fn make_observable<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Observable
where
    K: Into<Key>,
    V: Into<Value>,
{
    let fields = fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Observable::from_parts(None, fields)
}

impl Observable {
    pub(crate) fn from_parts(class: Option<Rc<ClassDef>>, fields: Vec<(Key, Value)>) -> Self {
        let inner = Rc::new(ObservableInner {
            id: InstanceId::next(),
            class,
            fields: RefCell::new(fields.into_iter().collect()),
            deps: RefCell::new(DependencyMap::new()),
            effects: RefCell::new(EffectList::new()),
            computeds: RefCell::new(FxHashMap::default()),
        });
        debug::register(inner.id, Rc::downgrade(&inner));
        tracing::debug!(
            instance = %inner.id,
            class = inner.class.as_ref().map(|c| &*c.name),
            "observable created"
        );
        Self { inner }
    }

    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    /// Name of the class this instance was created from
    pub fn class_name(&self) -> Option<&str> {
        self.inner.class.as_ref().map(|c| &*c.name)
    }

    pub fn downgrade(&self) -> WeakObservable {
        WeakObservable {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Read `key`, recording it for the active subscription (if any).
    ///
    /// Unknown keys and method names read as `Value::Undefined`. Computed
    /// names return the memoized value.
    pub fn get(&self, key: &str) -> Value {
        let key = self.intern(key);
        self.track(&key);

        if let Some(deps) = self.computed_deps(&key) {
            return computed::read(self, &key, &deps);
        }
        // Plain accessors are not memoized; their reads track like any other
        if let Some(accessor) = self.accessor(&key) {
            return accessor(self);
        }
        self.inner.fields.borrow().get(&key).cloned().unwrap_or_default()
    }

    /// Read `key` without recording a dependency.
    pub fn peek(&self, key: &str) -> Value {
        untrack(|| self.get(key))
    }

    /// Reuse the stored `Rc<str>` for known keys.
    fn intern(&self, key: &str) -> Key {
        if let Some((k, _)) = self.inner.fields.borrow().get_key_value(key) {
            return k.clone();
        }
        Key::from(key)
    }

    fn track(&self, key: &Key) {
        let Some(subscription) = current_subscription() else {
            return;
        };

        let created = self.inner.deps.borrow_mut().record(&subscription, key);
        if created {
            let instance = Rc::downgrade(&self.inner);
            let id = subscription.id();
            subscription.on_dispose(move || {
                if let Some(inner) = instance.upgrade() {
                    inner.deps.borrow_mut().remove(id);
                }
            });
            tracing::trace!(instance = %self.inner.id, sub = %id, key = %key, "new dependency entry");
        }
    }

    // =========================================================================
    // WRITE
    // =========================================================================

    /// Write `key`. Returns whether the value changed (and listeners were
    /// notified).
    ///
    /// Methods and accessors cannot be assigned; such writes are ignored and
    /// return `false`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        if self.inner.class.as_ref().is_some_and(|c| c.is_member(key)) {
            tracing::warn!(instance = %self.inner.id, key, "write to a method or accessor ignored");
            return false;
        }

        let key = self.intern(key);
        let value = value.into();
        let old = self.inner.fields.borrow_mut().insert(key.clone(), value.clone());
        let changed = not_identical(&old.unwrap_or_default(), &value);

        if changed {
            tracing::trace!(instance = %self.inner.id, key = %key, value = %value, "changed");
            self.notify_change(&key, None);
        }
        changed
    }

    /// Run both notification paths for a change of `key`.
    ///
    /// `origin` is the computed that produced the change, which does not need
    /// to be marked stale by its own dispatch.
    pub(crate) fn notify_change(&self, key: &str, origin: Option<&str>) {
        self.mark_computeds_stale(origin);
        self.dispatch_effects();
        self.dispatch_key(key);
    }

    fn mark_computeds_stale(&self, origin: Option<&str>) {
        for (name, slot) in self.inner.computeds.borrow().iter() {
            if origin != Some(&**name) {
                slot.mark_maybe_dirty();
            }
        }
    }

    /// Coarse dispatch: enqueue every standing effect.
    pub(crate) fn dispatch_effects(&self) {
        let effects = self.inner.effects.borrow().snapshot();
        for effect in effects {
            enqueue(effect, EnqueueOptions::default());
        }
    }

    /// Fine-grained dispatch: enqueue live subscriptions that read `key`,
    /// purge the ones without a callback.
    fn dispatch_key(&self, key: &str) {
        let targets = self.inner.deps.borrow().subscribers_of(key);

        let mut stale = Vec::new();
        for weak in targets {
            match weak.upgrade() {
                Some(sub) if sub.is_live() => enqueue(sub, EnqueueOptions::default()),
                Some(sub) => stale.push(sub),
                None => {
                    self.inner.deps.borrow_mut().remove(weak.id());
                }
            }
        }

        for sub in stale {
            tracing::trace!(instance = %self.inner.id, sub = %sub.id(), "purging detached subscription");
            sub.dispose();
        }
    }

    // =========================================================================
    // CLASS MEMBERS
    // =========================================================================

    /// Call method `name`. Returns whether such a method exists.
    pub fn call(&self, name: &str) -> bool {
        let method = self.inner.class.as_ref().and_then(|c| c.method(name));
        match method {
            Some(method) => {
                method(self);
                true
            }
            None => false,
        }
    }

    pub(crate) fn accessor(&self, name: &str) -> Option<AccessorFn> {
        self.inner.class.as_ref().and_then(|c| c.accessor(name))
    }

    fn computed_deps(&self, name: &str) -> Option<Rc<[Key]>> {
        self.inner
            .class
            .as_ref()
            .and_then(|c| c.computeds.get(name))
            .map(|def| def.deps.clone())
    }

    pub(crate) fn computed_slot(&self, name: &str) -> Option<Rc<ComputedSlot>> {
        self.inner.computeds.borrow().get(name).cloned()
    }

    pub(crate) fn insert_computed_slot(&self, name: Key, slot: Rc<ComputedSlot>) {
        self.inner.computeds.borrow_mut().insert(name, slot);
    }

    /// Register a standing effect, enqueued on every change.
    pub(crate) fn add_effect(&self, effect: Task) {
        self.inner.effects.borrow_mut().push(effect);
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Field names, sorted
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.inner.fields.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys `subscription` has read on this instance, sorted
    pub fn tracked_keys(&self, subscription: &Subscription) -> Vec<Key> {
        self.inner.deps.borrow().keys_of(subscription.id())
    }

    /// Whether `subscription` has any dependency on this instance
    pub fn is_tracked_by(&self, subscription: &Subscription) -> bool {
        self.inner.deps.borrow().contains(subscription.id())
    }

    /// Number of subscriptions with recorded dependencies
    pub fn subscriber_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    /// Number of standing effects (watches and accessed computeds)
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Observable {}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.inner.fields.borrow();
        let mut entries: Vec<_> = fields.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut s = f.debug_struct("Observable");
        s.field("id", &self.inner.id);
        if let Some(class) = &self.inner.class {
            s.field("class", &class.name);
        }
        s.field("fields", &entries).finish()
    }
}

// =============================================================================
// WEAK OBSERVABLE
// =============================================================================

/// Non-owning instance handle, used by plumbing that must not keep the
/// instance alive.
#[derive(Clone)]
pub struct WeakObservable {
    id: InstanceId,
    inner: Weak<ObservableInner>,
}

impl WeakObservable {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Observable> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }

    pub(crate) fn from_inner(id: InstanceId, inner: Weak<ObservableInner>) -> Self {
        Self { id, inner }
    }
}

impl fmt::Debug for WeakObservable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObservable")
            .field("id", &self.id)
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
