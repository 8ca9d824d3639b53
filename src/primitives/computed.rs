// ============================================================================
// spark-state - Computed
// Memoized accessors over an explicit dependency list
// ============================================================================
//
// A computed is lazy: nothing runs until the first read. That read evaluates
// the accessor, caches the value, snapshots the declared dependencies and
// installs a standing effect on the instance.
//
// Any write to the instance marks the computed MAYBE_DIRTY and (through the
// coarse dispatch) enqueues the effect. Either the effect or the next read,
// whichever comes first, re-reads the dependencies and compares them with the
// snapshot one by one. Only a real difference re-evaluates the accessor, and
// the new value is then dispatched as a change of the computed's own name, so
// watches and subscriptions that read it are notified.
//
// Accessor and dependency reads run untracked: whoever reads the computed
// depends on its name, not on what it reads internally.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::core::constants::*;
use crate::core::types::{Key, Value};
use crate::primitives::observable::Observable;
use crate::primitives::subscription::Subscription;
use crate::reactivity::equality::snapshot_differs;
use crate::reactivity::tracking::untrack;

// =============================================================================
// COMPUTED SLOT
// =============================================================================

/// Per-instance state of one computed
pub(crate) struct ComputedSlot {
    flags: Cell<u32>,
    deps: Rc<[Key]>,
    cache: RefCell<Value>,
    snapshot: RefCell<Vec<Value>>,
}

impl ComputedSlot {
    fn new(deps: Rc<[Key]>) -> Self {
        Self {
            flags: Cell::new(CLEAN),
            deps,
            cache: RefCell::new(Value::Undefined),
            snapshot: RefCell::new(Vec::new()),
        }
    }

    pub fn mark_maybe_dirty(&self) {
        self.flags.set((self.flags.get() & STATUS_MASK) | MAYBE_DIRTY);
    }

    fn mark_clean(&self) {
        self.flags.set((self.flags.get() & STATUS_MASK) | CLEAN);
    }

    fn is_maybe_dirty(&self) -> bool {
        self.flags.get() & MAYBE_DIRTY != 0
    }

    fn is_computing(&self) -> bool {
        self.flags.get() & COMPUTING != 0
    }

    fn cached(&self) -> Value {
        self.cache.borrow().clone()
    }

    /// Set COMPUTING until the guard drops (also on panic)
    fn enter(&self) -> ComputingGuard<'_> {
        self.flags.set(self.flags.get() | COMPUTING);
        ComputingGuard { slot: self }
    }
}

struct ComputingGuard<'a> {
    slot: &'a ComputedSlot,
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        let flags = self.slot.flags.get();
        self.slot.flags.set(flags & !COMPUTING);
    }
}

// =============================================================================
// READ
// =============================================================================

/// Read computed `name` on `instance`.
pub(crate) fn read(instance: &Observable, name: &Key, deps: &Rc<[Key]>) -> Value {
    let Some(slot) = instance.computed_slot(name) else {
        return first_access(instance, name, deps);
    };

    if slot.is_computing() {
        tracing::warn!(instance = %instance.id(), name = %name, "computed read during its own evaluation, returning cached value");
        return slot.cached();
    }

    if slot.is_maybe_dirty() {
        refresh(instance, name, &slot);
    }
    slot.cached()
}

fn first_access(instance: &Observable, name: &Key, deps: &Rc<[Key]>) -> Value {
    let slot = Rc::new(ComputedSlot::new(deps.clone()));
    // Visible before evaluation so a cyclic read finds it COMPUTING
    instance.insert_computed_slot(name.clone(), slot.clone());

    let value = {
        let _computing = slot.enter();
        let snapshot = read_deps(instance, &slot.deps);
        let value = evaluate(instance, name);
        *slot.snapshot.borrow_mut() = snapshot;
        *slot.cache.borrow_mut() = value.clone();
        value
    };
    slot.mark_clean();

    let effect = {
        let instance = instance.downgrade();
        let slot = Rc::downgrade(&slot);
        let name = name.clone();
        Subscription::new(format!("{COMPUTED_LABEL_PREFIX}{name}"), move || {
            if let (Some(instance), Some(slot)) = (instance.upgrade(), slot.upgrade()) {
                refresh(&instance, &name, &slot);
            }
        })
    };
    instance.add_effect(effect);

    tracing::trace!(instance = %instance.id(), name = %name, "computed initialized");
    value
}

// =============================================================================
// REFRESH
// =============================================================================

/// Re-diff the dependencies and re-evaluate on any difference.
///
/// Returns whether the accessor ran.
fn refresh(instance: &Observable, name: &Key, slot: &ComputedSlot) -> bool {
    if slot.is_computing() {
        return false;
    }

    {
        let _computing = slot.enter();

        let current = read_deps(instance, &slot.deps);
        slot.mark_clean();

        if !snapshot_differs(Some(slot.snapshot.borrow().as_slice()), &current) {
            return false;
        }
        *slot.snapshot.borrow_mut() = current;

        let value = evaluate(instance, name);
        *slot.cache.borrow_mut() = value;
    }

    tracing::trace!(instance = %instance.id(), name = %name, "computed re-evaluated");
    instance.notify_change(name, Some(name));
    true
}

fn read_deps(instance: &Observable, deps: &[Key]) -> Vec<Value> {
    untrack(|| deps.iter().map(|dep| instance.get(dep)).collect())
}

fn evaluate(instance: &Observable, name: &str) -> Value {
    match instance.accessor(name) {
        Some(accessor) => untrack(|| accessor(instance)),
        None => Value::Undefined,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::primitives::class::ObservableClass;
    use crate::reactivity::scheduling::flush;
    use crate::reactivity::tracking::run_tracked;
    use crate::{Subscription, Value};
    use std::cell::Cell;
    use std::rc::Rc;

    fn age_class(runs: &Rc<Cell<u32>>, deps: &[&str]) -> ObservableClass {
        let mut class = ObservableClass::new("User");
        let runs = runs.clone();
        class.field("age", 17).field("name", "gy").accessor("age2", move |this| {
            runs.set(runs.get() + 1);
            this.get("age").as_int().map_or(Value::Undefined, |a| Value::from(a + 1))
        });
        class.define_computed("age2", deps).unwrap();
        class
    }

    #[test]
    fn lazy_until_first_read() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &["age"]).instantiate();
        flush();

        assert_eq!(runs.get(), 0);
        assert_eq!(user.effect_count(), 0);

        assert_eq!(user.get("age2").as_int(), Some(18));
        assert_eq!(runs.get(), 1);
        assert_eq!(user.effect_count(), 1);
    }

    #[test]
    fn cached_between_changes() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &["age"]).instantiate();

        user.get("age2");
        user.get("age2");
        user.set("name", "other");
        user.get("age2");
        flush();
        user.get("age2");
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn read_after_write_is_current() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &["age"]).instantiate();

        assert_eq!(user.get("age2").as_int(), Some(18));
        user.set("age", 20);
        assert_eq!(user.get("age2").as_int(), Some(21));
        assert_eq!(runs.get(), 2);

        // The queued effect finds nothing new
        flush();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_recomputes_without_read() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &["age"]).instantiate();
        user.get("age2");

        user.set("age", 30);
        flush();
        assert_eq!(runs.get(), 2);
        assert_eq!(user.get("age2").as_int(), Some(31));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn one_evaluation_per_batch() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &["age"]).instantiate();
        user.get("age2");

        user.set("age", 1);
        user.set("age", 2);
        user.set("age", 3);
        flush();
        assert_eq!(runs.get(), 2);
        assert_eq!(user.get("age2").as_int(), Some(4));
    }

    #[test]
    fn reverted_change_does_not_recompute() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &["age"]).instantiate();
        user.get("age2");

        user.set("age", 99);
        user.set("age", 17);
        flush();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn empty_deps_never_recompute() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &[]).instantiate();

        assert_eq!(user.get("age2").as_int(), Some(18));
        user.set("age", 40);
        flush();
        assert_eq!(user.get("age2").as_int(), Some(18));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn readers_of_computed_are_notified() {
        let runs = Rc::new(Cell::new(0));
        let user = age_class(&runs, &["age"]).instantiate();

        let hits = Rc::new(Cell::new(0));
        let sub = Subscription::new("render", {
            let hits = hits.clone();
            move || hits.set(hits.get() + 1)
        });
        run_tracked(|| user.get("age2"), &sub);

        // Only the computed's name is a dependency, not what it read
        assert_eq!(user.tracked_keys(&sub), vec![crate::Key::from("age2")]);

        user.set("age", 50);
        flush();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn computed_over_computed() {
        let mut class = ObservableClass::new("Chain");
        class
            .field("a", 1)
            .accessor("b", |this| Value::from(this.get("a").as_int().unwrap_or(0) * 2))
            .accessor("c", |this| Value::from(this.get("b").as_int().unwrap_or(0) + 1));
        class.define_computed("b", &["a"]).unwrap();
        class.define_computed("c", &["b"]).unwrap();

        let chain = class.instantiate();
        assert_eq!(chain.get("c").as_int(), Some(3));

        chain.set("a", 5);
        assert_eq!(chain.get("c").as_int(), Some(11));
        flush();
        assert_eq!(chain.get("c").as_int(), Some(11));
    }

    #[test]
    fn cyclic_computed_does_not_recurse() {
        let mut class = ObservableClass::new("Cycle");
        class
            .field("seed", 1)
            .accessor("x", |this| this.get("y"))
            .accessor("y", |this| this.get("x"));
        class.define_computed("x", &["seed"]).unwrap();
        class.define_computed("y", &["seed"]).unwrap();

        let cycle = class.instantiate();
        assert!(cycle.get("x").is_undefined());
    }
}
