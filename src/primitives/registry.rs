// ============================================================================
// spark-state - Dependency Registries
// Per-instance subscription→keys map and standing effect list
// ============================================================================
//
// Both registries belong to exactly one observable instance.
//
// The dependency map holds subscriptions weakly: an instance never keeps a
// listener (or what its callback captured) alive. Entries keep insertion
// order so fine-grained dispatch enqueues in the order subscriptions first
// read from the instance.
//
// The effect list owns its tasks (computed recompute, watch dispatch); those
// tasks point back at the instance weakly.
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};

use crate::core::types::{Key, SubscriptionId};
use crate::primitives::subscription::{Subscription, WeakSubscription};
use crate::reactivity::scheduling::Task;

// =============================================================================
// DEPENDENCY MAP
// =============================================================================

#[derive(Debug)]
struct DependencyEntry {
    subscription: WeakSubscription,
    keys: FxHashSet<Key>,
}

/// Subscription → set of keys it read while it was the tracking context.
///
/// Entries live in an insertion-ordered slot vector with an id → slot index.
/// Removal leaves a hole that is compacted once holes outnumber live entries.
#[derive(Debug, Default)]
pub struct DependencyMap {
    slots: Vec<Option<DependencyEntry>>,
    index: FxHashMap<SubscriptionId, usize>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: SubscriptionId) -> Option<&DependencyEntry> {
        self.index.get(&id).and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Record that `subscription` read `key`.
    ///
    /// Returns `true` if this created the subscription's entry, i.e. the
    /// caller must register the removal cleanup on the subscription.
    pub fn record(&mut self, subscription: &Subscription, key: &Key) -> bool {
        let id = subscription.id();
        if let Some(&slot) = self.index.get(&id) {
            if let Some(entry) = self.slots[slot].as_mut() {
                if !entry.keys.contains(&**key) {
                    entry.keys.insert(key.clone());
                }
            }
            return false;
        }

        let mut keys = FxHashSet::default();
        keys.insert(key.clone());
        self.index.insert(id, self.slots.len());
        self.slots.push(Some(DependencyEntry {
            subscription: subscription.downgrade(),
            keys,
        }));
        true
    }

    /// Remove a subscription's entry. Returns whether there was one.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(slot) = self.index.remove(&id) else {
            return false;
        };
        self.slots[slot] = None;
        if self.slots.len() > 2 * self.index.len() {
            self.compact();
        }
        true
    }

    /// Drop the holes and rebuild the index, keeping entry order.
    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(entry) = entry {
                self.index.insert(entry.subscription.id(), slot);
            }
        }
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.index.contains_key(&id)
    }

    /// Keys recorded for a subscription, sorted.
    pub fn keys_of(&self, id: SubscriptionId) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .entry(id)
            .map(|entry| entry.keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Subscriptions whose key set contains `key`, in insertion order.
    pub fn subscribers_of(&self, key: &str) -> Vec<WeakSubscription> {
        self.slots
            .iter()
            .flatten()
            .filter(|e| e.keys.contains(key))
            .map(|e| e.subscription.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// =============================================================================
// EFFECT LIST
// =============================================================================

/// Ordered standing effects, all enqueued on any write to the instance.
#[derive(Debug, Default)]
pub struct EffectList {
    effects: Vec<Task>,
}

impl EffectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Task) {
        self.effects.push(effect);
    }

    /// Copy of the list, so dispatch can run without holding a borrow.
    pub fn snapshot(&self) -> Vec<Task> {
        self.effects.clone()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
