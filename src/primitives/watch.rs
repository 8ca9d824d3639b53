// ============================================================================
// spark-state - Watch
// Run a method when any of its named dependencies changed
// ============================================================================
//
// Each instance gets one standing effect per watch. On every coarse dispatch
// the effect re-reads the dependency list and compares it with the last
// snapshot. A difference does not call the method inline: it enqueues a
// per-instance method task, so a burst of writes (or a chain of computeds
// re-dispatching) still runs the method once per flush.
// ============================================================================

use std::cell::RefCell;

use crate::core::constants::WATCH_LABEL_PREFIX;
use crate::core::types::Value;
use crate::primitives::class::WatchDef;
use crate::primitives::observable::Observable;
use crate::primitives::subscription::Subscription;
use crate::reactivity::equality::snapshot_differs;
use crate::reactivity::scheduling::{enqueue, EnqueueOptions};
use crate::reactivity::tracking::untrack;

/// Install `def` on `instance`.
///
/// The first run of the effect has no snapshot and always counts as a change.
pub(crate) fn install(instance: &Observable, def: &WatchDef) {
    let label = format!("{WATCH_LABEL_PREFIX}{}", def.method);

    let method_task = {
        let instance = instance.downgrade();
        let method = def.method.clone();
        Subscription::new(label.as_str(), move || {
            if let Some(instance) = instance.upgrade() {
                instance.call(&method);
            }
        })
    };

    let effect = {
        let instance = instance.downgrade();
        let deps = def.deps.clone();
        let snapshot: RefCell<Option<Vec<Value>>> = RefCell::new(None);
        Subscription::new(label, move || {
            let Some(instance) = instance.upgrade() else {
                return;
            };
            let current: Vec<Value> = untrack(|| deps.iter().map(|dep| instance.get(dep)).collect());
            let differs = snapshot_differs(snapshot.borrow().as_deref(), &current);
            *snapshot.borrow_mut() = Some(current);

            if differs {
                tracing::trace!(instance = %instance.id(), method = method_task.label(), "watch triggered");
                enqueue(method_task.clone(), EnqueueOptions::default());
            }
        })
    };

    instance.add_effect(effect);
}

// =============================================================================
// TESTS
// =============================================================================
