// ============================================================================
// spark-state - Primitives Module
// Subscriptions, observable instances, classes, computeds, watches
// ============================================================================

pub mod class;
pub mod computed;
pub mod debug;
pub mod observable;
pub mod registry;
pub mod subscription;
pub mod watch;

// Re-export for convenience
pub use class::{AccessorFn, MethodFn, ObservableClass};
pub use debug::{dependents_of, instance_count, live_instances};
pub use observable::{make_observable, Observable, WeakObservable};
pub use registry::{DependencyMap, EffectList};
pub use subscription::{Callback, CleanupFn, Subscription, WeakSubscription};
