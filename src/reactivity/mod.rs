// ============================================================================
// spark-state - Reactivity Module
// Dependency tracking, identity comparison and batched scheduling
// ============================================================================

pub mod equality;
pub mod scheduling;
pub mod tracking;

// Re-export main tracking functions
pub use tracking::{dispose, rerun_tracked, run_tracked, try_run_tracked, untrack};

// Re-export scheduling functions
pub use scheduling::{
    configure_scheduler, enqueue, flush, has_pending_flush, tick, with_scheduler, EnqueueOptions,
    Scheduler, SchedulerConfig, Task, TickHook,
};

// Re-export equality functions
pub use equality::{identical, not_identical, snapshot_differs};
