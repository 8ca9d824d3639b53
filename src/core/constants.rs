// ============================================================================
// spark-state - Constants
// Status flags for memoized values and labels for internal plumbing
// ============================================================================

// =============================================================================
// COMPUTED STATUS FLAGS
// =============================================================================

/// Cached value is up-to-date with its dependency snapshot
pub const CLEAN: u32 = 1 << 0;

/// Something on the owning instance was written; dependencies must be re-diffed
pub const MAYBE_DIRTY: u32 = 1 << 1;

/// Accessor is currently being evaluated (re-entrant reads return the cache)
pub const COMPUTING: u32 = 1 << 2;

/// Mask to clear the status bits (CLEAN | MAYBE_DIRTY)
pub const STATUS_MASK: u32 = !(CLEAN | MAYBE_DIRTY);

// =============================================================================
// PLUMBING LABELS
// =============================================================================

/// Label prefix for the tasks installed by a watch
pub const WATCH_LABEL_PREFIX: &str = "w-";

/// Label prefix for the standing effect of a computed
pub const COMPUTED_LABEL_PREFIX: &str = "c-";

// =============================================================================
// SCHEDULER DEFAULTS
// =============================================================================

/// Number of tasks in a single flush after which a runaway warning is logged
pub const DEFAULT_RUNAWAY_THRESHOLD: usize = 10_000;
