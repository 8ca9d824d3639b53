// ============================================================================
// spark-state - Tracking Context
// Thread-local stack of the subscriptions currently collecting dependencies
// ============================================================================

use std::cell::RefCell;

use crate::primitives::subscription::Subscription;

// =============================================================================
// TRACKING CONTEXT
// =============================================================================

/// Thread-local tracking state.
///
/// Only the top frame is ever "active", so at any instant zero or one
/// subscription collects reads. Nested tracking pushes a frame and pops it on
/// exit, which keeps re-entrant tracking stack-correct. A `None` frame is an
/// untracked region: reads inside it record nothing even if an outer frame
/// is tracking.
pub struct TrackingContext {
    frames: RefCell<Vec<Option<Subscription>>>,
}

impl TrackingContext {
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
        }
    }

    /// Push a frame. `None` suspends tracking until the frame is popped.
    pub fn push_frame(&self, frame: Option<Subscription>) {
        self.frames.borrow_mut().push(frame);
    }

    /// Pop the top frame, returning it.
    pub fn pop_frame(&self) -> Option<Option<Subscription>> {
        self.frames.borrow_mut().pop()
    }

    /// The subscription collecting reads right now, if any
    pub fn current(&self) -> Option<Subscription> {
        self.frames.borrow().last().cloned().flatten()
    }

    /// Number of frames on the stack
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Check if a subscription is collecting reads
    pub fn is_tracking(&self) -> bool {
        matches!(self.frames.borrow().last(), Some(Some(_)))
    }

    /// Check if the top frame is an untracked region
    pub fn is_untracking(&self) -> bool {
        matches!(self.frames.borrow().last(), Some(None))
    }
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    static CONTEXT: TrackingContext = TrackingContext::new();
}

/// Access the thread-local tracking context.
pub fn with_context<R>(f: impl FnOnce(&TrackingContext) -> R) -> R {
    CONTEXT.with(f)
}

/// Check if a subscription is currently collecting reads
pub fn is_tracking() -> bool {
    with_context(|ctx| ctx.is_tracking())
}

/// Check if the innermost frame is untracked
pub fn is_untracking() -> bool {
    with_context(|ctx| ctx.is_untracking())
}

/// The subscription currently collecting reads, if any
pub fn current_subscription() -> Option<Subscription> {
    with_context(|ctx| ctx.current())
}

/// Depth of nested tracking/untracking frames
pub fn tracking_depth() -> usize {
    with_context(|ctx| ctx.depth())
}

// =============================================================================
// TESTS
// =============================================================================
