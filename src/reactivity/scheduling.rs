// ============================================================================
// spark-state - Scheduling
// Deduplicating, batched task queue flushed once per tick
// ============================================================================
//
// Writes never run listeners inline. They enqueue subscriptions here, and a
// flush runs each distinct subscription once. Without a host event loop there
// is no microtask to hang the flush on, so "next tick" is whatever the host
// says it is: either it installs a `request_tick` hook (called once per
// pending flush) and later calls `tick()`, or it just calls `tick()` /
// `flush()` at its own yield points.
//
// Key functions:
// - enqueue: queue a task, optionally flushing immediately
// - flush: drain the live queue, each task at most once
// - tick: flush if a flush was requested
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::core::constants::DEFAULT_RUNAWAY_THRESHOLD;
use crate::core::types::SubscriptionId;
use crate::primitives::subscription::Subscription;

/// Anything schedulable is a subscription: `{ callback? }` with identity.
pub type Task = Subscription;

/// Host hook invoked when a flush becomes pending
pub type TickHook = Rc<dyn Fn()>;

// =============================================================================
// OPTIONS & CONFIG
// =============================================================================

/// Per-enqueue options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Flush synchronously before `enqueue` returns
    pub immediate: bool,
}

impl EnqueueOptions {
    pub fn immediate() -> Self {
        Self { immediate: true }
    }
}

/// Scheduler configuration.
///
/// # Example
///
/// ```
/// use spark_state::{configure_scheduler, SchedulerConfig};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let requested = Rc::new(Cell::new(0));
/// let r = requested.clone();
/// configure_scheduler(
///     SchedulerConfig::default()
///         .with_request_tick(move || r.set(r.get() + 1))
///         .with_runaway_threshold(500),
/// );
/// ```
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Called once each time a flush becomes pending. The host is expected to
    /// call `tick()` at its next yield point.
    pub request_tick: Option<TickHook>,

    /// Tasks per flush after which a runaway warning is logged
    pub runaway_threshold: usize,
}

impl SchedulerConfig {
    pub fn with_request_tick(mut self, hook: impl Fn() + 'static) -> Self {
        self.request_tick = Some(Rc::new(hook));
        self
    }

    pub fn with_runaway_threshold(mut self, threshold: usize) -> Self {
        self.runaway_threshold = threshold;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            request_tick: None,
            runaway_threshold: DEFAULT_RUNAWAY_THRESHOLD,
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("request_tick", &self.request_tick.is_some())
            .field("runaway_threshold", &self.runaway_threshold)
            .finish()
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// FIFO task queue with identity deduplication per flush.
///
/// The kernel uses one per thread (see [`with_scheduler`]); composing
/// subsystems may create their own.
pub struct Scheduler {
    /// Live queue, drained by `flush`
    queue: RefCell<VecDeque<Task>>,

    /// Tasks re-enqueued after they already ran in the current flush
    carried: RefCell<Vec<Task>>,

    /// A flush was requested and has not happened yet
    pending: Cell<bool>,

    /// Ids run in the innermost active flush (`None` outside a flush)
    ran: RefCell<Option<FxHashSet<SubscriptionId>>>,

    /// Nesting depth of active flushes (immediate enqueues nest)
    flush_depth: Cell<u32>,

    config: RefCell<SchedulerConfig>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            carried: RefCell::new(Vec::new()),
            pending: Cell::new(false),
            ran: RefCell::new(None),
            flush_depth: Cell::new(0),
            config: RefCell::new(config),
        }
    }

    /// Replace the configuration.
    pub fn configure(&self, config: SchedulerConfig) {
        *self.config.borrow_mut() = config;
    }

    // =========================================================================
    // ENQUEUE
    // =========================================================================

    /// Queue `task`.
    ///
    /// During a flush, a task that has not yet run in that flush joins the
    /// same pass. A task that already ran in it is carried over to the next
    /// flush instead, so no task runs twice in one pass and no change is lost.
    pub fn enqueue(&self, task: Task, options: EnqueueOptions) {
        let already_ran = !options.immediate
            && self
                .ran
                .borrow()
                .as_ref()
                .is_some_and(|ran| ran.contains(&task.id()));

        if already_ran {
            tracing::trace!(task = %task.id(), label = task.label(), "carry over to next flush");
            self.carried.borrow_mut().push(task);
        } else {
            tracing::trace!(task = %task.id(), label = task.label(), "enqueue");
            self.queue.borrow_mut().push_back(task);
        }

        if options.immediate {
            self.flush();
            return;
        }

        if self.flush_depth.get() == 0 {
            self.request_flush();
        }
    }

    /// Ask the host for a tick unless one is already pending.
    fn request_flush(&self) {
        if self.pending.replace(true) {
            return;
        }
        let hook = self.config.borrow().request_tick.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    // =========================================================================
    // FLUSH
    // =========================================================================

    /// Drain the queue, running each distinct task at most once.
    ///
    /// Returns the number of callbacks that ran.
    pub fn flush(&self) -> usize {
        self.pending.set(false);
        let depth = self.flush_depth.get() + 1;
        self.flush_depth.set(depth);
        let outer_ran = self.ran.replace(Some(FxHashSet::default()));

        // Restores flush state even if a task panics
        struct FlushGuard<'a> {
            scheduler: &'a Scheduler,
            outer_ran: Option<Option<FxHashSet<SubscriptionId>>>,
        }

        impl Drop for FlushGuard<'_> {
            fn drop(&mut self) {
                let scheduler = self.scheduler;
                *scheduler.ran.borrow_mut() = self.outer_ran.take().flatten();
                let depth = scheduler.flush_depth.get().saturating_sub(1);
                scheduler.flush_depth.set(depth);

                if depth == 0 {
                    let carried = scheduler.carried.take();
                    scheduler.queue.borrow_mut().extend(carried);
                    if !scheduler.queue.borrow().is_empty() {
                        scheduler.request_flush();
                    }
                }
            }
        }

        let _guard = FlushGuard {
            scheduler: self,
            outer_ran: Some(outer_ran),
        };

        let threshold = self.config.borrow().runaway_threshold;
        let mut executed = 0usize;

        tracing::trace!(depth, queued = self.queue.borrow().len(), "flush start");

        loop {
            // Pop under a short borrow; tasks may enqueue while they run
            let next = self.queue.borrow_mut().pop_front();
            let Some(task) = next else { break };

            let first_run = self
                .ran
                .borrow_mut()
                .as_mut()
                .is_none_or(|ran| ran.insert(task.id()));
            if !first_run {
                continue;
            }

            if task.run() {
                executed += 1;
                if executed == threshold {
                    tracing::warn!(
                        executed,
                        label = task.label(),
                        "flush exceeded runaway threshold, tasks may be re-triggering each other"
                    );
                }
            }
        }

        tracing::trace!(depth, executed, "flush end");
        executed
    }

    /// Flush if a flush was requested. The host calls this at its yield point.
    pub fn tick(&self) -> usize {
        if self.pending.get() { self.flush() } else { 0 }
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Whether a flush was requested and has not happened yet
    pub fn has_pending_flush(&self) -> bool {
        self.pending.get()
    }

    /// Whether a flush is running right now
    pub fn is_flushing(&self) -> bool {
        self.flush_depth.get() > 0
    }

    /// Number of queued task entries (duplicates included)
    pub fn queued_len(&self) -> usize {
        self.queue.borrow().len() + self.carried.borrow().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.queued_len())
            .field("pending", &self.pending.get())
            .field("flush_depth", &self.flush_depth.get())
            .finish()
    }
}

// =============================================================================
// THREAD-LOCAL SCHEDULER
// =============================================================================

thread_local! {
    static SCHEDULER: Scheduler = Scheduler::new();
}

/// Access the thread's kernel scheduler.
pub fn with_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    SCHEDULER.with(f)
}

/// Queue a task on the thread's scheduler.
pub fn enqueue(task: Task, options: EnqueueOptions) {
    with_scheduler(|s| s.enqueue(task, options));
}

/// Flush the thread's scheduler now.
pub fn flush() -> usize {
    with_scheduler(|s| s.flush())
}

/// Flush the thread's scheduler if a flush is pending.
pub fn tick() -> usize {
    with_scheduler(|s| s.tick())
}

/// Whether the thread's scheduler has a flush pending
pub fn has_pending_flush() -> bool {
    with_scheduler(|s| s.has_pending_flush())
}

/// Replace the thread's scheduler configuration.
pub fn configure_scheduler(config: SchedulerConfig) {
    with_scheduler(|s| s.configure(config));
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(label: &str) -> (Task, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (Subscription::new(label, move || c.set(c.get() + 1)), count)
    }

    #[test]
    fn dedup_within_flush() {
        let scheduler = Scheduler::new();
        let (task, count) = counter("t");

        for _ in 0..5 {
            scheduler.enqueue(task.clone(), EnqueueOptions::default());
        }
        assert_eq!(scheduler.queued_len(), 5);
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(count.get(), 1);

        // Re-armed for the next round
        scheduler.enqueue(task.clone(), EnqueueOptions::default());
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn fifo_order() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let tasks: Vec<Task> = (0..3)
            .map(|i| {
                let log = log.clone();
                Subscription::new(format!("t{i}"), move || log.borrow_mut().push(i))
            })
            .collect();

        scheduler.enqueue(tasks[2].clone(), EnqueueOptions::default());
        scheduler.enqueue(tasks[0].clone(), EnqueueOptions::default());
        scheduler.enqueue(tasks[1].clone(), EnqueueOptions::default());
        scheduler.enqueue(tasks[2].clone(), EnqueueOptions::default());
        scheduler.flush();

        assert_eq!(*log.borrow(), vec![2, 0, 1]);
    }

    #[test]
    fn single_pending_request() {
        let requested = Rc::new(Cell::new(0));
        let r = requested.clone();
        let scheduler =
            Scheduler::with_config(SchedulerConfig::default().with_request_tick(move || r.set(r.get() + 1)));
        let (a, _) = counter("a");
        let (b, _) = counter("b");

        scheduler.enqueue(a, EnqueueOptions::default());
        scheduler.enqueue(b, EnqueueOptions::default());
        assert_eq!(requested.get(), 1);
        assert!(scheduler.has_pending_flush());

        assert_eq!(scheduler.tick(), 2);
        assert!(!scheduler.has_pending_flush());
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn immediate_flushes_inline() {
        let scheduler = Scheduler::new();
        let (task, count) = counter("t");

        scheduler.enqueue(task, EnqueueOptions::immediate());
        assert_eq!(count.get(), 1);
        assert_eq!(scheduler.queued_len(), 0);
    }

    #[test]
    fn enqueue_during_flush_joins_same_pass() {
        let scheduler = Rc::new(Scheduler::new());
        let (later, later_count) = counter("later");

        let first = {
            let scheduler = scheduler.clone();
            let later = later.clone();
            Subscription::new("first", move || {
                scheduler.enqueue(later.clone(), EnqueueOptions::default());
            })
        };

        scheduler.enqueue(first, EnqueueOptions::default());
        assert_eq!(scheduler.flush(), 2);
        assert_eq!(later_count.get(), 1);
        assert!(!scheduler.has_pending_flush());
    }

    #[test]
    fn rerun_after_run_is_carried_over() {
        let scheduler = Rc::new(Scheduler::new());
        let runs = Rc::new(Cell::new(0));

        let task = Subscription::detached("self-requeue");
        {
            let scheduler = scheduler.clone();
            let runs = runs.clone();
            let weak = task.downgrade();
            task.set_callback(move || {
                runs.set(runs.get() + 1);
                if runs.get() < 3 {
                    if let Some(me) = weak.upgrade() {
                        scheduler.enqueue(me, EnqueueOptions::default());
                    }
                }
            });
        }

        scheduler.enqueue(task, EnqueueOptions::default());
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(runs.get(), 1);
        assert!(scheduler.has_pending_flush());

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(runs.get(), 3);
        assert!(!scheduler.has_pending_flush());
    }

    #[test]
    fn immediate_enqueue_inside_flush_nests() {
        let scheduler = Rc::new(Scheduler::new());
        let (inner, inner_count) = counter("inner");
        let first_runs = Rc::new(Cell::new(0));
        let inner_seen = Rc::new(Cell::new(0));

        let first = Subscription::detached("first");
        {
            let scheduler = scheduler.clone();
            let first_runs = first_runs.clone();
            let inner_seen = inner_seen.clone();
            let weak = first.downgrade();
            first.set_callback(move || {
                first_runs.set(first_runs.get() + 1);
                if first_runs.get() > 1 {
                    return;
                }
                scheduler.enqueue(inner.clone(), EnqueueOptions::immediate());
                inner_seen.set(inner_count.get());
                assert!(scheduler.is_flushing());

                // Outer ran set is back in place: this is carried over
                if let Some(me) = weak.upgrade() {
                    scheduler.enqueue(me, EnqueueOptions::default());
                }
            });
        }

        scheduler.enqueue(first, EnqueueOptions::default());
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(inner_seen.get(), 1, "inner ran before enqueue returned");
        assert_eq!(first_runs.get(), 1);
        assert!(!scheduler.is_flushing());
        assert!(scheduler.has_pending_flush());

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(first_runs.get(), 2);
    }

    #[test]
    fn panicking_task_leaves_scheduler_usable() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let requested = Rc::new(Cell::new(0));
        let r = requested.clone();
        let scheduler =
            Scheduler::with_config(SchedulerConfig::default().with_request_tick(move || r.set(r.get() + 1)));

        let armed = Rc::new(Cell::new(true));
        let failing = {
            let armed = armed.clone();
            Subscription::new("failing", move || {
                if armed.replace(false) {
                    panic!("task failed");
                }
            })
        };
        let (after, after_count) = counter("after");

        scheduler.enqueue(failing.clone(), EnqueueOptions::default());
        scheduler.enqueue(after, EnqueueOptions::default());
        assert_eq!(requested.get(), 1);

        let result = catch_unwind(AssertUnwindSafe(|| scheduler.flush()));
        assert!(result.is_err());

        assert!(!scheduler.is_flushing());
        assert_eq!(scheduler.queued_len(), 1, "remaining task still queued");
        assert!(scheduler.has_pending_flush());
        assert_eq!(requested.get(), 2, "flush re-requested");
        assert_eq!(after_count.get(), 0);

        // The dedup set was cleared, so the failed task may run again
        scheduler.enqueue(failing, EnqueueOptions::default());
        assert_eq!(scheduler.tick(), 2);
        assert_eq!(after_count.get(), 1);
        assert!(!scheduler.has_pending_flush());
    }

    #[test]
    fn detached_task_is_skipped() {
        let scheduler = Scheduler::new();
        let (task, count) = counter("t");
        scheduler.enqueue(task.clone(), EnqueueOptions::default());
        task.detach();
        assert_eq!(scheduler.flush(), 0);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn thread_local_scheduler() {
        let (task, count) = counter("t");
        enqueue(task.clone(), EnqueueOptions::default());
        enqueue(task, EnqueueOptions::default());
        assert!(has_pending_flush());
        assert_eq!(tick(), 1);
        assert_eq!(count.get(), 1);
        assert_eq!(flush(), 0);
    }
}
