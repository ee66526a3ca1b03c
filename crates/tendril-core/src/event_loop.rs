#![forbid(unsafe_code)]

//! Single-threaded, deterministic event loop.
//!
//! The loop owns two queues: a FIFO of tasks that are ready to run on the
//! next turn, and a timer heap keyed on a virtual clock. Nothing here reads
//! wall-clock time; [`EventLoop::advance`] is the only way time moves, which
//! keeps every test reproducible.
//!
//! # Turns
//!
//! A turn runs exactly the tasks that were ready when it began. A task that
//! defers more work during a turn lands in the *next* turn. This is the
//! "next tick" primitive the observer context relies on to coalesce bursts of
//! updates into a single refresh.
//!
//! # Invariants
//!
//! 1. Tasks deferred during turn `n` run in turn `n + 1`, never in turn `n`.
//! 2. Ready tasks run in the order they were deferred.
//! 3. Timers fire in deadline order; equal deadlines fire in scheduling order.
//! 4. The virtual clock never moves backwards.
//!
//! # Failure Modes
//!
//! - **Runaway re-deferral**: a task that defers itself forever would make a
//!   drain spin. Drains are bounded by [`LoopConfig::max_turns`] and report
//!   [`LoopError::TurnLimitExceeded`].
//! - **Panicking task**: the panic propagates out of [`EventLoop::turn`].
//!   Tasks of that turn that had not run yet are put back at the front of
//!   the ready queue, ahead of anything deferred during the turn.
//! - **Dropped loop**: [`LoopHandle`] is weak. Deferring onto a loop that has
//!   been dropped discards the task and logs a warning.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tendril_core::event_loop::{EventLoop, Scheduler};
//!
//! let event_loop = EventLoop::new();
//! let hits = Rc::new(Cell::new(0));
//! let h = Rc::clone(&hits);
//! event_loop.handle().defer(Box::new(move || h.set(h.get() + 1)));
//!
//! assert_eq!(hits.get(), 0);
//! event_loop.run_until_idle().unwrap();
//! assert_eq!(hits.get(), 1);
//! ```

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};
use web_time::Duration;

use crate::error::{LoopError, Result};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Something that can run a task on a later turn.
///
/// This is the seam between the observer context and whatever drives it.
/// [`LoopHandle`] is the in-crate implementation; embedders with their own
/// loop implement this trait directly.
pub trait Scheduler {
    /// Queue `task` to run on the next turn. Must not run it synchronously.
    fn defer(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn defer(&self, task: Task) {
        (**self).defer(task);
    }
}

/// Configuration for [`EventLoop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Maximum number of turns a single drain may take before it gives up.
    /// Default: 10_000.
    pub max_turns: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { max_turns: 10_000 }
    }
}

impl LoopConfig {
    /// Set the per-drain turn budget.
    #[must_use]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}

struct Timer {
    deadline: Duration,
    seq: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

struct LoopInner {
    ready: RefCell<VecDeque<Task>>,
    timers: RefCell<BinaryHeap<Reverse<Timer>>>,
    now: Cell<Duration>,
    next_seq: Cell<u64>,
    turns: Cell<u64>,
}

impl LoopInner {
    fn push_ready(&self, task: Task) {
        self.ready.borrow_mut().push_back(task);
    }

    fn push_timer(&self, delay: Duration, task: Task) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let deadline = self
            .now
            .get()
            .checked_add(delay)
            .unwrap_or(Duration::MAX);
        self.timers
            .borrow_mut()
            .push(Reverse(Timer { deadline, seq, task }));
    }

    fn has_ready(&self) -> bool {
        !self.ready.borrow().is_empty()
    }

    fn pop_due(&self, target: Duration) -> Option<Timer> {
        let mut timers = self.timers.borrow_mut();
        let is_due = timers
            .peek()
            .is_some_and(|Reverse(timer)| timer.deadline <= target);
        if is_due {
            timers.pop().map(|Reverse(timer)| timer)
        } else {
            None
        }
    }
}

/// The tasks of a turn that have not run yet. If a task panics, the rest
/// go back to the front of the ready queue.
struct Batch<'a> {
    inner: &'a LoopInner,
    rest: VecDeque<Task>,
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if self.rest.is_empty() {
            return;
        }
        warn!(requeued = self.rest.len(), "task panicked mid-turn");
        let mut ready = self.inner.ready.borrow_mut();
        while let Some(task) = self.rest.pop_back() {
            ready.push_front(task);
        }
    }
}

/// A deterministic single-threaded event loop.
///
/// The loop is not `Send`; everything it runs shares one logical thread.
pub struct EventLoop {
    inner: Rc<LoopInner>,
    config: LoopConfig,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.inner.now.get())
            .field("ready", &self.inner.ready.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("turns", &self.inner.turns.get())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a loop with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    /// Create a loop with an explicit configuration.
    #[must_use]
    pub fn with_config(config: LoopConfig) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                ready: RefCell::new(VecDeque::new()),
                timers: RefCell::new(BinaryHeap::new()),
                now: Cell::new(Duration::ZERO),
                next_seq: Cell::new(0),
                turns: Cell::new(0),
            }),
            config,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// A weak handle for deferring work onto this loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Current virtual time, measured from loop creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    /// Number of ready tasks plus pending timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.ready.borrow().len() + self.inner.timers.borrow().len()
    }

    /// Whether no task is ready to run. Pending timers do not count.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.inner.has_ready()
    }

    /// Total number of non-empty turns run so far.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.inner.turns.get()
    }

    /// Run one turn: every task that was ready when the turn began.
    ///
    /// Returns the number of tasks run.
    pub fn turn(&self) -> usize {
        let tasks = std::mem::take(&mut *self.inner.ready.borrow_mut());
        let count = tasks.len();
        if count == 0 {
            return 0;
        }
        let turn = self.inner.turns.get() + 1;
        self.inner.turns.set(turn);
        trace!(turn, tasks = count, "event loop turn");
        let mut batch = Batch {
            inner: &self.inner,
            rest: tasks,
        };
        while let Some(task) = batch.rest.pop_front() {
            task();
        }
        count
    }

    /// Run turns until no task is ready.
    ///
    /// Timers are not fired; use [`advance`](Self::advance) for that.
    /// Returns the total number of tasks run.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut total = 0;
        let mut turns = 0;
        while self.inner.has_ready() {
            if turns == self.config.max_turns {
                warn!(limit = self.config.max_turns, "event loop drain exceeded turn budget");
                return Err(LoopError::TurnLimitExceeded {
                    limit: self.config.max_turns,
                });
            }
            total += self.turn();
            turns += 1;
        }
        Ok(total)
    }

    /// Move the virtual clock forward by `delay`, firing due timers.
    ///
    /// Ready tasks are drained first. Each due timer then runs at its own
    /// deadline, followed by a full drain, so work a timer defers is
    /// observed before the next timer fires. Returns the total number of
    /// tasks run.
    pub fn advance(&self, delay: Duration) -> Result<usize> {
        let target = self
            .inner
            .now
            .get()
            .checked_add(delay)
            .unwrap_or(Duration::MAX);
        let mut total = self.run_until_idle()?;
        while let Some(timer) = self.inner.pop_due(target) {
            let now = self.inner.now.get().max(timer.deadline);
            self.inner.now.set(now);
            self.inner.push_ready(timer.task);
            total += self.run_until_idle()?;
        }
        self.inner.now.set(target);
        Ok(total)
    }
}

/// A cloneable, weak handle to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    inner: Weak<LoopInner>,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl LoopHandle {
    /// Whether the loop this handle points at still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Current virtual time of the loop, or `None` if it was dropped.
    #[must_use]
    pub fn now(&self) -> Option<Duration> {
        self.inner.upgrade().map(|inner| inner.now.get())
    }

    /// Run `task` once the virtual clock has moved `delay` past now.
    pub fn defer_after(&self, delay: Duration, task: Task) {
        match self.inner.upgrade() {
            Some(inner) => inner.push_timer(delay, task),
            None => warn!(?delay, "timer scheduled on a dropped event loop"),
        }
    }
}

impl Scheduler for LoopHandle {
    fn defer(&self, task: Task) {
        match self.inner.upgrade() {
            Some(inner) => inner.push_ready(task),
            None => warn!("task deferred onto a dropped event loop"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
