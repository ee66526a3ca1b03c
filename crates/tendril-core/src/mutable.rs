#![forbid(unsafe_code)]

//! Shared, version-tracked values with change notification.
//!
//! [`Mutable<T>`] is the simplest value source: a cell that notifies its
//! subscribers whenever it is set to a different value. [`Mutable::watch`]
//! adapts it to the [`Observable`] contract so an observer context can track
//! it.
//!
//! # Architecture
//!
//! `Mutable<T>` uses `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` callbacks; the strong side lives in the
//! [`Subscription`] guard, so dropping the guard unsubscribes. Dead entries
//! are pruned lazily during notification.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op (no version bump,
//!    no notifications).
//! 4. No borrow of the cell is held while a subscriber runs, so subscribers
//!    may read or write the cell.
//! 5. A watch callback that writes the value it watches is not re-entered;
//!    the write is delivered in order once the callback returns.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::event_loop::Scheduler;
use crate::observable::Observable;

type Callback<T> = dyn Fn(&T);

struct MutableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Callback<T>>>,
}

/// A shared value that notifies subscribers when it changes.
///
/// Cloning a `Mutable` creates a new handle to the **same** value.
pub struct Mutable<T> {
    inner: Rc<RefCell<MutableInner<T>>>,
}

impl<T> Clone for Mutable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Mutable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

/// RAII guard for a [`Mutable`] subscriber. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _callback: Box<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl<T: Clone + PartialEq + 'static> Mutable<T> {
    /// Create a new value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MutableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// A clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference.
    ///
    /// # Panics
    ///
    /// Panics if `f` sets this same value (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Number of changes applied so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Set a new value, notifying subscribers if it differs from the current
    /// one.
    pub fn set(&self, value: T) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                false
            } else {
                inner.value = value;
                inner.version += 1;
                true
            }
        };
        if changed {
            self.notify();
        }
    }

    /// Set a new value and notify subscribers even if it is unchanged.
    pub fn set_always(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Modify the value in place. Subscribers are notified only if the
    /// result differs from the previous value.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Register a callback run after each change.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription {
            _callback: Box::new(strong),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// An [`Observable`] that delivers the current value synchronously on
    /// subscribe and every later change synchronously.
    #[must_use]
    pub fn watch(&self) -> MutableWatch<T> {
        MutableWatch::new(self.clone(), None)
    }

    /// An [`Observable`] that delivers the current value, and every later
    /// change, on the scheduler's next turn.
    #[must_use]
    pub fn watch_deferred(&self, scheduler: Rc<dyn Scheduler>) -> MutableWatch<T> {
        MutableWatch::new(self.clone(), Some(scheduler))
    }

    fn notify(&self) {
        let (value, version, live) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|weak| weak.strong_count() > 0);
            let live: Vec<Rc<Callback<T>>> = inner
                .subscribers
                .iter()
                .filter_map(Weak::upgrade)
                .collect();
            (inner.value.clone(), inner.version, live)
        };
        trace!(version, subscribers = live.len(), "mutable changed");
        for callback in live {
            callback(&value);
        }
    }
}

struct WatchState {
    generation: Cell<u64>,
    active: Cell<bool>,
    subscription: RefCell<Option<Subscription>>,
}

impl WatchState {
    fn is_current(&self, generation: u64) -> bool {
        self.active.get() && self.generation.get() == generation
    }
}

/// The subscriber side of one [`MutableWatch::subscribe`] call.
///
/// A callback that sets the value it is watching re-enters `drain`; the new
/// value is queued and delivered after the running callback returns.
struct Delivery<T> {
    callback: RefCell<Box<dyn FnMut(T)>>,
    queue: RefCell<VecDeque<T>>,
    running: Cell<bool>,
}

impl<T> Delivery<T> {
    fn drain(&self, live: impl Fn() -> bool) {
        if self.running.replace(true) {
            return;
        }
        let _running = ResetOnDrop(&self.running);
        loop {
            let Some(value) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            if !live() {
                self.queue.borrow_mut().clear();
                break;
            }
            let mut callback = self.callback.borrow_mut();
            (*callback)(value);
        }
    }
}

/// Clears the flag even if a callback panics.
struct ResetOnDrop<'a>(&'a Cell<bool>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// [`Observable`] adapter over a [`Mutable`].
///
/// Unsubscribing drops the underlying [`Subscription`] and discards any
/// deferred delivery that is still queued. Dropping the watch unsubscribes.
pub struct MutableWatch<T> {
    source: Mutable<T>,
    scheduler: Option<Rc<dyn Scheduler>>,
    state: Rc<WatchState>,
}

impl<T> fmt::Debug for MutableWatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableWatch")
            .field("deferred", &self.scheduler.is_some())
            .field("active", &self.state.active.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> MutableWatch<T> {
    fn new(source: Mutable<T>, scheduler: Option<Rc<dyn Scheduler>>) -> Self {
        Self {
            source,
            scheduler,
            state: Rc::new(WatchState {
                generation: Cell::new(0),
                active: Cell::new(false),
                subscription: RefCell::new(None),
            }),
        }
    }

    /// Whether a subscriber is currently attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.active.get()
    }

    /// The watched value.
    #[must_use]
    pub fn source(&self) -> &Mutable<T> {
        &self.source
    }
}

impl<T: Clone + PartialEq + 'static> Observable for MutableWatch<T> {
    type Value = T;

    fn subscribe(&self, callback: Box<dyn FnMut(T)>) {
        let generation = self.state.generation.get() + 1;
        self.state.generation.set(generation);
        self.state.active.set(true);

        let delivery = Rc::new(Delivery {
            callback: RefCell::new(callback),
            queue: RefCell::new(VecDeque::new()),
            running: Cell::new(false),
        });
        let state = Rc::downgrade(&self.state);
        let scheduler = self.scheduler.clone();
        let deliver: Rc<dyn Fn(T)> = Rc::new(move |value: T| {
            let run = {
                let state = Weak::clone(&state);
                let delivery = Rc::clone(&delivery);
                move || {
                    delivery.queue.borrow_mut().push_back(value);
                    delivery.drain(|| {
                        state
                            .upgrade()
                            .is_some_and(|state| state.is_current(generation))
                    });
                }
            };
            match &scheduler {
                Some(scheduler) => scheduler.defer(Box::new(run)),
                None => run(),
            }
        });

        let on_change = Rc::clone(&deliver);
        let subscription = self.source.subscribe(move |value: &T| on_change(value.clone()));
        *self.state.subscription.borrow_mut() = Some(subscription);

        deliver(self.source.get());
    }

    fn unsubscribe(&self) {
        self.state.active.set(false);
        self.state
            .generation
            .set(self.state.generation.get() + 1);
        let previous = self.state.subscription.borrow_mut().take();
        drop(previous);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
