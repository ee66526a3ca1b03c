#![forbid(unsafe_code)]

//! The root of an observer tree and its refresh scheduling.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tendril_core::event_loop::Scheduler;
use tracing::{debug, trace};

use super::getter::Getter;

pub(super) struct ContextInner {
    on_refresh: RefCell<Box<dyn FnMut()>>,
    scheduler: Rc<dyn Scheduler>,
    in_creation: Cell<bool>,
    refresh_scheduled: Cell<bool>,
    /// Bumped by `clear` so a refresh deferred earlier does not fire.
    epoch: Cell<u64>,
    refresh_count: Cell<u64>,
    root: Getter,
}

impl ContextInner {
    /// Called when the root getter resolves.
    pub(super) fn refresh(self: &Rc<Self>) {
        if self.in_creation.get() {
            trace!("refresh suppressed while the context is being created");
            return;
        }
        if self.refresh_scheduled.get() {
            trace!("refresh already scheduled");
            return;
        }
        self.refresh_scheduled.set(true);

        let epoch = self.epoch.get();
        let context = Rc::downgrade(self);
        debug!(epoch, "refresh scheduled");
        self.scheduler.defer(Box::new(move || {
            if let Some(context) = context.upgrade() {
                context.fire(epoch);
            }
        }));
    }

    fn fire(&self, epoch: u64) {
        if self.epoch.get() != epoch {
            debug!(epoch, "discarding refresh scheduled before clear");
            return;
        }
        self.refresh_scheduled.set(false);
        if !self.root.is_resolved() {
            // Something went pending after the refresh was queued. Resolving
            // the root schedules a new one.
            debug!(epoch, "refresh held until the tree resolves");
            return;
        }
        let count = self.refresh_count.get() + 1;
        self.refresh_count.set(count);
        debug!(count, "refresh");
        let mut on_refresh = self.on_refresh.borrow_mut();
        (*on_refresh)();
    }

    fn clear(&self) {
        self.epoch.set(self.epoch.get() + 1);
        self.refresh_scheduled.set(false);
        self.root.clear();
        debug!("observer context cleared");
    }
}

/// The root of a tree of observed values.
///
/// The refresh callback runs on the scheduler's next turn after every value
/// in the tree has delivered, and again after each later change once the
/// tree has re-resolved. Changes that land in the same turn produce a single
/// refresh.
///
/// Values that deliver synchronously while the body runs never trigger a
/// refresh: when `new` returns, whatever the body captured is already the
/// current snapshot.
///
/// Dropping the context clears it.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tendril_core::event_loop::EventLoop;
/// use tendril_core::mutable::Mutable;
/// use tendril_runtime::observer::ObserverContext;
///
/// let event_loop = EventLoop::new();
/// let price = Mutable::new(10);
/// let shown = Rc::new(Cell::new(0));
/// let refreshes = Rc::new(Cell::new(0));
///
/// let s = Rc::clone(&shown);
/// let r = Rc::clone(&refreshes);
/// let context = ObserverContext::new(
///     event_loop.handle(),
///     |getter| getter.observe(price.watch(), move |_, v| s.set(v)),
///     move || r.set(r.get() + 1),
/// );
/// assert_eq!(shown.get(), 10);
/// assert_eq!(refreshes.get(), 0);
///
/// price.set(12);
/// event_loop.run_until_idle().unwrap();
/// assert_eq!(shown.get(), 12);
/// assert_eq!(refreshes.get(), 1);
///
/// context.clear();
/// ```
pub struct ObserverContext {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for ObserverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverContext")
            .field("in_creation", &self.inner.in_creation.get())
            .field("refresh_scheduled", &self.inner.refresh_scheduled.get())
            .field("refresh_count", &self.inner.refresh_count.get())
            .field("root", &self.inner.root)
            .finish()
    }
}

impl ObserverContext {
    /// Create a context, run `body` once with the root getter, and return.
    ///
    /// `on_refresh` is deferred through `scheduler` and never runs while
    /// `body` is executing.
    pub fn new<S>(
        scheduler: S,
        body: impl FnOnce(&Getter),
        on_refresh: impl FnMut() + 'static,
    ) -> Self
    where
        S: Scheduler + 'static,
    {
        let scheduler: Rc<dyn Scheduler> = Rc::new(scheduler);
        let inner = Rc::new_cyclic(|context: &Weak<ContextInner>| ContextInner {
            on_refresh: RefCell::new(Box::new(on_refresh)),
            scheduler,
            in_creation: Cell::new(true),
            refresh_scheduled: Cell::new(false),
            epoch: Cell::new(0),
            refresh_count: Cell::new(0),
            root: Getter::root(Weak::clone(context)),
        });
        let context = Self { inner };
        body(&context.inner.root);
        context.inner.in_creation.set(false);
        debug!(
            root = context.inner.root.id().raw(),
            resolved = context.inner.root.is_resolved(),
            "observer context created"
        );
        context
    }

    /// The root getter. Values observed on it after creation behave exactly
    /// like values observed by the body.
    #[must_use]
    pub fn getter(&self) -> &Getter {
        &self.inner.root
    }

    /// Stop observing every value in the tree.
    ///
    /// Every observable is unsubscribed and a refresh that was scheduled but
    /// has not yet run is cancelled. Idempotent.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Whether every value in the tree has delivered.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.root.is_resolved()
    }

    /// Whether a refresh is waiting for the next turn.
    #[must_use]
    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.refresh_scheduled.get()
    }

    /// Number of times the refresh callback has run.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.get()
    }
}

impl Drop for ObserverContext {
    fn drop(&mut self) {
        self.inner.clear();
    }
}

/// Create an [`ObserverContext`]. See [`ObserverContext::new`].
pub fn observer_context<S>(
    scheduler: S,
    body: impl FnOnce(&Getter),
    on_refresh: impl FnMut() + 'static,
) -> ObserverContext
where
    S: Scheduler + 'static,
{
    ObserverContext::new(scheduler, body, on_refresh)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
