#![forbid(unsafe_code)]

//! Getter nodes: one per `observe` call, arranged as a tree under an
//! [`ObserverContext`](super::ObserverContext).
//!
//! # Resolution
//!
//! A getter is *resolved* when its unresolved-children set is empty. A child
//! enters its parent's set when it is created and again whenever a new value
//! arrives for it, because the delivery callback rebuilds the child's subtree
//! from scratch. If the parent was resolved until then, the parent enters its
//! own parent's set, and so on up to the first ancestor that was already
//! waiting; an unresolved getter is therefore always in its parent's set and
//! the root is resolved only when the whole tree is. The child leaves the set
//! once its subtree has resolved, at which point the parent checks whether it
//! too has become resolved and, if so, tells its own parent. The root reports
//! to the context, which schedules a refresh.
//!
//! While a delivery callback runs, the child is marked as *building*: nested
//! observations that resolve synchronously inside the callback do not
//! propagate past it, so a half-built subtree never triggers a refresh.
//!
//! # Epochs
//!
//! Every [`Getter::clear`] bumps the getter's epoch. A delivery closure
//! remembers the epoch of the getter it was registered on and ignores values
//! that arrive after that getter has been cleared.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tendril_core::observable::{Observable, Unwatch};
use tracing::{trace, warn};

use super::context::ContextInner;

static NEXT_GETTER_ID: AtomicU64 = AtomicU64::new(1);

fn next_getter_id() -> GetterId {
    GetterId(NEXT_GETTER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Unique identifier for a getter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GetterId(u64);

impl GetterId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
pub(super) enum Parent {
    Context(Weak<ContextInner>),
    Getter(Weak<RefCell<GetterNode>>),
}

pub(super) struct GetterNode {
    id: GetterId,
    parent: Parent,
    epoch: u64,
    building: bool,
    unresolved: HashSet<GetterId>,
    children: Vec<Getter>,
    observables: Vec<Rc<dyn Unwatch>>,
}

/// A node in an observer tree, used to observe values.
///
/// The root getter is handed to the body of
/// [`ObserverContext::new`](super::ObserverContext::new); every delivery
/// callback receives a child getter on which nested values may be observed.
///
/// Cloning a `Getter` creates a new handle to the **same** node.
#[derive(Clone)]
pub struct Getter {
    node: Rc<RefCell<GetterNode>>,
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node.borrow();
        f.debug_struct("Getter")
            .field("id", &node.id)
            .field("epoch", &node.epoch)
            .field("unresolved", &node.unresolved.len())
            .field("children", &node.children.len())
            .field("observables", &node.observables.len())
            .finish()
    }
}

impl Getter {
    fn with_parent(parent: Parent) -> Self {
        Self {
            node: Rc::new(RefCell::new(GetterNode {
                id: next_getter_id(),
                parent,
                epoch: 0,
                building: false,
                unresolved: HashSet::new(),
                children: Vec::new(),
                observables: Vec::new(),
            })),
        }
    }

    pub(super) fn root(context: Weak<ContextInner>) -> Self {
        Self::with_parent(Parent::Context(context))
    }

    #[must_use]
    pub fn id(&self) -> GetterId {
        self.node.borrow().id
    }

    /// Whether every value observed below this getter, at any depth, has
    /// delivered since it was last observed.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.node.borrow().unresolved.is_empty()
    }

    /// Number of child getters currently tracked.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.node.borrow().children.len()
    }

    /// Number of observables this getter has subscribed to directly.
    #[must_use]
    pub fn observable_count(&self) -> usize {
        self.node.borrow().observables.len()
    }

    fn epoch(&self) -> u64 {
        self.node.borrow().epoch
    }

    /// Observe `observable`, running `callback` with a fresh child getter
    /// and the value every time the observable delivers.
    ///
    /// The child getter is cleared before each delivery, so the callback may
    /// observe a different set of nested values every time. The observable
    /// is unsubscribed when this getter is cleared.
    ///
    /// # Panics
    ///
    /// A panic raised by `subscribe` or by `callback` during a synchronous
    /// delivery propagates out of this call.
    pub fn observe<O>(&self, observable: O, mut callback: impl FnMut(&Getter, O::Value) + 'static)
    where
        O: Observable + 'static,
    {
        let child = Self::with_parent(Parent::Getter(Rc::downgrade(&self.node)));
        let observable = Rc::new(observable);
        let epoch = {
            let mut node = self.node.borrow_mut();
            node.children.push(child.clone());
            node.observables.push(Rc::clone(&observable) as Rc<dyn Unwatch>);
            node.epoch
        };
        self.mark_unresolved(child.id());
        trace!(parent = self.id().raw(), child = child.id().raw(), "observe");

        let parent = Rc::downgrade(&self.node);
        let child = Rc::downgrade(&child.node);
        observable.subscribe(Box::new(move |value: O::Value| {
            let (Some(parent), Some(child)) = (parent.upgrade(), child.upgrade()) else {
                trace!("delivery to a dropped getter ignored");
                return;
            };
            let parent = Getter { node: parent };
            let child = Getter { node: child };
            if parent.epoch() != epoch {
                warn!(
                    getter = child.id().raw(),
                    "observable delivered after its getter was cleared"
                );
                return;
            }
            parent.deliver(&child, |child| callback(child, value));
        }));
    }

    fn deliver(&self, child: &Getter, run: impl FnOnce(&Getter)) {
        self.mark_unresolved(child.id());
        child.clear();

        child.node.borrow_mut().building = true;
        run(child);
        child.node.borrow_mut().building = false;

        let resolved = child.is_resolved();
        trace!(getter = child.id().raw(), resolved, "delivered");
        if resolved {
            self.child_resolved(child.id());
        }
    }

    /// Add `id` to the unresolved set. A getter that was resolved until now
    /// becomes unresolved in its own parent, up to the first ancestor that
    /// was already waiting.
    fn mark_unresolved(&self, id: GetterId) {
        let (escalate, parent) = {
            let mut node = self.node.borrow_mut();
            let was_resolved = node.unresolved.is_empty();
            let added = node.unresolved.insert(id);
            (added && was_resolved, node.parent.clone())
        };
        if !escalate {
            return;
        }
        if let Parent::Getter(parent) = parent {
            if let Some(parent) = parent.upgrade() {
                Getter { node: parent }.mark_unresolved(self.id());
            }
        }
    }

    fn child_resolved(&self, id: GetterId) {
        let propagate = {
            let mut node = self.node.borrow_mut();
            node.unresolved.remove(&id);
            node.unresolved.is_empty() && !node.building
        };
        if propagate {
            self.propagate_resolved();
        }
    }

    fn propagate_resolved(&self) {
        let parent = self.node.borrow().parent.clone();
        match parent {
            Parent::Context(context) => {
                if let Some(context) = context.upgrade() {
                    context.refresh();
                }
            }
            Parent::Getter(parent) => {
                if let Some(parent) = parent.upgrade() {
                    Getter { node: parent }.child_resolved(self.id());
                }
            }
        }
    }

    /// Stop observing everything below this getter.
    ///
    /// Children are cleared recursively, then every observable this getter
    /// subscribed to is unsubscribed. Idempotent.
    pub fn clear(&self) {
        let (children, observables) = {
            let mut node = self.node.borrow_mut();
            node.epoch += 1;
            node.unresolved.clear();
            (
                std::mem::take(&mut node.children),
                std::mem::take(&mut node.observables),
            )
        };
        for child in &children {
            child.clear();
        }
        for observable in &observables {
            observable.unwatch();
        }
        if !observables.is_empty() {
            trace!(
                getter = self.id().raw(),
                children = children.len(),
                observables = observables.len(),
                "getter cleared"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
