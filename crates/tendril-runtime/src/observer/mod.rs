#![forbid(unsafe_code)]

//! Observer contexts: refresh once a tree of asynchronous values settles.
//!
//! An [`ObserverContext`] runs a body that observes values through a
//! [`Getter`]. Every `observe` call creates a child getter, and the delivery
//! callback may observe further values on that child, so the observations
//! form a tree that mirrors the nesting of the callbacks.
//!
//! # Architecture
//!
//! Getters live in `Rc<RefCell<..>>` nodes. Parents own their children;
//! children and delivery closures only hold `Weak` references upward, so an
//! observable's subscriber list never keeps a tree alive. Refresh is deferred
//! through a [`Scheduler`](tendril_core::event_loop::Scheduler), which is the
//! only thing the context needs from its environment.
//!
//! # Invariants
//!
//! 1. The refresh callback never runs while the body of `new` is executing.
//! 2. A refresh runs only after every value in the tree has delivered at
//!    least once since it was last observed.
//!    A refresh queued before some nested value went pending is held until
//!    the tree resolves again.
//! 3. Deliveries within one scheduler turn produce at most one refresh.
//! 4. A changed value that leads to different nested observations refreshes
//!    only after the new nested values have delivered.
//! 5. After `clear`, no observable in the tree is subscribed and no refresh
//!    runs until something new is observed.
//!
//! # Failure Modes
//!
//! - **Panicking callback**: panics from the body, a delivery callback, or an
//!   observable propagate to the caller. The tree is left as it was at the
//!   point of the panic; `clear` still releases every subscription.
//! - **Leaked context**: a context that is never cleared or dropped keeps its
//!   subscriptions alive. Dropping the context clears it.

mod context;
mod getter;

pub use context::{ObserverContext, observer_context};
pub use getter::{Getter, GetterId};
