#![forbid(unsafe_code)]

//! Tendril public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users: the
//! observable primitives and event loop from `tendril-core`, and (with the
//! default `runtime` feature) observer contexts from `tendril-runtime`.

pub use tendril_core::{
    EntryWatch, EventLoop, LoopConfig, LoopError, LoopHandle, Mutable, MutableWatch, Observable,
    Scheduler, Store, Subscription, Unwatch,
};

#[cfg(feature = "runtime")]
pub use tendril_runtime::{ContextSlot, Getter, GetterId, ObserverContext, observer_context};

pub mod prelude {
    pub use tendril_core as core;
    #[cfg(feature = "runtime")]
    pub use tendril_runtime as runtime;

    pub use tendril_core::{EventLoop, Mutable, Observable, Scheduler, Store};
    #[cfg(feature = "runtime")]
    pub use tendril_runtime::{ContextSlot, Getter, ObserverContext};
}
