#![forbid(unsafe_code)]

//! Runtime: observer contexts over asynchronous values.
//!
//! # Key Components
//!
//! - [`ObserverContext`]: root of a tree of observed values with a
//!   coalescing refresh callback.
//! - [`Getter`]: a node in that tree, used to observe values.
//! - [`ContextSlot`]: holds one context at a time, clearing the previous one
//!   on replacement.

pub mod observer;
pub mod slot;

pub use observer::{Getter, GetterId, ObserverContext, observer_context};
pub use slot::ContextSlot;
