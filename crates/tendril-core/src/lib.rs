#![forbid(unsafe_code)]

//! Core: the single-threaded event loop, the observable contract, and the
//! value sources that implement it.

pub mod error;
pub mod event_loop;
pub mod mutable;
pub mod observable;
pub mod store;

pub use error::{LoopError, Result};
pub use event_loop::{EventLoop, LoopConfig, LoopHandle, Scheduler, Task};
pub use mutable::{Mutable, MutableWatch, Subscription};
pub use observable::{Observable, Unwatch};
pub use store::{EntryWatch, Store};
