#![forbid(unsafe_code)]

//! The observable contract.
//!
//! An [`Observable`] is any asynchronous value source that can push values to
//! a callback and later be told to stop. The observer context only ever talks
//! to sources through this trait, so a source may be a local [`Mutable`], a
//! record in a [`Store`], or an adapter over some remote feed.
//!
//! # Contract
//!
//! - `subscribe` may invoke the callback zero, one, or many times, either
//!   synchronously (before `subscribe` returns) or later from the event loop.
//! - `unsubscribe` is idempotent. After it returns, the callback must not be
//!   invoked again and any side effect of subscribing must be released.
//! - A source is subscribed at most once per value of the implementing type;
//!   watch handles are cheap and created per observation.
//!
//! [`Mutable`]: crate::mutable::Mutable
//! [`Store`]: crate::store::Store

/// An asynchronous value source with explicit cancellation.
pub trait Observable {
    /// The type of value delivered to subscribers.
    type Value;

    /// Start delivering values to `callback`.
    fn subscribe(&self, callback: Box<dyn FnMut(Self::Value)>);

    /// Stop delivering values and release any side effect of subscribing.
    fn unsubscribe(&self);
}

/// The type-erased half of [`Observable`] needed for cleanup.
///
/// Holders that must unsubscribe from sources of differing value types keep
/// them as `Box<dyn Unwatch>`.
pub trait Unwatch {
    /// See [`Observable::unsubscribe`].
    fn unwatch(&self);
}

impl<O: Observable + ?Sized> Unwatch for O {
    fn unwatch(&self) {
        self.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
