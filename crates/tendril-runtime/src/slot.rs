#![forbid(unsafe_code)]

//! A holder for one observer context at a time.
//!
//! Views that re-render an item build a fresh context for it each time.
//! Whatever the previous render was watching has to stop, or every re-render
//! leaks another set of subscriptions. [`ContextSlot`] makes that the default:
//! replacing the context clears the old one.

use std::fmt;

use tracing::trace;

use crate::observer::ObserverContext;

/// Holds at most one [`ObserverContext`].
#[derive(Default)]
pub struct ContextSlot {
    current: Option<ObserverContext>,
}

impl fmt::Debug for ContextSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSlot")
            .field("current", &self.current)
            .finish()
    }
}

impl ContextSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `context`, clearing and dropping the previous one.
    pub fn replace(&mut self, context: ObserverContext) {
        if let Some(previous) = self.current.replace(context) {
            trace!("replacing observer context");
            previous.clear();
        }
    }

    /// Clear and drop the held context, if any.
    pub fn clear(&mut self) {
        if let Some(previous) = self.current.take() {
            previous.clear();
        }
    }

    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.current.is_some()
    }

    #[must_use]
    pub fn get(&self) -> Option<&ObserverContext> {
        self.current.as_ref()
    }
}
