#![forbid(unsafe_code)]

//! End-to-end scenarios for observer contexts driven by the event loop.
//!
//! Validates that:
//! 1. A price/quantity view refreshes exactly once per batch of changes and
//!    never during creation.
//! 2. Clearing the context stops refreshes even if sources keep changing.
//! 3. A quoted-message view follows edit references to whichever message is
//!    current, refreshing only once the referenced message is available.
//! 4. Re-rendering through a `ContextSlot` never leaves stale watchers behind.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tendril_core::event_loop::{EventLoop, Scheduler};
use tendril_core::mutable::Mutable;
use tendril_core::store::Store;
use tendril_runtime::{ContextSlot, ObserverContext};
use web_time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn counter() -> (Rc<Cell<u32>>, impl FnMut() + 'static) {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    (count, move || c.set(c.get() + 1))
}

#[derive(Debug, Clone, PartialEq)]
struct Message {
    sender: &'static str,
    content: String,
    /// Id of the latest edit of this message, if any.
    edited_by: Option<u32>,
}

impl Message {
    fn new(sender: &'static str, content: &str) -> Self {
        Self {
            sender,
            content: content.to_string(),
            edited_by: None,
        }
    }
}

/// Observe `id` and render it as a quote, following the edit reference when
/// the message has been edited.
fn quote_view(
    event_loop: &EventLoop,
    messages: &Store<u32, Message>,
    id: u32,
    out: &Rc<RefCell<String>>,
    on_refresh: impl FnMut() + 'static,
) -> ObserverContext {
    let store = messages.clone();
    let out = Rc::clone(out);
    ObserverContext::new(
        event_loop.handle(),
        move |getter| {
            getter.observe(messages.watch(id), move |getter, message| match message.edited_by {
                Some(edit) => {
                    let out = Rc::clone(&out);
                    let sender = message.sender;
                    getter.observe(store.watch(edit), move |_, edited| {
                        *out.borrow_mut() = format!("{sender} wrote \"{}\"", edited.content);
                    });
                }
                None => {
                    *out.borrow_mut() = format!("{} wrote \"{}\"", message.sender, message.content);
                }
            });
        },
        on_refresh,
    )
}

// ============================================================================
// Price and quantity
// ============================================================================

#[test]
fn price_quantity_scenario() {
    init_tracing();
    let event_loop = EventLoop::new();
    let scheduler: Rc<dyn Scheduler> = Rc::new(event_loop.handle());
    let price = Mutable::new(10);
    let qty = Mutable::new(1);
    let seen_price = Rc::new(Cell::new(0));
    let (refreshes, on_refresh) = counter();

    let p = Rc::clone(&seen_price);
    let context = ObserverContext::new(
        event_loop.handle(),
        |getter| {
            getter.observe(price.watch(), move |_, v| p.set(v));
            getter.observe(qty.watch(), |_, _| {});
        },
        on_refresh,
    );
    assert_eq!(seen_price.get(), 10);
    assert_eq!(refreshes.get(), 0);

    // A later asynchronous delivery.
    let later = price.clone();
    event_loop
        .handle()
        .defer_after(Duration::from_millis(50), Box::new(move || later.set(12)));
    event_loop.advance(Duration::from_millis(50)).unwrap();
    assert_eq!(seen_price.get(), 12);
    assert_eq!(refreshes.get(), 1);

    // Two sources change within the same turn.
    let (p2, q2) = (price.clone(), qty.clone());
    scheduler.defer(Box::new(move || {
        p2.set(13);
        q2.set(5);
    }));
    event_loop.run_until_idle().unwrap();
    assert_eq!(seen_price.get(), 13);
    assert_eq!(refreshes.get(), 2);
    assert_eq!(context.refresh_count(), 2);

    context.clear();
    price.set(14);
    event_loop.run_until_idle().unwrap();
    assert_eq!(refreshes.get(), 2);
    assert_eq!(seen_price.get(), 13);
    assert_eq!(price.subscriber_count(), 0);
    assert_eq!(qty.subscriber_count(), 0);
}

#[test]
fn remote_feed_with_latency() {
    init_tracing();
    let event_loop = EventLoop::new();
    let scheduler: Rc<dyn Scheduler> = Rc::new(event_loop.handle());
    let presence = Mutable::new("away");
    let shown = Rc::new(RefCell::new(""));
    let (refreshes, on_refresh) = counter();

    let out = Rc::clone(&shown);
    let context = ObserverContext::new(
        event_loop.handle(),
        |getter| {
            getter.observe(presence.watch_deferred(scheduler), move |_, v| {
                *out.borrow_mut() = v;
            })
        },
        on_refresh,
    );
    assert!(!context.is_resolved());
    assert_eq!(*shown.borrow(), "");

    event_loop.run_until_idle().unwrap();
    assert_eq!(*shown.borrow(), "away");
    assert_eq!(refreshes.get(), 1);

    presence.set("online");
    presence.set("busy");
    event_loop.run_until_idle().unwrap();
    assert_eq!(*shown.borrow(), "busy");
    assert_eq!(refreshes.get(), 2);
}

// ============================================================================
// Quoted messages
// ============================================================================

#[test]
fn quoted_message_follows_edits() {
    init_tracing();
    let event_loop = EventLoop::new();
    let messages: Store<u32, Message> = Store::new();
    messages.insert(1, Message::new("alice", "lunch?"));
    let quoted = Rc::new(RefCell::new(String::new()));
    let (refreshes, on_refresh) = counter();

    let context = quote_view(&event_loop, &messages, 1, &quoted, on_refresh);
    assert_eq!(*quoted.borrow(), "alice wrote \"lunch?\"");

    // The message is edited, but the edit itself has not arrived yet.
    let mut original = messages.get(&1).unwrap();
    original.edited_by = Some(2);
    messages.insert(1, original);
    event_loop.run_until_idle().unwrap();
    assert_eq!(refreshes.get(), 0);
    assert!(!context.is_resolved());

    messages.insert(2, Message::new("alice", "lunch at noon?"));
    event_loop.run_until_idle().unwrap();
    assert_eq!(*quoted.borrow(), "alice wrote \"lunch at noon?\"");
    assert_eq!(refreshes.get(), 1);

    // A second edit moves the reference; the first edit is no longer watched.
    let mut original = messages.get(&1).unwrap();
    original.edited_by = Some(3);
    messages.insert(3, Message::new("alice", "lunch at one?"));
    messages.insert(1, original);
    assert_eq!(messages.watcher_count(&2), 0);
    assert_eq!(messages.watcher_count(&3), 1);
    event_loop.run_until_idle().unwrap();
    assert_eq!(*quoted.borrow(), "alice wrote \"lunch at one?\"");
    assert_eq!(refreshes.get(), 2);

    messages.insert(2, Message::new("alice", "stale"));
    event_loop.run_until_idle().unwrap();
    assert_eq!(refreshes.get(), 2);
}

#[test]
fn rerendering_through_a_slot_leaves_no_stale_watchers() {
    init_tracing();
    let event_loop = EventLoop::new();
    let messages: Store<u32, Message> = Store::new();
    for id in 1..=3 {
        messages.insert(id, Message::new("bob", &format!("message {id}")));
    }
    let quoted = Rc::new(RefCell::new(String::new()));
    let mut slot = ContextSlot::new();

    for id in [1, 2, 3, 2] {
        slot.replace(quote_view(&event_loop, &messages, id, &quoted, || {}));
        assert_eq!(*quoted.borrow(), format!("bob wrote \"message {id}\""));
    }

    assert_eq!(messages.watcher_count(&1), 0);
    assert_eq!(messages.watcher_count(&2), 1);
    assert_eq!(messages.watcher_count(&3), 0);

    slot.clear();
    assert_eq!(messages.watcher_count(&2), 0);
}
