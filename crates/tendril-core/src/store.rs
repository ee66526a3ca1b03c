#![forbid(unsafe_code)]

//! Keyed records that can be watched before they exist.
//!
//! A [`Store`] maps keys to records, the way a chat client keeps messages by
//! id. [`Store::watch`] returns an [`Observable`] for a single key: it stays
//! silent while the record is absent, delivers as soon as the record is
//! inserted, and delivers again on every change. This is the shape of lookup
//! that makes nested observation interesting: a watched message may refer to
//! another message by key, and which key it refers to can change.
//!
//! Each key is backed by a [`Mutable<Option<V>>`], so change detection and
//! subscriber bookkeeping follow the same rules as [`Mutable`]. A key with no
//! record gets a backing entry only while it is watched; the entry goes away
//! with its last watcher.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::event_loop::Scheduler;
use crate::mutable::{Mutable, MutableWatch};
use crate::observable::Observable;

/// A shared map of watchable records.
///
/// Cloning a `Store` creates a new handle to the **same** records.
pub struct Store<K, V> {
    entries: Rc<RefCell<Entries<K, V>>>,
}

type Entries<K, V> = HashMap<K, Mutable<Option<V>>>;

impl<K, V> Clone for Store<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Rc::clone(&self.entries),
        }
    }
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + PartialEq + 'static> Default for Store<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + PartialEq + 'static> fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("records", &self.len())
            .field("keys", &self.entries.borrow().len())
            .finish()
    }
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + PartialEq + 'static> Store<K, V> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    fn slot(&self, key: &K) -> Mutable<Option<V>> {
        self.entries
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(|| Mutable::new(None))
            .clone()
    }

    /// Insert or replace a record. Watchers of `key` are notified if the
    /// record changed.
    pub fn insert(&self, key: K, value: V) {
        let slot = self.slot(&key);
        trace!(version = slot.version(), "store insert");
        slot.set(Some(value));
    }

    /// Remove a record, returning it. Watchers stay attached and are notified
    /// again if the key is re-inserted.
    pub fn remove(&self, key: &K) -> Option<V> {
        let slot = self.entries.borrow().get(key).cloned()?;
        let previous = slot.get();
        if slot.subscriber_count() == 0 {
            self.entries.borrow_mut().remove(key);
        } else {
            // Watchers ignore `None`, so this only bumps the version.
            slot.set(None);
        }
        previous
    }

    /// A clone of the record for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.borrow().get(key).and_then(Mutable::get)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of records present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|slot| slot.with(Option::is_some))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live watchers attached to `key`.
    #[must_use]
    pub fn watcher_count(&self, key: &K) -> usize {
        self.entries
            .borrow()
            .get(key)
            .map_or(0, Mutable::subscriber_count)
    }

    /// Number of keys with a backing entry: present records plus absent
    /// keys that are being watched.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Watch the record for `key`, delivering synchronously.
    #[must_use]
    pub fn watch(&self, key: K) -> EntryWatch<K, V> {
        EntryWatch::new(self, key, None)
    }

    /// Watch the record for `key`, delivering on the scheduler's next turn.
    #[must_use]
    pub fn watch_deferred(&self, key: K, scheduler: Rc<dyn Scheduler>) -> EntryWatch<K, V> {
        EntryWatch::new(self, key, Some(scheduler))
    }
}

/// [`Observable`] over one [`Store`] record. Absent records are not
/// delivered.
///
/// The backing entry is looked up when the watch subscribes, not when it is
/// created. Unsubscribing or dropping the watch removes the entry if the
/// record is absent and nobody else watches it.
pub struct EntryWatch<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    entries: Weak<RefCell<Entries<K, V>>>,
    key: K,
    scheduler: Option<Rc<dyn Scheduler>>,
    inner: RefCell<Option<Rc<MutableWatch<Option<V>>>>>,
}

impl<K, V> fmt::Debug for EntryWatch<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
    V: Clone + PartialEq + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryWatch")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<K, V> EntryWatch<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn new(store: &Store<K, V>, key: K, scheduler: Option<Rc<dyn Scheduler>>) -> Self {
        Self {
            entries: Rc::downgrade(&store.entries),
            key,
            scheduler,
            inner: RefCell::new(None),
        }
    }

    /// Whether a subscriber is currently attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner
            .borrow()
            .as_ref()
            .is_some_and(|watch| watch.is_active())
    }

    /// The watched key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Detach from the backing entry and drop it if it is now unused.
    fn release(&self) {
        let Some(watch) = self.inner.borrow_mut().take() else {
            return;
        };
        watch.unsubscribe();
        drop(watch);

        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = entries.borrow_mut();
        let unused = entries
            .get(&self.key)
            .is_some_and(|slot| slot.with(Option::is_none) && slot.subscriber_count() == 0);
        if unused {
            entries.remove(&self.key);
            trace!(keys = entries.len(), "pruned unwatched store key");
        }
    }
}

impl<K, V> Observable for EntryWatch<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    type Value = V;

    fn subscribe(&self, mut callback: Box<dyn FnMut(V)>) {
        self.release();
        let Some(entries) = self.entries.upgrade() else {
            trace!("store dropped before its watch subscribed");
            return;
        };
        let slot = Store { entries }.slot(&self.key);
        let watch = Rc::new(match &self.scheduler {
            Some(scheduler) => slot.watch_deferred(Rc::clone(scheduler)),
            None => slot.watch(),
        });
        *self.inner.borrow_mut() = Some(Rc::clone(&watch));

        // No borrow of `inner` is held here: a synchronous delivery may
        // unsubscribe this watch.
        watch.subscribe(Box::new(move |record: Option<V>| {
            if let Some(value) = record {
                callback(value);
            }
        }));
    }

    fn unsubscribe(&self) {
        self.release();
    }
}

impl<K, V> Drop for EntryWatch<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    fn recorder<T: 'static>() -> (Rc<RefCell<Vec<T>>>, Box<dyn FnMut(T)>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        (seen, Box::new(move |v| s.borrow_mut().push(v)))
    }

    #[test]
    fn insert_get_remove() {
        let store: Store<u32, String> = Store::new();
        assert!(store.is_empty());

        store.insert(1, "hello".into());
        store.insert(2, "world".into());
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&1).as_deref(), Some("hello"));
        assert!(store.contains(&2));

        assert_eq!(store.remove(&1).as_deref(), Some("hello"));
        assert_eq!(store.remove(&1), None);
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&1));
    }

    #[test]
    fn watch_absent_record_waits_for_insert() {
        let store: Store<&'static str, u32> = Store::new();
        let watch = store.watch("m1");
        let (seen, callback) = recorder();
        watch.subscribe(callback);
        assert!(seen.borrow().is_empty());

        store.insert("m1", 7);
        assert_eq!(*seen.borrow(), vec![7]);

        store.insert("m1", 7);
        store.insert("m1", 8);
        assert_eq!(*seen.borrow(), vec![7, 8]);
    }

    #[test]
    fn watch_present_record_delivers_immediately() {
        let store = Store::new();
        store.insert(5u8, 'x');
        let watch = store.watch(5);
        let (seen, callback) = recorder();
        watch.subscribe(callback);
        assert_eq!(*seen.borrow(), vec!['x']);
    }

    #[test]
    fn removal_is_silent_and_reinsert_delivers() {
        let store = Store::new();
        store.insert(1u8, 10u32);
        let watch = store.watch(1);
        let (seen, callback) = recorder();
        watch.subscribe(callback);

        store.remove(&1);
        assert_eq!(*seen.borrow(), vec![10]);
        assert_eq!(store.watcher_count(&1), 1);

        store.insert(1, 10);
        assert_eq!(*seen.borrow(), vec![10, 10]);
    }

    #[test]
    fn unsubscribe_detaches_watcher() {
        let store = Store::new();
        let watch = store.watch(1u8);
        let (seen, callback) = recorder::<u8>();
        watch.subscribe(callback);
        assert!(watch.is_active());
        assert_eq!(store.watcher_count(&1), 1);

        watch.unsubscribe();
        assert_eq!(store.watcher_count(&1), 0);
        store.insert(1, 3);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn unwatched_absent_keys_leave_no_entries() {
        let store: Store<u32, String> = Store::new();
        for key in 0..1000 {
            let watch = store.watch(key);
            if key % 2 == 0 {
                watch.subscribe(Box::new(|_| {}));
            }
            if key % 4 == 0 {
                watch.unsubscribe();
            }
        }
        assert_eq!(store.key_count(), 0);
        assert!(format!("{:?}", store).contains("keys: 0"));
    }

    #[test]
    fn absent_key_survives_while_another_watcher_remains() {
        let store: Store<u8, u32> = Store::new();
        let first = store.watch(1);
        let second = store.watch(1);
        let (seen, callback) = recorder::<u32>();
        first.subscribe(Box::new(|_| {}));
        second.subscribe(callback);
        assert_eq!(store.key_count(), 1);

        drop(first);
        assert_eq!(store.key_count(), 1);
        assert_eq!(store.watcher_count(&1), 1);

        store.insert(1, 5);
        assert_eq!(*seen.borrow(), vec![5]);

        // A present record outlives its watchers.
        drop(second);
        assert_eq!(store.key_count(), 1);
        assert_eq!(store.get(&1), Some(5));
    }

    #[test]
    fn deferred_watch_delivers_next_turn() {
        let event_loop = EventLoop::new();
        let store = Store::new();
        let watch = store.watch_deferred("k", Rc::new(event_loop.handle()));
        let (seen, callback) = recorder::<i32>();
        watch.subscribe(callback);

        store.insert("k", -1);
        assert!(seen.borrow().is_empty());
        event_loop.run_until_idle().unwrap();
        assert_eq!(*seen.borrow(), vec![-1]);
    }

    #[test]
    fn clones_share_records() {
        let a: Store<u8, u8> = Store::new();
        let b = a.clone();
        a.insert(1, 1);
        assert_eq!(b.get(&1), Some(1));
        assert!(format!("{:?}", b).contains("records: 1"));
    }
}
