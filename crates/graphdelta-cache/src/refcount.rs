//! Ref-counted identity cache.
//!
//! A [`RefCountCache`] maps a key to a lazily created payload and a hold
//! count. Every successful lookup returns a [`RefCounted`] handle that owns
//! exactly one hold. Releasing the last hold evicts the entry and runs the
//! payload's [`Finalize`] hook, outside the cache lock, so a finalizer may
//! release further handles into the same cache.
//!
//! # Invariants
//!
//! - At most one payload per key while its count is positive.
//! - A handle releases its hold at most once, whether through
//!   [`RefCounted::release`] or on drop.
//! - `finalize` runs exactly once per evicted payload.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

/// Teardown hook run when a payload's hold count reaches zero.
pub trait Finalize {
    fn finalize(&self);
}

struct Slot<V> {
    value: Arc<V>,
    count: usize,
}

struct Inner<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Inner<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cache of ref-counted payloads. Cloning shares the same cache.
pub struct RefCountCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> RefCountCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Finalize,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Return the payload for `key`, creating it with `factory` if absent.
    ///
    /// The returned handle owns one hold. The flag is `true` when this call
    /// created the payload; the creator is responsible for populating it.
    pub fn get_or_create<F>(&self, key: K, factory: F) -> (RefCounted<K, V>, bool)
    where
        F: FnOnce() -> V,
    {
        let mut entries = self.inner.lock();
        let (value, created) = match entries.get_mut(&key) {
            Some(slot) => {
                slot.count += 1;
                (Arc::clone(&slot.value), false)
            }
            None => {
                let value = Arc::new(factory());
                entries.insert(
                    key.clone(),
                    Slot {
                        value: Arc::clone(&value),
                        count: 1,
                    },
                );
                (value, true)
            }
        };
        drop(entries);
        trace!(created, "acquired cache hold");
        (
            RefCounted {
                cache: Arc::clone(&self.inner),
                key,
                value,
                released: AtomicBool::new(false),
            },
            created,
        )
    }

    /// Current hold count for `key`, zero if absent.
    pub fn count(&self, key: &K) -> usize {
        self.inner.lock().get(key).map_or(0, |slot| slot.count)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A non-owning reference to this cache, for payloads that must reach
    /// back into the cache without keeping it alive.
    pub fn downgrade(&self) -> WeakCache<K, V> {
        WeakCache {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<K, V> Clone for RefCountCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for RefCountCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Finalize,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for RefCountCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountCache")
            .field("entries", &self.inner.lock().len())
            .finish()
    }
}

/// Non-owning reference to a [`RefCountCache`].
pub struct WeakCache<K, V> {
    inner: Weak<Inner<K, V>>,
}

impl<K, V> WeakCache<K, V> {
    pub fn upgrade(&self) -> Option<RefCountCache<K, V>> {
        self.inner.upgrade().map(|inner| RefCountCache { inner })
    }
}

impl<K, V> Clone for WeakCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for WeakCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakCache")
    }
}

/// Owning handle for one hold on a cached payload.
pub struct RefCounted<K, V>
where
    K: Eq + Hash + Clone,
    V: Finalize,
{
    cache: Arc<Inner<K, V>>,
    key: K,
    value: Arc<V>,
    released: AtomicBool,
}

impl<K, V> RefCounted<K, V>
where
    K: Eq + Hash + Clone,
    V: Finalize,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The shared payload.
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// Acquire an additional hold on the same payload.
    ///
    /// Returns `None` if this handle was released or the entry was evicted.
    pub fn retain(&self) -> Option<Self> {
        if self.is_released() {
            return None;
        }
        let mut entries = self.cache.lock();
        let slot = entries
            .get_mut(&self.key)
            .filter(|slot| Arc::ptr_eq(&slot.value, &self.value))?;
        slot.count += 1;
        Some(Self {
            cache: Arc::clone(&self.cache),
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            released: AtomicBool::new(false),
        })
    }

    /// Current hold count of the payload's entry, zero once evicted.
    pub fn count(&self) -> usize {
        self.cache
            .lock()
            .get(&self.key)
            .filter(|slot| Arc::ptr_eq(&slot.value, &self.value))
            .map_or(0, |slot| slot.count)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release this handle's hold. Returns `false` if it was already released.
    ///
    /// When this was the last hold the entry is evicted and the payload is
    /// finalized before `release` returns.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let evicted = {
            let mut entries = self.cache.lock();
            match entries.get_mut(&self.key) {
                Some(slot) if Arc::ptr_eq(&slot.value, &self.value) => {
                    slot.count -= 1;
                    slot.count == 0 && entries.remove(&self.key).is_some()
                }
                _ => false,
            }
        };
        if evicted {
            trace!("last hold released, finalizing");
            self.value.finalize();
        }
        true
    }
}

impl<K, V> Deref for RefCounted<K, V>
where
    K: Eq + Hash + Clone,
    V: Finalize,
{
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K, V> Drop for RefCounted<K, V>
where
    K: Eq + Hash + Clone,
    V: Finalize,
{
    fn drop(&mut self) {
        self.release();
    }
}

impl<K, V> fmt::Debug for RefCounted<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Finalize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("key", &self.key)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdelta_types::{IdentityKey, Object, TypeInfo};
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Tally {
        finalized: AtomicUsize,
    }

    impl Finalize for Tally {
        fn finalize(&self) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Payload that owns a handle to another entry of the same cache.
    struct Parent {
        child: Mutex<Option<RefCounted<u32, Parent>>>,
        finalized: AtomicBool,
    }

    impl Finalize for Parent {
        fn finalize(&self) {
            self.finalized.store(true, Ordering::SeqCst);
            self.child.lock().unwrap().take();
        }
    }

    fn parent() -> Parent {
        Parent {
            child: Mutex::new(None),
            finalized: AtomicBool::new(false),
        }
    }

    #[test]
    fn repeated_lookups_share_one_payload() {
        let cache: RefCountCache<&str, Tally> = RefCountCache::new();
        let (a, created_a) = cache.get_or_create("k", Tally::default);
        let (b, created_b) = cache.get_or_create("k", Tally::default);

        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(a.value(), b.value()));
        assert_eq!(cache.count(&"k"), 2);
        assert_eq!(a.count(), 2);
    }

    #[test]
    fn last_release_evicts_and_finalizes_once() {
        let cache: RefCountCache<&str, Tally> = RefCountCache::new();
        let (a, _) = cache.get_or_create("k", Tally::default);
        let (b, _) = cache.get_or_create("k", Tally::default);
        let payload = Arc::clone(a.value());

        assert!(a.release());
        assert!(!a.release());
        assert_eq!(cache.count(&"k"), 1);
        assert_eq!(payload.finalized.load(Ordering::SeqCst), 0);

        drop(b);
        assert!(!cache.contains(&"k"));
        assert_eq!(payload.finalized.load(Ordering::SeqCst), 1);

        drop(a);
        assert_eq!(payload.finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recreated_after_eviction_is_a_new_payload() {
        let cache: RefCountCache<&str, Tally> = RefCountCache::new();
        let (a, _) = cache.get_or_create("k", Tally::default);
        let old = Arc::clone(a.value());
        drop(a);
        let (b, created) = cache.get_or_create("k", Tally::default);
        assert!(created);
        assert!(!Arc::ptr_eq(&old, b.value()));
    }

    #[test]
    fn retain_adds_a_hold() {
        let cache: RefCountCache<&str, Tally> = RefCountCache::new();
        let (a, _) = cache.get_or_create("k", Tally::default);
        let b = a.retain().unwrap();
        assert_eq!(cache.count(&"k"), 2);
        a.release();
        assert!(a.retain().is_none());
        assert_eq!(b.count(), 1);
    }

    #[test]
    fn finalizer_may_release_into_the_same_cache() {
        let cache: RefCountCache<u32, Parent> = RefCountCache::new();
        let (root, _) = cache.get_or_create(1, parent);
        let (child, _) = cache.get_or_create(2, parent);
        let child_payload = Arc::clone(child.value());
        *root.child.lock().unwrap() = Some(child);

        drop(root);
        assert!(child_payload.finalized.load(Ordering::SeqCst));
        assert!(cache.is_empty());
    }

    #[test]
    fn identity_keys_share_by_reference() {
        let ty = TypeInfo::object("T").build();
        let x = Object::new(&ty);
        let y = Object::new(&ty);
        let cache: RefCountCache<IdentityKey, Tally> = RefCountCache::new();

        let (a, _) = cache.get_or_create(IdentityKey::pair(&x, &y), Tally::default);
        let (b, created) = cache.get_or_create(IdentityKey::pair(&x, &y), Tally::default);
        let (c, created_c) = cache.get_or_create(IdentityKey::pair(&y, &x), Tally::default);
        assert!(!created);
        assert!(created_c);
        assert!(Arc::ptr_eq(a.value(), b.value()));
        assert!(!Arc::ptr_eq(a.value(), c.value()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn weak_cache_does_not_keep_entries_alive() {
        let cache: RefCountCache<&str, Tally> = RefCountCache::new();
        let weak = cache.downgrade();
        assert!(weak.upgrade().is_some());
        drop(cache);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn concurrent_lookups_reach_the_held_payload() {
        let cache: RefCountCache<u8, Tally> = RefCountCache::new();
        let (held, _) = cache.get_or_create(7, Tally::default);
        let expected = Arc::as_ptr(held.value()) as usize;
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let (h, created) = cache.get_or_create(7, Tally::default);
                    (Arc::as_ptr(h.value()) as usize, created)
                })
            })
            .collect();
        for t in threads {
            let (addr, created) = t.join().unwrap();
            assert_eq!(addr, expected);
            assert!(!created);
        }
        assert_eq!(held.count(), 1);
    }

    proptest! {
        #[test]
        fn count_tracks_live_holders(n in 1usize..20, released in 0usize..20) {
            let cache: RefCountCache<&str, Tally> = RefCountCache::new();
            let mut holders: Vec<_> = (0..n).map(|_| cache.get_or_create("k", Tally::default).0).collect();
            let payload = Arc::clone(holders[0].value());
            let released = released.min(n);
            for h in holders.drain(..released) {
                drop(h);
            }
            prop_assert_eq!(cache.count(&"k"), n - released);
            let expected = usize::from(released == n);
            prop_assert_eq!(payload.finalized.load(Ordering::SeqCst), expected);
        }
    }
}
