//! Scratch collection pools.
//!
//! Traversals need short-lived visited sets and work lists. A [`Pool`]
//! hands out a cleared collection wrapped in [`Borrowed`], which returns it
//! to the pool on drop. Pools are bounded; surplus collections are dropped.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Visited sets keyed by object or node address.
pub static ADDRESS_SETS: Pool<HashSet<usize>> = Pool::new(32);

/// Work lists of object or node addresses.
pub static ADDRESS_LISTS: Pool<Vec<usize>> = Pool::new(32);

/// A collection that can be emptied for reuse.
pub trait Recycle {
    fn recycle(&mut self);
}

impl<T, S> Recycle for HashSet<T, S> {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl<K, V, S> Recycle for HashMap<K, V, S> {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl<T> Recycle for Vec<T> {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// Bounded free list of reusable collections.
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T> Pool<T> {
    pub const fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Number of collections waiting to be reused.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<T: Default + Recycle> Pool<T> {
    /// Borrow an empty collection.
    pub fn borrow(&self) -> Borrowed<'_, T> {
        let value = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        Borrowed { pool: self, value }
    }

    fn give_back(&self, mut value: T) {
        value.recycle();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.capacity {
            free.push(value);
        }
    }
}

/// A collection on loan from a [`Pool`].
pub struct Borrowed<'a, T: Default + Recycle> {
    pool: &'a Pool<T>,
    value: T,
}

impl<T: Default + Recycle> Deref for Borrowed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Default + Recycle> DerefMut for Borrowed<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Default + Recycle> Drop for Borrowed<'_, T> {
    fn drop(&mut self) {
        let value = std::mem::take(&mut self.value);
        self.pool.give_back(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_collections_come_back_empty() {
        let pool: Pool<HashSet<usize>> = Pool::new(4);
        {
            let mut set = pool.borrow();
            set.insert(1);
            set.insert(2);
        }
        assert_eq!(pool.idle(), 1);
        let set = pool.borrow();
        assert!(set.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn reused_collection_keeps_its_allocation() {
        let pool: Pool<Vec<usize>> = Pool::new(4);
        {
            let mut list = pool.borrow();
            list.extend(0..100);
        }
        let list = pool.borrow();
        assert!(list.capacity() >= 100);
    }

    #[test]
    fn pool_is_bounded() {
        let pool: Pool<Vec<u8>> = Pool::new(2);
        let borrowed: Vec<_> = (0..5).map(|_| pool.borrow()).collect();
        drop(borrowed);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn nested_borrows_are_distinct() {
        let mut outer = ADDRESS_SETS.borrow();
        outer.insert(10);
        let inner = ADDRESS_SETS.borrow();
        assert!(inner.is_empty());
        assert!(outer.contains(&10));
    }
}
