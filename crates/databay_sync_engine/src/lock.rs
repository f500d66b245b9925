//! Keyed mutual exclusion.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// A set of held keys. At most one guard exists per key at a time.
pub struct KeyedLocks<K> {
    held: Mutex<HashSet<K>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Creates an empty lock map.
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
        }
    }

    /// Takes the lock for `key`, or returns `None` if it is already held.
    pub fn try_lock(&self, key: K) -> Option<KeyGuard<'_, K>> {
        if self.held.lock().insert(key.clone()) {
            Some(KeyGuard { locks: self, key })
        } else {
            None
        }
    }

    /// Returns true if `key` is currently held.
    pub fn is_locked(&self, key: &K) -> bool {
        self.held.lock().contains(key)
    }

    /// Returns the number of held keys.
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    /// Returns true if no key is held.
    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug> fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("held", &*self.held.lock())
            .finish()
    }
}

/// Releases its key when dropped.
pub struct KeyGuard<'a, K: Eq + Hash> {
    locks: &'a KeyedLocks<K>,
    key: K,
}

impl<K: Eq + Hash> KeyGuard<'_, K> {
    /// Returns the held key.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn second_lock_on_same_key_fails() {
        let locks = KeyedLocks::new();
        let guard = locks.try_lock("s1[0]").unwrap();
        assert!(locks.try_lock("s1[0]").is_none());
        assert!(locks.try_lock("s1[1]").is_some());
        assert_eq!(guard.key(), &"s1[0]");
        assert!(locks.is_locked(&"s1[0]"));
    }

    #[test]
    fn drop_releases() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.try_lock(7u64).unwrap();
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
        assert!(locks.try_lock(7u64).is_some());
    }

    #[test]
    fn released_on_panic() {
        let locks = Arc::new(KeyedLocks::new());
        let shared = locks.clone();
        let result = thread::spawn(move || {
            let _guard = shared.try_lock(1u32).unwrap();
            panic!("worker failed");
        })
        .join();
        assert!(result.is_err());
        assert!(!locks.is_locked(&1));
    }

    #[test]
    fn only_one_thread_wins() {
        let locks = Arc::new(KeyedLocks::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let guard = locks.try_lock("frame");
                    let won = guard.is_some();
                    // Hold until every thread has tried.
                    barrier.wait();
                    won
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
