//! Shared, reference-counted resources keyed by identity
//!
//! The first `acquire` for a key creates the value; later ones share it.
//! Every acquisition returns a [`Lease`]; the value is disposed when the last
//! lease for it is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

struct Slot<V> {
    value: Arc<V>,
    refs: usize,
    generation: u64,
}

struct Inner<K, V> {
    slots: DashMap<K, Slot<V>>,
    generations: std::sync::atomic::AtomicU64,
}

/// Keyed cache of shared values with lease-based lifetime
pub struct SharedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    inner: Arc<Inner<K, V>>,
}

impl<K, V> SharedCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                generations: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    /// Lease the value for `key`, creating it on first use
    pub fn acquire<E>(&self, key: K, create: impl FnOnce() -> Result<V, E>) -> Result<Lease<K, V>, E> {
        self.acquire_fresh(key, create, |_| false)
    }

    /// Like [`acquire`](Self::acquire), but replaces a cached value that `is_stale`.
    ///
    /// Leases on the replaced value stay valid and keep it alive on their own.
    pub fn acquire_fresh<E>(
        &self,
        key: K,
        create: impl FnOnce() -> Result<V, E>,
        is_stale: impl Fn(&V) -> bool,
    ) -> Result<Lease<K, V>, E> {
        let (value, generation) = match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) if !is_stale(&occupied.get().value) => {
                let slot = occupied.get_mut();
                slot.refs += 1;
                debug!(key = %key, refs = slot.refs, "Sharing cached entry");
                (slot.value.clone(), slot.generation)
            }
            entry => {
                let value = Arc::new(create()?);
                let generation = self.next_generation();
                let slot = Slot {
                    value: value.clone(),
                    refs: 1,
                    generation,
                };
                match entry {
                    Entry::Occupied(mut occupied) => {
                        debug!(key = %key, "Replacing stale cached entry");
                        occupied.insert(slot);
                    }
                    Entry::Vacant(vacant) => {
                        debug!(key = %key, "Created cached entry");
                        vacant.insert(slot);
                    }
                }
                (value, generation)
            }
        };

        Ok(Lease {
            inner: self.inner.clone(),
            key,
            generation,
            value,
        })
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Outstanding leases on the current entry for `key`
    pub fn ref_count(&self, key: &K) -> usize {
        self.inner.slots.get(key).map_or(0, |slot| slot.refs)
    }

    fn next_generation(&self) -> u64 {
        self.inner
            .generations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

impl<K, V> Default for SharedCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for SharedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A counted reference to a shared value
pub struct Lease<K, V>
where
    K: Eq + Hash + Clone,
{
    inner: Arc<Inner<K, V>>,
    key: K,
    generation: u64,
    value: Arc<V>,
}

impl<K, V> Lease<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Shared handle to the value, not counted as a lease
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }
}

impl<K, V> Deref for Lease<K, V>
where
    K: Eq + Hash + Clone,
{
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K, V> Clone for Lease<K, V>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        if let Some(mut slot) = self.inner.slots.get_mut(&self.key) {
            if slot.generation == self.generation {
                slot.refs += 1;
            }
        }
        Self {
            inner: self.inner.clone(),
            key: self.key.clone(),
            generation: self.generation,
            value: self.value.clone(),
        }
    }
}

impl<K, V> Drop for Lease<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let removed = match self.inner.slots.entry(self.key.clone()) {
            Entry::Occupied(mut occupied) if occupied.get().generation == self.generation => {
                let slot = occupied.get_mut();
                slot.refs = slot.refs.saturating_sub(1);
                if slot.refs == 0 {
                    Some(occupied.remove())
                } else {
                    None
                }
            }
            _ => None,
        };

        // Dispose outside the shard lock
        drop(removed);
    }
}

impl<K, V> fmt::Debug for Lease<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked {
        stale: bool,
        disposed: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked(disposed: &Arc<AtomicUsize>, stale: bool) -> Result<Tracked, Infallible> {
        Ok(Tracked {
            stale,
            disposed: disposed.clone(),
        })
    }

    #[test]
    fn test_shared_until_last_lease_dropped() {
        let cache: SharedCache<String, Tracked> = SharedCache::new();
        let disposed = Arc::new(AtomicUsize::new(0));
        let created = AtomicUsize::new(0);

        let create = || {
            created.fetch_add(1, Ordering::SeqCst);
            tracked(&disposed, false)
        };
        let first = cache.acquire("movie".to_string(), create).unwrap();
        let second = cache
            .acquire("movie".to_string(), || tracked(&disposed, false))
            .unwrap();
        let third = second.clone();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(first.value(), second.value()));
        assert_eq!(cache.ref_count(&"movie".to_string()), 3);

        drop(first);
        drop(second);
        assert_eq!(disposed.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 1);

        drop(third);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_entry_is_replaced() {
        let cache: SharedCache<String, Tracked> = SharedCache::new();
        let disposed = Arc::new(AtomicUsize::new(0));

        let old = cache
            .acquire("movie".to_string(), || tracked(&disposed, true))
            .unwrap();
        let fresh = cache
            .acquire_fresh("movie".to_string(), || tracked(&disposed, false), |v| v.stale)
            .unwrap();
        assert!(!Arc::ptr_eq(old.value(), fresh.value()));
        assert_eq!(cache.ref_count(&"movie".to_string()), 1);

        // Dropping the old lease does not touch the new entry
        drop(old);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(cache.ref_count(&"movie".to_string()), 1);

        drop(fresh);
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_create_error_leaves_no_entry() {
        let cache: SharedCache<String, Tracked> = SharedCache::new();
        let result = cache.acquire("movie".to_string(), || Err::<Tracked, _>("boom"));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
