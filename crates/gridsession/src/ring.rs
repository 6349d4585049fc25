//! Bounded, ring-backed set of recently seen session id hashes.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};

/// Largest supported ring capacity.
pub const MAX_RING_CAPACITY: usize = 500_000;

/// Default ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = MAX_RING_CAPACITY;

/// Hash a session id the way every lifecycle hook does.
pub fn hash_session_id(session_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    hasher.finish()
}

/// Fixed-capacity set with FIFO eviction.
///
/// Remembers the last `capacity` distinct hashes that were added. Once the
/// ring wraps, the oldest occupant is forgotten, so `contains` may return
/// false for a hash that was added long ago. Callers use it as a
/// recently-seen heuristic, never as a source of truth.
#[derive(Debug)]
pub struct BoundedRingHashSet {
    capacity: usize,
    position: Mutex<usize>,
    slots: Mutex<Vec<Option<u64>>>,
    members: RwLock<HashSet<u64>>,
}

impl BoundedRingHashSet {
    /// Create a ring holding at most `capacity` hashes.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_RING_CAPACITY {
            return Err(Error::InvalidCapacity {
                requested: capacity,
                max: MAX_RING_CAPACITY,
            });
        }

        Ok(Self {
            capacity,
            position: Mutex::new(0),
            slots: Mutex::new(vec![None; capacity]),
            members: RwLock::new(HashSet::with_capacity(capacity.min(1024))),
        })
    }

    /// Record `hash`, evicting the occupant of the next ring slot if needed.
    pub fn add(&self, hash: u64) {
        if self.contains(hash) {
            return;
        }

        let position = self.next_position();
        let evicted = self.slots.lock()[position].replace(hash);

        let mut members = self.members.write();
        if let Some(evicted) = evicted {
            members.remove(&evicted);
        }
        members.insert(hash);
    }

    /// Forget `hash`. Its ring slot keeps the stale value until overwritten.
    pub fn remove(&self, hash: u64) {
        self.members.write().remove(&hash);
    }

    /// Whether `hash` was added recently and not removed since.
    pub fn contains(&self, hash: u64) -> bool {
        self.members.read().contains(&hash)
    }

    /// Number of hashes currently remembered.
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether no hash is remembered.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Maximum number of hashes remembered at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_position(&self) -> usize {
        let mut position = self.position.lock();
        if *position >= self.capacity {
            *position = 0;
        }
        let current = *position;
        *position += 1;
        current
    }
}

impl Default for BoundedRingHashSet {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
            position: Mutex::new(0),
            slots: Mutex::new(vec![None; DEFAULT_RING_CAPACITY]),
            members: RwLock::new(HashSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_capacity() {
        assert!(matches!(
            BoundedRingHashSet::new(0),
            Err(Error::InvalidCapacity { requested: 0, .. })
        ));
        assert!(BoundedRingHashSet::new(MAX_RING_CAPACITY + 1).is_err());
        assert!(BoundedRingHashSet::new(1).is_ok());
        assert!(BoundedRingHashSet::new(MAX_RING_CAPACITY).is_ok());
    }

    #[test]
    fn test_capacity_one_eviction() {
        let ring = BoundedRingHashSet::new(1).unwrap();

        ring.add(1);
        ring.add(1);
        assert!(ring.contains(1));
        assert_eq!(ring.len(), 1);

        ring.add(2);
        assert!(!ring.contains(1));
        assert!(ring.contains(2));
    }

    #[test]
    fn test_fifo_eviction_order() {
        let ring = BoundedRingHashSet::new(3).unwrap();
        for hash in 1..=3 {
            ring.add(hash);
        }

        ring.add(4);

        assert!(!ring.contains(1));
        assert!(ring.contains(2));
        assert!(ring.contains(3));
        assert!(ring.contains(4));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_remove() {
        let ring = BoundedRingHashSet::new(4).unwrap();
        ring.add(7);
        ring.remove(7);

        assert!(!ring.contains(7));
        assert!(ring.is_empty());

        // Removing an unknown hash is harmless
        ring.remove(42);
    }

    #[test]
    fn test_zero_hash_is_a_regular_member() {
        let ring = BoundedRingHashSet::new(2).unwrap();
        ring.add(5);
        ring.add(0);
        assert!(ring.contains(0));
        assert!(ring.contains(5));
    }

    #[test]
    fn test_hash_session_id_is_stable() {
        assert_eq!(hash_session_id("abc"), hash_session_id("abc"));
        assert_ne!(hash_session_id("abc"), hash_session_id("abd"));
    }

    #[test]
    fn test_default_capacity() {
        let ring = BoundedRingHashSet::default();
        assert_eq!(ring.capacity(), DEFAULT_RING_CAPACITY);
    }
}
