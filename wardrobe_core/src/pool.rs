//! Slab pool for resource records.
//!
//! Each value type gets one slab of slots plus a free list of slot indices.
//! Releasing a resource resets its slot and bumps the slot generation before
//! the index goes back on the free list, so a [`SlotKey`] from a previous
//! occupant never matches the next one.
//!
//! Slots also carry the owner count used by [`Reference::duplicate`](crate::reference::Reference::duplicate):
//! the release behavior runs once, when the count reaches zero.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::resource::{Resource, ResourceKind};

/// Identifies one occupancy of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Pool counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Slots ever created (including prewarmed ones).
    pub allocated: usize,
    /// Acquisitions served from the free list.
    pub recycled: usize,
    /// Occupied slots.
    pub live: usize,
    /// Resources whose release behavior has run.
    pub released: usize,
}

struct Slot<T: Send + 'static> {
    generation: u32,
    owners: u32,
    resource: Option<Resource<T>>,
}

struct Slab<T: Send + 'static> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    stats: PoolStats,
}

impl<T: Send + 'static> Slab<T> {
    fn occupied_mut(&mut self, key: SlotKey) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation && slot.resource.is_some())
    }

    fn occupied(&self, key: SlotKey) -> Option<&Slot<T>> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation && slot.resource.is_some())
    }

    /// Resets a slot and returns it to the free list.
    fn vacate(&mut self, index: u32) -> Option<Resource<T>> {
        let slot = &mut self.slots[index as usize];
        let resource = slot.resource.take();
        slot.owners = 0;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.stats.live -= 1;
        self.stats.released += 1;
        resource
    }
}

/// Shared handle to one value type's slab.
pub struct ResourcePool<T: Send + 'static> {
    inner: Arc<Mutex<Slab<T>>>,
}

impl<T: Send + 'static> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Default for ResourcePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a pool with `prewarm` empty slots already on the free list.
    pub fn with_capacity(prewarm: usize) -> Self {
        let mut slots = Vec::with_capacity(prewarm);
        let mut free = Vec::with_capacity(prewarm);
        for index in 0..prewarm {
            slots.push(Slot {
                generation: 0,
                owners: 0,
                resource: None,
            });
            free.push(index as u32);
        }
        Self {
            inner: Arc::new(Mutex::new(Slab {
                slots,
                free,
                stats: PoolStats {
                    allocated: prewarm,
                    ..PoolStats::default()
                },
            })),
        }
    }

    // Poisoning is recovered: release paths must never panic.
    fn lock(&self) -> MutexGuard<'_, Slab<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a resource with a single owner.
    pub(crate) fn acquire(&self, resource: Resource<T>) -> SlotKey {
        let mut slab = self.lock();
        slab.stats.live += 1;

        if let Some(index) = slab.free.pop() {
            slab.stats.recycled += 1;
            let slot = &mut slab.slots[index as usize];
            slot.owners = 1;
            slot.resource = Some(resource);
            return SlotKey {
                index,
                generation: slot.generation,
            };
        }

        let index = slab.slots.len() as u32;
        slab.slots.push(Slot {
            generation: 0,
            owners: 1,
            resource: Some(resource),
        });
        slab.stats.allocated += 1;
        SlotKey {
            index,
            generation: 0,
        }
    }

    /// Adds an owner. Fails for stale keys.
    pub(crate) fn retain(&self, key: SlotKey) -> bool {
        match self.lock().occupied_mut(key) {
            Some(slot) => {
                slot.owners += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one owner; the last one runs the release behavior.
    pub(crate) fn release(&self, key: SlotKey) {
        let resource = {
            let mut slab = self.lock();
            let Some(slot) = slab.occupied_mut(key) else {
                return;
            };
            slot.owners -= 1;
            if slot.owners > 0 {
                return;
            }
            slab.vacate(key.index)
        };

        // Outside the lock: a dependent resource releases into this same pool.
        if let Some(resource) = resource {
            resource.release();
        }
    }

    /// Runs the release behavior now, whatever the owner count.
    pub(crate) fn revoke(&self, key: SlotKey) -> bool {
        let resource = {
            let mut slab = self.lock();
            if slab.occupied(key).is_none() {
                return false;
            }
            slab.vacate(key.index)
        };

        match resource {
            Some(resource) => {
                resource.release();
                true
            }
            None => false,
        }
    }

    /// Whether `key` still names a live occupant.
    pub fn is_current(&self, key: SlotKey) -> bool {
        self.lock().occupied(key).is_some()
    }

    /// Owner count of a live occupant, 0 for stale keys.
    pub fn owners(&self, key: SlotKey) -> u32 {
        self.lock().occupied(key).map_or(0, |slot| slot.owners)
    }

    pub fn kind(&self, key: SlotKey) -> Option<ResourceKind> {
        self.lock()
            .occupied(key)
            .and_then(|slot| slot.resource.as_ref())
            .map(Resource::kind)
    }

    /// Live occupants of one variant.
    pub fn live_of(&self, kind: ResourceKind) -> usize {
        self.lock()
            .slots
            .iter()
            .filter_map(|slot| slot.resource.as_ref())
            .filter(|resource| resource.kind() == kind)
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    pub fn free_slots(&self) -> usize {
        self.lock().free.len()
    }

    /// Whether both handles point at the same slab.
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(value: u32, counter: &Arc<AtomicUsize>) -> Resource<u32> {
        let counter = counter.clone();
        Resource::callback(value, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    // =============================================================================
    // Owner counting
    // =============================================================================

    #[test]
    fn last_owner_runs_release() {
        let pool = ResourcePool::new();
        let released = Arc::new(AtomicUsize::new(0));
        let key = pool.acquire(counting(1, &released));

        assert!(pool.retain(key));
        assert_eq!(pool.owners(key), 2);

        pool.release(key);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(pool.is_current(key));

        pool.release(key);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!pool.is_current(key));
        assert_eq!(pool.stats().live, 0);
        assert_eq!(pool.stats().released, 1);
    }

    #[test]
    fn stale_key_is_inert() {
        let pool = ResourcePool::new();
        let released = Arc::new(AtomicUsize::new(0));
        let key = pool.acquire(counting(1, &released));
        pool.release(key);

        // Same slot, next occupant.
        let next = pool.acquire(counting(2, &released));
        assert_eq!(next.index(), key.index());
        assert_ne!(next.generation(), key.generation());

        pool.release(key);
        assert!(!pool.retain(key));
        assert!(!pool.revoke(key));
        assert!(pool.is_current(next));
        assert_eq!(pool.owners(next), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn revoke_ignores_owner_count() {
        let pool = ResourcePool::new();
        let released = Arc::new(AtomicUsize::new(0));
        let key = pool.acquire(counting(1, &released));
        pool.retain(key);
        pool.retain(key);

        assert!(pool.revoke(key));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // Remaining owners release into a vacated slot.
        pool.release(key);
        pool.release(key);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    // =============================================================================
    // Recycling
    // =============================================================================

    #[test]
    fn prewarmed_slots_are_recycled() {
        let pool = ResourcePool::<u32>::with_capacity(4);
        assert_eq!(pool.free_slots(), 4);

        let released = Arc::new(AtomicUsize::new(0));
        let key = pool.acquire(counting(1, &released));
        let stats = pool.stats();
        assert_eq!(stats.allocated, 4);
        assert_eq!(stats.recycled, 1);
        assert_eq!(pool.free_slots(), 3);

        pool.release(key);
        assert_eq!(pool.free_slots(), 4);
    }

    #[test]
    fn live_counts_by_kind() {
        let pool = ResourcePool::new();
        let released = Arc::new(AtomicUsize::new(0));
        let a = pool.acquire(counting(1, &released));
        let _b = pool.acquire(counting(2, &released));

        assert_eq!(pool.live_of(ResourceKind::Callback), 2);
        assert_eq!(pool.live_of(ResourceKind::HostObject), 0);
        assert_eq!(pool.kind(a), Some(ResourceKind::Callback));

        pool.release(a);
        assert_eq!(pool.live_of(ResourceKind::Callback), 1);
        assert_eq!(pool.kind(a), None);
    }
}
