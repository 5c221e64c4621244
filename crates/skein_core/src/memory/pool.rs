//! # Slot Pool
//!
//! Growable generational arena for objects that are frequently allocated and freed.
//!
//! Handles carry the generation of the slot they were issued for, so a handle
//! kept past `remove` never aliases the next occupant of the same slot.

/// A growable pool with generational handles.
///
/// Slots are recycled through a free list. Removing a value bumps the slot's
/// generation, which invalidates every outstanding handle to it.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Wrap it in a mutex when it is shared.
///
/// # Example
///
/// ```rust
/// use skein_core::SlotPool;
///
/// let mut pool: SlotPool<&str> = SlotPool::new();
/// let handle = pool.insert("mesh");
/// assert_eq!(pool.get(handle), Some(&"mesh"));
///
/// pool.remove(handle);
/// assert!(pool.get(handle).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct SlotPool<T> {
    /// Slot storage, indexed by `PoolHandle::index`.
    slots: Vec<Slot<T>>,
    /// Free list - indices of vacant slots.
    free_list: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Handle to a value stored in a [`SlotPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle {
    /// Index into the pool.
    index: u32,
    /// Generation of the slot when the handle was issued.
    generation: u32,
}

impl PoolHandle {
    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Returns the slot generation this handle was issued for.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Default for SlotPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotPool<T> {
    /// Creates an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Creates an empty pool with room for `capacity` values before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Returns the number of stored values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the pool holds no values.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value and returns its handle.
    ///
    /// Reuses a vacant slot when one exists, otherwise grows the pool.
    pub fn insert(&mut self, value: T) -> PoolHandle {
        let handle = match self.free_list.pop() {
            Some(index) => PoolHandle {
                index,
                generation: self.slots[index as usize].generation,
            },
            None => {
                let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                PoolHandle {
                    index,
                    generation: 0,
                }
            }
        };

        self.slots[handle.index()].value = Some(value);
        self.len += 1;
        handle
    }

    /// Removes a value.
    ///
    /// # Returns
    ///
    /// The removed value, or None if the handle was stale.
    pub fn remove(&mut self, handle: PoolHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Returns true if the handle refers to a live value.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: PoolHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Gets a reference to a stored value.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)?
            .value
            .as_ref()
    }

    /// Gets a mutable reference to a stored value.
    #[inline]
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)?
            .value
            .as_mut()
    }

    /// Removes every value, invalidating all handles.
    pub fn clear(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.len);
        self.free_list.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                drained.push(value);
            }
            self.free_list.push(u32::try_from(index).unwrap_or(u32::MAX));
        }
        self.len = 0;
        drained
    }

    /// Iterates over all stored values.
    pub fn iter(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    PoolHandle {
                        index: u32::try_from(index).unwrap_or(u32::MAX),
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_insert_remove() {
        let mut pool: SlotPool<u32> = SlotPool::new();

        let h1 = pool.insert(42);
        assert_eq!(*pool.get(h1).unwrap(), 42);
        assert_eq!(pool.len(), 1);

        let removed = pool.remove(h1).unwrap();
        assert_eq!(removed, 42);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pool_reuse_invalidates_stale_handle() {
        let mut pool: SlotPool<u32> = SlotPool::new();

        let h1 = pool.insert(1);
        pool.remove(h1);

        let h2 = pool.insert(2);
        assert_eq!(h1.index(), h2.index()); // Same slot reused
        assert_ne!(h1.generation(), h2.generation());
        assert!(pool.get(h1).is_none());
        assert!(pool.remove(h1).is_none());
        assert_eq!(*pool.get(h2).unwrap(), 2);
    }

    #[test]
    fn test_pool_grows() {
        let mut pool: SlotPool<usize> = SlotPool::with_capacity(2);
        let handles: Vec<_> = (0..100).map(|i| pool.insert(i)).collect();

        assert_eq!(pool.len(), 100);
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(pool.get(*handle), Some(&i));
        }
    }

    #[test]
    fn test_clear() {
        let mut pool: SlotPool<u32> = SlotPool::new();
        let h = pool.insert(7);
        pool.insert(8);

        let drained = pool.clear();
        assert_eq!(drained.len(), 2);
        assert!(pool.is_empty());
        assert!(pool.get(h).is_none());

        let reused = pool.insert(9);
        assert_eq!(pool.iter().count(), 1);
        assert_eq!(pool.get(reused), Some(&9));
    }
}
