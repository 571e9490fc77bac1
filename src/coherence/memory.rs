//! Workspace memory: per-location pools of recycled blocks
//!
//! Tile instances that are not caller-owned draw their buffers from here.
//! Freed blocks go back to a free list keyed by exact byte size, since a
//! matrix mostly allocates a handful of tile shapes. Fresh blocks come from
//! one [`TrackingAllocator`] per location, which enforces the capacity.

use crate::error::{Error, Result};
use crate::runtime::{Allocator, Runtime, TrackingAllocator};
use crate::tile::Location;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

/// Cumulative statistics for one location's pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Allocations served from the free list
    pub hits: u64,
    /// Allocations that needed a fresh block
    pub misses: u64,
    /// Bytes sitting in the free list
    pub pooled_bytes: usize,
    /// Bytes handed out and not yet released
    pub active_bytes: usize,
}

impl PoolStats {
    /// Total allocation calls (`hits + misses`)
    pub fn total_allocations(&self) -> u64 {
        self.hits + self.misses
    }
}

#[derive(Default)]
struct Pool {
    free: HashMap<usize, Vec<u64>>,
    stats: PoolStats,
}

/// Workspace allocator for the host and every device of one matrix
pub struct Memory {
    allocators: Vec<TrackingAllocator>,
    pools: Vec<Mutex<Pool>>,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").field("allocators", &self.allocators).finish()
    }
}

impl Memory {
    /// Host plus `num_devices` devices of runtime `R`, all unlimited
    pub fn new<R: Runtime>(num_devices: usize) -> Self {
        Self::with_capacity::<R>(num_devices, None)
    }

    /// Like [`Memory::new`], with a byte limit on each device
    pub fn with_capacity<R: Runtime>(num_devices: usize, device_capacity: Option<usize>) -> Self {
        let mut allocators = vec![TrackingAllocator::host(None)];
        for d in 0..num_devices {
            allocators.push(TrackingAllocator::device::<R>(d, device_capacity));
        }
        let pools = (0..allocators.len()).map(|_| Mutex::new(Pool::default())).collect();
        Self { allocators, pools }
    }

    /// Number of device locations
    pub fn num_devices(&self) -> usize {
        self.allocators.len() - 1
    }

    fn slot(&self, location: Location) -> Result<usize> {
        let slot = location.slot();
        if slot >= self.allocators.len() {
            return Err(Error::invalid_argument(
                "location",
                format!("{} does not exist ({} devices)", location, self.num_devices()),
            ));
        }
        Ok(slot)
    }

    /// Get a block of `bytes` at `location`, recycling a freed block of the same size
    pub fn alloc(&self, location: Location, bytes: usize) -> Result<u64> {
        let slot = self.slot(location)?;
        let mut pool = self.pools[slot].lock();
        if let Some(ptr) = pool.free.get_mut(&bytes).and_then(|list| list.pop()) {
            pool.stats.hits += 1;
            pool.stats.pooled_bytes -= bytes;
            pool.stats.active_bytes += bytes;
            return Ok(ptr);
        }
        let ptr = match self.allocators[slot].allocate(bytes) {
            Ok(ptr) => ptr,
            Err(Error::OutOfMemory { .. }) if pool.stats.pooled_bytes > 0 => {
                // cached blocks of other sizes count against the limit; drop them and retry
                Self::drain(&self.allocators[slot], &mut pool);
                self.allocators[slot].allocate(bytes)?
            }
            Err(e) => return Err(e),
        };
        trace!(%location, bytes, "workspace block allocated");
        pool.stats.misses += 1;
        pool.stats.active_bytes += bytes;
        Ok(ptr)
    }

    /// Return a block to its pool
    pub fn release(&self, location: Location, ptr: u64, bytes: usize) {
        let Ok(slot) = self.slot(location) else {
            return;
        };
        let mut pool = self.pools[slot].lock();
        pool.free.entry(bytes).or_default().push(ptr);
        pool.stats.pooled_bytes += bytes;
        pool.stats.active_bytes = pool.stats.active_bytes.saturating_sub(bytes);
    }

    /// Preallocate `count` blocks of `bytes` at `location` into the free list
    pub fn reserve(&self, location: Location, bytes: usize, count: usize) -> Result<()> {
        let slot = self.slot(location)?;
        let mut fresh = Vec::with_capacity(count);
        for _ in 0..count {
            fresh.push(self.allocators[slot].allocate(bytes)?);
        }
        let mut pool = self.pools[slot].lock();
        pool.stats.pooled_bytes += bytes * fresh.len();
        pool.free.entry(bytes).or_default().extend(fresh);
        Ok(())
    }

    fn drain(allocator: &TrackingAllocator, pool: &mut Pool) {
        for (bytes, list) in pool.free.drain() {
            for ptr in list {
                allocator.deallocate(ptr, bytes);
            }
        }
        pool.stats.pooled_bytes = 0;
    }

    /// Free every cached block at every location
    pub fn clear(&self) {
        for (allocator, pool) in self.allocators.iter().zip(&self.pools) {
            Self::drain(allocator, &mut pool.lock());
        }
    }

    /// Statistics for `location`
    pub fn stats(&self, location: Location) -> PoolStats {
        match self.slot(location) {
            Ok(slot) => self.pools[slot].lock().stats.clone(),
            Err(_) => PoolStats::default(),
        }
    }

    /// Bytes obtained from the allocator at `location`, pooled or active
    pub fn allocated_bytes(&self, location: Location) -> usize {
        self.slot(location)
            .map(|s| self.allocators[s].allocated_bytes())
            .unwrap_or(0)
    }

    /// Byte limit at `location`
    pub fn capacity(&self, location: Location) -> Option<usize> {
        self.slot(location).ok().and_then(|s| self.allocators[s].capacity())
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cpu::CpuRuntime;

    #[test]
    fn test_blocks_are_recycled() {
        let mem = Memory::new::<CpuRuntime>(1);
        let a = mem.alloc(Location::Device(0), 256).unwrap();
        mem.release(Location::Device(0), a, 256);
        let b = mem.alloc(Location::Device(0), 256).unwrap();
        assert_eq!(a, b);
        let stats = mem.stats(Location::Device(0));
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.active_bytes, 256);
        mem.release(Location::Device(0), b, 256);
    }

    #[test]
    fn test_capacity_drains_cached_blocks() {
        let mem = Memory::with_capacity::<CpuRuntime>(1, Some(512));
        let dev = Location::Device(0);
        let a = mem.alloc(dev, 384).unwrap();
        mem.release(dev, a, 384);
        // 384 pooled + 256 new exceeds 512, so the pool is drained first
        let b = mem.alloc(dev, 256).unwrap();
        assert_eq!(mem.allocated_bytes(dev), 256);
        assert!(matches!(mem.alloc(dev, 512), Err(Error::OutOfMemory { .. })));
        mem.release(dev, b, 256);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let mem = Memory::new::<CpuRuntime>(0);
        assert!(mem.alloc(Location::Device(2), 8).is_err());
    }
}
