//! Memory allocator trait and a byte-tracking implementation
//!
//! Workspace pools draw raw blocks from an [`Allocator`]. The
//! [`TrackingAllocator`] wraps a pair of allocate/deallocate functions for one
//! location, counts live bytes and enforces an optional limit, so resource
//! exhaustion surfaces as [`Error::OutOfMemory`] instead of an abort.

use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::tile::Location;
use std::alloc::{Layout as AllocLayout, alloc_zeroed, dealloc};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Alignment of every host and emulated device buffer (AVX-512)
pub const ALIGNMENT: usize = 64;

/// Memory allocator trait for one location
pub trait Allocator: Send + Sync {
    /// Allocate `size_bytes`; the block is zeroed
    fn allocate(&self, size_bytes: usize) -> Result<u64>;

    /// Return a block obtained from [`Allocator::allocate`]
    fn deallocate(&self, ptr: u64, size_bytes: usize);

    /// Live bytes
    fn allocated_bytes(&self) -> usize {
        0
    }

    /// Byte limit, if any
    fn capacity(&self) -> Option<usize> {
        None
    }
}

type AllocFn = Arc<dyn Fn(usize) -> Result<u64> + Send + Sync>;
type DeallocFn = Arc<dyn Fn(u64, usize) + Send + Sync>;

/// Allocator that counts live bytes and refuses to exceed a limit
#[derive(Clone)]
pub struct TrackingAllocator {
    location: Location,
    allocate_fn: AllocFn,
    deallocate_fn: DeallocFn,
    limit: Option<usize>,
    allocated: Arc<AtomicUsize>,
}

impl fmt::Debug for TrackingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("location", &self.location)
            .field("limit", &self.limit)
            .field("allocated", &self.allocated.load(Ordering::Relaxed))
            .finish()
    }
}

impl TrackingAllocator {
    /// Create an allocator from raw functions
    pub fn new(
        location: Location,
        limit: Option<usize>,
        allocate_fn: impl Fn(usize) -> Result<u64> + Send + Sync + 'static,
        deallocate_fn: impl Fn(u64, usize) + Send + Sync + 'static,
    ) -> Self {
        Self {
            location,
            allocate_fn: Arc::new(allocate_fn),
            deallocate_fn: Arc::new(deallocate_fn),
            limit,
            allocated: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Aligned heap allocator for host workspace
    pub fn host(limit: Option<usize>) -> Self {
        Self::new(Location::Host, limit, host_allocate, host_deallocate)
    }

    /// Allocator for accelerator `device` of runtime `R`
    pub fn device<R: Runtime>(device: usize, limit: Option<usize>) -> Self {
        let dev = R::device(device);
        let dev2 = dev.clone();
        Self::new(
            Location::Device(device),
            limit,
            move |size| R::allocate(size, &dev),
            move |ptr, size| R::deallocate(ptr, size, &dev2),
        )
    }

    /// Location this allocator serves
    pub fn location(&self) -> Location {
        self.location
    }
}

impl Allocator for TrackingAllocator {
    fn allocate(&self, size_bytes: usize) -> Result<u64> {
        let reserved = self.allocated.fetch_add(size_bytes, Ordering::AcqRel) + size_bytes;
        if self.limit.is_some_and(|limit| reserved > limit) {
            self.allocated.fetch_sub(size_bytes, Ordering::AcqRel);
            return Err(Error::OutOfMemory {
                location: self.location,
                size: size_bytes,
            });
        }
        match (self.allocate_fn)(size_bytes) {
            Ok(ptr) => Ok(ptr),
            Err(e) => {
                self.allocated.fetch_sub(size_bytes, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    fn deallocate(&self, ptr: u64, size_bytes: usize) {
        (self.deallocate_fn)(ptr, size_bytes);
        self.allocated.fetch_sub(size_bytes, Ordering::AcqRel);
    }

    fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    fn capacity(&self) -> Option<usize> {
        self.limit
    }
}

/// Zeroed, 64-byte aligned heap allocation
pub(crate) fn host_allocate(size_bytes: usize) -> Result<u64> {
    if size_bytes == 0 {
        return Ok(0);
    }
    let layout = AllocLayout::from_size_align(size_bytes, ALIGNMENT).map_err(|_| {
        Error::invalid_argument("size_bytes", format!("{} is not a valid allocation", size_bytes))
    })?;
    // SAFETY: layout has non-zero size
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(Error::OutOfMemory {
            location: Location::Host,
            size: size_bytes,
        });
    }
    Ok(ptr as u64)
}

/// Release a block from [`host_allocate`]
pub(crate) fn host_deallocate(ptr: u64, size_bytes: usize) {
    if ptr == 0 || size_bytes == 0 {
        return;
    }
    if let Ok(layout) = AllocLayout::from_size_align(size_bytes, ALIGNMENT) {
        // SAFETY: ptr came from host_allocate with the same layout
        unsafe { dealloc(ptr as *mut u8, layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_allocator_limit() {
        let alloc = TrackingAllocator::host(Some(256));
        let a = alloc.allocate(192).unwrap();
        assert_eq!(alloc.allocated_bytes(), 192);
        assert!(matches!(
            alloc.allocate(128),
            Err(Error::OutOfMemory { location: Location::Host, size: 128 })
        ));
        assert_eq!(alloc.allocated_bytes(), 192);
        alloc.deallocate(a, 192);
        assert_eq!(alloc.allocated_bytes(), 0);
    }

    #[test]
    fn test_host_allocation_is_aligned_and_zeroed() {
        let ptr = host_allocate(100).unwrap();
        assert_eq!(ptr % ALIGNMENT as u64, 0);
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, 100) };
        assert!(bytes.iter().all(|&b| b == 0));
        host_deallocate(ptr, 100);
    }
}
