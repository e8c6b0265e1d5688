//! Heap-backed mapped serializer.

use crate::error::{Result, StrataError};
use crate::region::{RegionRoot, WritableRegion};
use crate::serializer::{effective_alignment, MappedSerializer};
use std::alloc::{self, Layout};
use std::sync::Arc;

/// A mapped serializer whose every allocation is an independently owned,
/// aligned heap block.
///
/// Freezing reuses the block as the region's lifetime root, so it is O(1)
/// and copy-free; the block is released when the last region over it drops.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySerializer;

impl MemorySerializer {
    /// Create a new memory serializer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// An owned heap block; the lifetime root for memory-backed regions.
struct AlignedBlock {
    ptr: *mut u8,
    layout: Layout,
}

// SAFETY: the block is a plain byte buffer; ownership is unique to the Arc
// that wraps it and deallocation happens exactly once in Drop.
unsafe impl Send for AlignedBlock {}
unsafe impl Sync for AlignedBlock {}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        unsafe { alloc::dealloc(self.ptr, self.layout) }
    }
}

impl MappedSerializer for MemorySerializer {
    fn allocate_writable(&self, bytes: u64, alignment: usize) -> Result<WritableRegion> {
        let alignment = effective_alignment(alignment)?;
        if bytes == 0 {
            return Ok(WritableRegion::empty());
        }
        let size = usize::try_from(bytes)
            .map_err(|_| StrataError::AllocationFailed { bytes, alignment })?;
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| StrataError::AllocationFailed { bytes, alignment })?;

        // SAFETY: layout has nonzero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(StrataError::AllocationFailed { bytes, alignment });
        }

        let root: Arc<dyn RegionRoot> = Arc::new(AlignedBlock { ptr, layout });
        // SAFETY: ptr points to `size` zeroed bytes owned by `root`, and the
        // returned region is their only view.
        Ok(unsafe { WritableRegion::from_raw_parts(Some(root), ptr, size) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_many_sizes() {
        let serializer = MemorySerializer::new();

        let mut frozen = Vec::new();
        for size in 1..=1000usize {
            let mut writable = serializer.allocate_writable(size as u64, 1).unwrap();
            assert_eq!(writable.len(), size);
            for (i, byte) in writable.as_mut_slice().iter_mut().enumerate() {
                *byte = ((size + i) % 256) as u8;
            }
            frozen.push((size, serializer.freeze(writable).unwrap()));
        }

        for (size, region) in &frozen {
            assert_eq!(region.len(), *size);
            for (i, byte) in region.as_slice().iter().enumerate() {
                assert_eq!(*byte, ((size + i) % 256) as u8);
            }
        }
    }

    #[test]
    fn allocations_are_aligned() {
        let serializer = MemorySerializer::new();
        for alignment in [1usize, 8, 64, 4096] {
            let writable = serializer.allocate_writable(17, alignment).unwrap();
            let effective = alignment.max(std::mem::size_of::<usize>());
            assert_eq!(writable.as_ptr() as usize % effective, 0);
        }
    }

    #[test]
    fn allocations_start_zeroed() {
        let serializer = MemorySerializer::new();
        let writable = serializer.allocate_writable(256, 1).unwrap();
        assert!(writable.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_byte_allocation_is_empty() {
        let serializer = MemorySerializer::new();
        let writable = serializer.allocate_writable(0, 8).unwrap();
        assert!(writable.is_empty());
        let region = serializer.freeze(writable).unwrap();
        assert!(region.is_empty());
    }

    #[test]
    fn rejects_bad_alignment() {
        let serializer = MemorySerializer::new();
        assert!(serializer.allocate_writable(16, 24).is_err());
    }
}
