//! A single mapped arena of the backing file.

use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::io;
use std::sync::Arc;

/// The mapping behind one arena; the lifetime root for every region
/// allocated from it.
///
/// The base address is cached at creation and stays valid for the life of
/// the mapping: growth only ever happens through [`remap_in_place`], which
/// forbids relocation, so pointers handed out earlier never move.
///
/// [`remap_in_place`]: ArenaMap::remap_in_place
pub(crate) struct ArenaMap {
    map: UnsafeCell<MmapMut>,
    base: *mut u8,
}

// SAFETY: the mapping itself is only mutated through remap_in_place, which
// callers serialize with the owning serializer's allocation lock; the mapped
// bytes are handed out in disjoint, never-aliasing chunks.
unsafe impl Send for ArenaMap {}
unsafe impl Sync for ArenaMap {}

impl ArenaMap {
    fn new(mut map: MmapMut) -> Self {
        let base = map.as_mut_ptr();
        Self {
            map: UnsafeCell::new(map),
            base,
        }
    }

    /// Base address of the mapping.
    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    /// Grow the mapping to `new_len` bytes without relocating it.
    ///
    /// Fails if the kernel cannot extend the mapping where it sits; the
    /// caller falls back to a fresh arena in that case.
    ///
    /// # Safety
    ///
    /// The caller must hold the owning serializer's allocation lock and must
    /// already have extended the backing file to cover `new_len`.
    #[cfg(target_os = "linux")]
    unsafe fn grow(&self, new_len: usize) -> io::Result<()> {
        use memmap2::RemapOptions;
        let map = &mut *self.map.get();
        // RemapOptions defaults to forbidding relocation, which is the point:
        // outstanding pointers into the arena must stay valid.
        map.remap(new_len, RemapOptions::new())
    }

    #[cfg(not(target_os = "linux"))]
    unsafe fn grow(&self, _new_len: usize) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "in-place mapping growth requires mremap",
        ))
    }
}

/// One contiguous mapped span of the backing file, bump-allocated.
pub(crate) struct Arena {
    pub(crate) map: Arc<ArenaMap>,
    /// Offset of this arena within the backing file.
    pub(crate) start_offset: u64,
    /// Currently mapped length.
    pub(crate) len: usize,
    /// Bump pointer; never exceeds `len`.
    pub(crate) write_offset: usize,
}

impl Arena {
    pub(crate) fn new(map: MmapMut, start_offset: u64) -> Self {
        let len = map.len();
        Self {
            map: Arc::new(ArenaMap::new(map)),
            start_offset,
            len,
            write_offset: 0,
        }
    }

    /// Bump-allocate `bytes` bytes at the requested alignment, or `None` if
    /// the arena has no room.
    pub(crate) fn allocate(&mut self, bytes: usize, alignment: usize) -> Option<*mut u8> {
        let padding = (alignment - self.write_offset % alignment) % alignment;
        if self.write_offset + padding + bytes > self.len {
            return None;
        }
        // SAFETY: the slot lies within the mapping and bump allocation hands
        // out each byte range exactly once.
        let ptr = unsafe { self.map.base().add(self.write_offset + padding) };
        self.write_offset += padding + bytes;
        Some(ptr)
    }

    /// Grow the mapping in place to `new_len`. Must be called with the
    /// owning serializer's allocation lock held and the file already
    /// extended.
    pub(crate) fn expand(&mut self, new_len: usize) -> io::Result<()> {
        // SAFETY: caller holds the allocation lock and has extended the file.
        unsafe { self.map.grow(new_len) }?;
        self.len = new_len;
        Ok(())
    }

    /// Bytes between the bump pointer and the end of the arena.
    pub(crate) fn free_space(&self) -> usize {
        self.len - self.write_offset
    }

    /// File offset one past the last populated byte.
    pub(crate) fn populated(&self) -> u64 {
        self.start_offset + self.write_offset as u64
    }
}
