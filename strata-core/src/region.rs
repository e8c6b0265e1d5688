//! Frozen and writable views over raw bytes.
//!
//! A region is a `(pointer, length)` pair plus a *lifetime root*: a
//! reference-counted handle whose destructor releases whatever storage backs
//! the bytes (a heap block, a file mapping, a parent region). Sub-ranges and
//! copies share the root, so the backing storage stays alive exactly as long
//! as any view into it exists.

use crate::error::{Result, StrataError};
use std::ptr::NonNull;
use std::sync::Arc;

/// Marker for storage owned on behalf of one or more regions.
///
/// Anything `Send + Sync` qualifies; the handle is only ever dropped, never
/// inspected. Backends put their mapping or heap block behind
/// `Arc<dyn RegionRoot>` and hand out regions that clone the handle.
pub trait RegionRoot: Send + Sync {}

impl<T: Send + Sync + ?Sized> RegionRoot for T {}

/// An immutable, shareable view over a range of bytes.
///
/// Cloning is cheap (a refcount bump on the lifetime root). The bytes are
/// guaranteed valid and unchanged for as long as any clone of the region,
/// including sub-ranges, exists.
#[derive(Clone)]
pub struct FrozenRegion {
    root: Option<Arc<dyn RegionRoot>>,
    ptr: *const u8,
    len: usize,
}

// SAFETY: the bytes behind `ptr` are immutable for the region's lifetime and
// the backing storage is pinned by `root`, which is itself Send + Sync.
unsafe impl Send for FrozenRegion {}
unsafe impl Sync for FrozenRegion {}

impl FrozenRegion {
    /// The empty region. Carries no lifetime root.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            root: None,
            ptr: NonNull::dangling().as_ptr(),
            len: 0,
        }
    }

    /// Assemble a region from raw parts.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes that are valid, initialized and
    /// immutable for as long as `root` (and every clone of the returned
    /// region) is alive.
    #[must_use]
    pub unsafe fn from_raw_parts(
        root: Option<Arc<dyn RegionRoot>>,
        ptr: *const u8,
        len: usize,
    ) -> Self {
        Self { root, ptr, len }
    }

    /// Length of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the region is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw pointer to the first byte.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// View the region's bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: construction guarantees ptr/len describe valid immutable
        // bytes pinned by the root for at least the lifetime of &self.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Return the sub-range `[start, end)` as a region sharing this
    /// region's lifetime root.
    pub fn range(&self, start: usize, end: usize) -> Result<FrozenRegion> {
        if start > end || end > self.len {
            return Err(StrataError::RegionBounds {
                start,
                end,
                length: self.len,
            });
        }
        // SAFETY: the sub-range lies within this region and shares its root.
        Ok(unsafe {
            Self::from_raw_parts(self.root.clone(), self.ptr.add(start), end - start)
        })
    }
}

impl std::fmt::Debug for FrozenRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenRegion")
            .field("len", &self.len)
            .field("rooted", &self.root.is_some())
            .finish()
    }
}

/// A mutable view over freshly allocated bytes.
///
/// Produced by [`MappedSerializer::allocate_writable`]; consumed exactly once
/// by [`MappedSerializer::freeze`], after which the bytes become immutable.
/// No two live writable regions alias.
///
/// [`MappedSerializer::allocate_writable`]: crate::serializer::MappedSerializer::allocate_writable
/// [`MappedSerializer::freeze`]: crate::serializer::MappedSerializer::freeze
pub struct WritableRegion {
    root: Option<Arc<dyn RegionRoot>>,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the region is the sole view of its bytes until frozen, and the
// backing storage is pinned by `root`. Mutation requires &mut self.
unsafe impl Send for WritableRegion {}
unsafe impl Sync for WritableRegion {}

impl WritableRegion {
    /// The empty writable region. Carries no lifetime root.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            root: None,
            ptr: NonNull::dangling().as_ptr(),
            len: 0,
        }
    }

    /// Assemble a writable region from raw parts.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` initialized bytes that no other live view
    /// aliases, valid for as long as `root` is alive.
    #[must_use]
    pub unsafe fn from_raw_parts(
        root: Option<Arc<dyn RegionRoot>>,
        ptr: *mut u8,
        len: usize,
    ) -> Self {
        Self { root, ptr, len }
    }

    /// Length of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the region is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw pointer to the first byte.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Raw mutable pointer to the first byte.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// View the region's bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: construction guarantees ptr/len describe valid initialized
        // bytes that only this region views.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// View the region's bytes mutably.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as for as_slice; &mut self excludes concurrent access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Repackage this region's bytes as a frozen region over the same
    /// pointer and lifetime root, without copying.
    ///
    /// This is the backend hook behind the default
    /// [`MappedSerializer::freeze`]; call that instead so serializers that
    /// track their frozen output (such as container entry serializers) get
    /// to observe it.
    ///
    /// [`MappedSerializer::freeze`]: crate::serializer::MappedSerializer::freeze
    #[must_use]
    pub fn into_frozen(self) -> FrozenRegion {
        // SAFETY: the bytes were valid behind this region and become
        // immutable now that the only writable view is consumed.
        unsafe { FrozenRegion::from_raw_parts(self.root, self.ptr, self.len) }
    }
}

impl std::fmt::Debug for WritableRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableRegion")
            .field("len", &self.len)
            .field("rooted", &self.root.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen_from_bytes(bytes: &[u8]) -> FrozenRegion {
        let owned = Arc::new(bytes.to_vec());
        let ptr = owned.as_ptr();
        let len = owned.len();
        let root: Arc<dyn RegionRoot> = owned;
        // SAFETY: the Arc'd vector pins the bytes; they are never mutated.
        unsafe { FrozenRegion::from_raw_parts(Some(root), ptr, len) }
    }

    #[test]
    fn empty_region() {
        let region = FrozenRegion::empty();
        assert!(region.is_empty());
        assert_eq!(region.as_slice(), &[] as &[u8]);
    }

    #[test]
    fn range_shares_bytes() {
        let region = frozen_from_bytes(b"hello world");
        let sub = region.range(6, 11).unwrap();
        assert_eq!(sub.as_slice(), b"world");

        // Sub-range outlives the region it was cut from.
        drop(region);
        assert_eq!(sub.as_slice(), b"world");
    }

    #[test]
    fn range_rejects_bad_bounds() {
        let region = frozen_from_bytes(b"abc");
        assert!(region.range(2, 1).is_err());
        assert!(region.range(0, 4).is_err());
        assert!(region.range(3, 3).unwrap().is_empty());
    }

    #[test]
    fn clone_is_shallow() {
        let region = frozen_from_bytes(b"xyz");
        let copy = region.clone();
        assert_eq!(copy.as_ptr(), region.as_ptr());
        assert_eq!(copy.as_slice(), b"xyz");
    }
}
