//! File-backed mapped serializer.
//!
//! All allocations are backed by a single file grown as a sequence of
//! memory-mapped arenas. Growth prefers extending the last arena in place
//! (`ftruncate` + `mremap` with relocation forbidden) so that every pointer
//! handed out earlier stays valid; when the kernel cannot extend the mapping
//! where it sits, the truncate is reverted and a fresh arena is mapped
//! instead. Freezing a region is zero-copy: the arena mapping doubles as the
//! region's lifetime root.

mod arena;

use arena::Arena;
use fs2::FileExt;
use memmap2::MmapOptions;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_core::serializer::effective_alignment;
use strata_core::{MappedSerializer, RegionRoot, Result, StrataError, WritableRegion};
use tracing::{debug, warn};

use crate::sys;

/// Sizing knobs for [`FileSerializer`] arenas, in pages.
#[derive(Debug, Clone)]
pub struct FileSerializerOptions {
    /// Floor on the size of a freshly created arena.
    min_arena_pages: usize,
    /// Floor on how much an in-place expansion grows the last arena.
    min_expand_pages: usize,
}

impl Default for FileSerializerOptions {
    fn default() -> Self {
        Self {
            min_arena_pages: 1024,
            min_expand_pages: 10_000,
        }
    }
}

impl FileSerializerOptions {
    /// Set the minimum number of pages in a new arena.
    #[must_use]
    pub fn with_min_arena_pages(mut self, pages: usize) -> Self {
        self.min_arena_pages = pages.max(1);
        self
    }

    /// Set the minimum number of pages an expansion adds.
    #[must_use]
    pub fn with_min_expand_pages(mut self, pages: usize) -> Self {
        self.min_expand_pages = pages.max(1);
        self
    }
}

struct FileInner {
    file: File,
    arenas: Vec<Arena>,
    /// Sum of arena lengths; equals the on-disk size except after a commit.
    total_allocated: u64,
    /// Set by commit, which truncates the slack past the populated byte.
    committed: bool,
}

/// A mapped serializer backed by a growable file.
///
/// Allocation is serialized by a mutex and may be called from multiple
/// producer threads; freezing only repackages existing pointers and takes no
/// lock. Pointers returned from allocations remain valid for the lifetime of
/// the serializer and of every frozen region derived from it.
///
/// Dropping the serializer commits: the file is truncated to the populated
/// length, leaving no slack past the last byte written.
pub struct FileSerializer {
    path: PathBuf,
    page_size: usize,
    options: FileSerializerOptions,
    inner: Mutex<FileInner>,
    /// Forces the expand-in-place path to report failure; exercised by tests
    /// to drive allocation through arena creation.
    deny_expansion: AtomicBool,
}

impl FileSerializer {
    /// Create a serializer over a fresh file at `path`, truncating anything
    /// already there. The file is locked exclusively for the lifetime of
    /// the serializer.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, FileSerializerOptions::default())
    }

    /// Create a serializer with explicit arena sizing.
    pub fn with_options(path: impl AsRef<Path>, options: FileSerializerOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StrataError::FileCreate {
                path: path.clone(),
                cause: e.to_string(),
            })?;

        file.try_lock_exclusive().map_err(|e| StrataError::FileCreate {
            path: path.clone(),
            cause: format!("failed to lock file: {}", e),
        })?;

        Ok(Self {
            path,
            page_size: sys::page_size(),
            options,
            inner: Mutex::new(FileInner {
                file,
                arenas: Vec::new(),
                total_allocated: 0,
                committed: false,
            }),
            deny_expansion: AtomicBool::new(false),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sum of arena lengths, i.e. the file size between commits.
    #[must_use]
    pub fn allocated_len(&self) -> u64 {
        self.inner.lock().total_allocated
    }

    /// Offset one past the last populated byte; the file size after commit.
    #[must_use]
    pub fn populated_len(&self) -> u64 {
        self.inner
            .lock()
            .arenas
            .last()
            .map_or(0, Arena::populated)
    }

    #[cfg(test)]
    fn deny_expansion_for_tests(&self) {
        self.deny_expansion.store(true, Ordering::Relaxed);
    }

    fn truncate(&self, inner: &FileInner, len: u64) -> Result<()> {
        inner
            .file
            .set_len(len)
            .map_err(|e| StrataError::FileTruncate {
                path: self.path.clone(),
                len,
                cause: e.to_string(),
            })
    }

    /// Check that the on-disk size matches the tracked allocation total.
    /// A mismatch means something else touched the file and every mapped
    /// pointer is suspect.
    fn verify_length(&self, inner: &FileInner) -> Result<()> {
        let actual = inner
            .file
            .metadata()
            .map_err(|e| StrataError::Io {
                path: self.path.clone(),
                cause: e.to_string(),
            })?
            .len();
        if actual != inner.total_allocated {
            return Err(StrataError::FileSizeMismatch {
                path: self.path.clone(),
                expected: inner.total_allocated,
                actual,
            });
        }
        Ok(())
    }

    fn create_arena(&self, inner: &mut FileInner, bytes_required: usize) -> Result<()> {
        self.verify_length(inner)?;

        let mut pages = bytes_required
            .div_ceil(self.page_size)
            .max(self.options.min_arena_pages);
        // Grow geometrically, doubling roughly every four arenas, so the
        // per-arena overhead amortizes.
        pages = pages.max((inner.total_allocated as usize).div_ceil(self.page_size) / 8);
        let new_len = pages * self.page_size;
        let start_offset = inner.total_allocated;
        let new_total = start_offset + new_len as u64;

        self.truncate(inner, new_total)?;

        // SAFETY: we hold the only handle to this exclusively locked file,
        // and the span [start_offset, start_offset + new_len) was just
        // allocated by the truncate above.
        let map = unsafe {
            MmapOptions::new()
                .offset(start_offset)
                .len(new_len)
                .map_mut(&inner.file)
        }
        .map_err(|e| StrataError::FileMap {
            path: self.path.clone(),
            offset: start_offset,
            len: new_len as u64,
            cause: e.to_string(),
        })?;

        inner.arenas.push(Arena::new(map, start_offset));
        inner.total_allocated = new_total;
        self.verify_length(inner)?;

        debug!(bytes = new_len, total = new_total, "mapped new arena");
        Ok(())
    }

    /// Try to grow the last arena in place. Returns `Ok(false)` when the
    /// mapping cannot be extended where it sits, with the file restored to
    /// its previous length.
    fn expand_last_arena(&self, inner: &mut FileInner, bytes_required: usize) -> Result<bool> {
        if inner.arenas.is_empty() || self.deny_expansion.load(Ordering::Relaxed) {
            return Ok(false);
        }
        self.verify_length(inner)?;

        let grow = bytes_required
            .div_ceil(self.page_size)
            .max(self.options.min_expand_pages)
            * self.page_size;
        let previous_total = inner.total_allocated;
        let new_total = previous_total + grow as u64;

        self.truncate(inner, new_total)?;

        let last = inner.arenas.len() - 1;
        let arena = &mut inner.arenas[last];
        let new_len = arena.len + grow;
        match arena.expand(new_len) {
            Ok(()) => {
                inner.total_allocated = new_total;
                self.verify_length(inner)?;
                debug!(len = new_len, "expanded last arena in place");
                Ok(true)
            }
            Err(error) => {
                debug!(
                    %error,
                    wasted = arena.free_space(),
                    "in-place expansion failed, falling back to a new arena"
                );
                self.truncate(inner, previous_total)?;
                self.verify_length(inner)?;
                Ok(false)
            }
        }
    }

    fn commit_inner(&self, inner: &mut FileInner) -> Result<()> {
        let Some(last) = inner.arenas.last() else {
            return Ok(());
        };
        self.truncate(inner, last.populated())?;
        inner.committed = true;
        Ok(())
    }
}

impl MappedSerializer for FileSerializer {
    fn allocate_writable(&self, bytes: u64, alignment: usize) -> Result<WritableRegion> {
        let alignment = effective_alignment(alignment)?;
        if bytes == 0 {
            return Ok(WritableRegion::empty());
        }
        let size = usize::try_from(bytes).map_err(|_| StrataError::AllocationFailed {
            bytes,
            alignment,
        })?;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.committed {
            // A commit truncated the slack; restore it so the size
            // accounting invariant holds before any arena operation.
            self.truncate(inner, inner.total_allocated)?;
            inner.committed = false;
        }

        if inner.arenas.is_empty() {
            self.create_arena(inner, size + alignment)?;
        }

        loop {
            if let Some(arena) = inner.arenas.last_mut() {
                if let Some(ptr) = arena.allocate(size, alignment) {
                    let root: Arc<dyn RegionRoot> = arena.map.clone();
                    // SAFETY: the slot is a fresh, disjoint span of the
                    // arena mapping, zero-filled by file extension, and the
                    // mapping is pinned by `root`.
                    return Ok(unsafe { WritableRegion::from_raw_parts(Some(root), ptr, size) });
                }
            }
            // Expansion sizes for the payload alone; only fresh arenas
            // reserve extra room for the alignment padding.
            if !self.expand_last_arena(inner, size)? {
                self.create_arena(inner, size + alignment)?;
            }
        }
    }

    fn commit(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        self.commit_inner(&mut guard)
    }
}

impl Drop for FileSerializer {
    fn drop(&mut self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.arenas.is_empty() && !inner.committed {
            if let Err(error) = self.commit_inner(inner) {
                warn!(%error, path = %self.path.display(), "commit on drop failed");
            }
        }
        let _ = FileExt::unlock(&inner.file);
    }
}
