//! The mapped-serializer capability: allocate writable bytes, freeze them.
//!
//! A [`MappedSerializer`] hands out [`WritableRegion`]s and converts them
//! into [`FrozenRegion`]s. Concrete backends decide where the bytes live
//! (heap, file arena, container entry); freezing is zero-copy for all of
//! them.

use crate::error::{Result, StrataError};
use crate::region::{FrozenRegion, WritableRegion};
use std::io;

/// Clamp a requested alignment to at least the word size, rejecting
/// non-power-of-two values.
pub fn effective_alignment(alignment: usize) -> Result<usize> {
    if !alignment.is_power_of_two() {
        return Err(StrataError::RegionAlignment { alignment });
    }
    Ok(alignment.max(std::mem::size_of::<usize>()))
}

/// Capability to allocate, freeze and copy memory regions.
///
/// All methods take `&self`; implementations are internally synchronized and
/// usable from multiple producer threads.
pub trait MappedSerializer: Send + Sync {
    /// Allocate a writable region of exactly `bytes` bytes whose first byte
    /// is aligned to at least `max(alignment, word size)`.
    ///
    /// Zero-byte requests yield an empty region. The bytes start zeroed.
    fn allocate_writable(&self, bytes: u64, alignment: usize) -> Result<WritableRegion>;

    /// Convert a writable region allocated from this serializer into a
    /// frozen region over the same bytes.
    ///
    /// The default repackages the region's pointer and lifetime root without
    /// copying. Backends that need to observe their frozen output override
    /// this.
    fn freeze(&self, region: WritableRegion) -> Result<FrozenRegion> {
        Ok(region.into_frozen())
    }

    /// Rehome a frozen region into this serializer's storage by allocating
    /// and copying.
    fn copy(&self, region: &FrozenRegion) -> Result<FrozenRegion> {
        let mut writable = self.allocate_writable(region.len() as u64, 1)?;
        writable.as_mut_slice().copy_from_slice(region.as_slice());
        self.freeze(writable)
    }

    /// Open a byte sink that captures everything written to it into a
    /// single frozen region when finished or dropped.
    fn stream(&self) -> RegionSink<'_>
    where
        Self: Sized,
    {
        RegionSink::borrowed(self)
    }

    /// Flush backend state. The default is a no-op; calling it more than
    /// once is always equivalent to calling it once.
    fn commit(&self) -> Result<()> {
        Ok(())
    }
}

enum SinkOwner<'a> {
    Borrowed(&'a dyn MappedSerializer),
    Owned(Box<dyn MappedSerializer>),
}

impl SinkOwner<'_> {
    fn serializer(&self) -> &dyn MappedSerializer {
        match self {
            SinkOwner::Borrowed(serializer) => *serializer,
            SinkOwner::Owned(serializer) => serializer.as_ref(),
        }
    }
}

/// A buffering byte sink whose contents become a frozen region.
///
/// Bytes written through [`io::Write`] are buffered; [`finish`] allocates a
/// region of the buffered size from the owning serializer, copies the bytes
/// in and freezes it. Dropping an unfinished sink performs the same commit,
/// logging instead of surfacing any failure, so the freeze happens on every
/// exit path.
///
/// [`finish`]: RegionSink::finish
#[must_use = "dropping the sink freezes its bytes blindly; call finish() to observe failures"]
pub struct RegionSink<'a> {
    owner: SinkOwner<'a>,
    buf: Vec<u8>,
    committed: bool,
}

impl<'a> RegionSink<'a> {
    /// Create a sink that borrows its owning serializer.
    pub fn borrowed(owner: &'a dyn MappedSerializer) -> RegionSink<'a> {
        RegionSink {
            owner: SinkOwner::Borrowed(owner),
            buf: Vec::new(),
            committed: false,
        }
    }

    /// Create a sink that owns its serializer, keeping it alive until the
    /// sink commits. Used for container entry streams.
    pub fn owned(owner: Box<dyn MappedSerializer>) -> RegionSink<'static> {
        RegionSink {
            owner: SinkOwner::Owned(owner),
            buf: Vec::new(),
            committed: false,
        }
    }

    /// Number of bytes buffered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn commit_buffer(&mut self) -> Result<FrozenRegion> {
        self.committed = true;
        let serializer = self.owner.serializer();
        let mut writable = serializer.allocate_writable(self.buf.len() as u64, 1)?;
        writable.as_mut_slice().copy_from_slice(&self.buf);
        serializer.freeze(writable)
    }

    /// Freeze the buffered bytes into the owning serializer and return the
    /// resulting region.
    pub fn finish(mut self) -> Result<FrozenRegion> {
        self.commit_buffer()
    }
}

impl io::Write for RegionSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RegionSink<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(error) = self.commit_buffer() {
                tracing::error!(%error, "failed to freeze stream buffer on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySerializer;
    use std::io::Write;

    #[test]
    fn stream_captures_chunked_writes() {
        let serializer = MemorySerializer::new();
        let mut sink = serializer.stream();

        let mut expected = Vec::new();
        let mut written = 0usize;
        let mut chunk_len = 1usize;
        while written < 12345 {
            let take = chunk_len.min(12345 - written);
            let chunk: Vec<u8> = (0..take).map(|i| ((written + i) % 256) as u8).collect();
            sink.write_all(&chunk).unwrap();
            expected.extend_from_slice(&chunk);
            written += take;
            chunk_len = chunk_len % 97 + 1;
        }

        let region = sink.finish().unwrap();
        assert_eq!(region.len(), 12345);
        assert_eq!(region.as_slice(), expected.as_slice());
    }

    #[test]
    fn empty_stream_freezes_empty_region() {
        let serializer = MemorySerializer::new();
        let region = serializer.stream().finish().unwrap();
        assert!(region.is_empty());
    }

    #[test]
    fn copy_rehomes_bytes() {
        let serializer = MemorySerializer::new();
        let mut writable = serializer.allocate_writable(4, 1).unwrap();
        writable.as_mut_slice().copy_from_slice(b"abcd");
        let original = serializer.freeze(writable).unwrap();

        let copied = serializer.copy(&original).unwrap();
        assert_eq!(copied.as_slice(), b"abcd");
        assert_ne!(copied.as_ptr(), original.as_ptr());
    }

    #[test]
    fn alignment_is_validated_and_clamped() {
        assert!(effective_alignment(3).is_err());
        assert_eq!(
            effective_alignment(1).unwrap(),
            std::mem::size_of::<usize>()
        );
        assert_eq!(effective_alignment(64).unwrap(), 64);
    }
}
