//! Zip-backed structured serializer.
//!
//! A base instance owns the archive writer and its output sink; relative
//! instances carry a path prefix and delegate every write to the base.
//! Entries are built in heap memory through a [`MemorySerializer`] delegate
//! and emitted as single STORE entries when the entry serializer drops, so
//! many entries can be under construction while the archive streams out.

use super::format::{
    self, EntryRecord, METHOD_STORE, WRITE_BLOCK_SIZE,
};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use strata_core::{
    EntryPath, FrozenRegion, MappedSerializer, MemorySerializer, PathElement, Result, StrataError,
    StructuredSerializer, WritableRegion,
};
use tracing::error;

struct ArchiveState {
    sink: Box<dyn Write + Send>,
    offset: u64,
    entries: Vec<EntryRecord>,
    finished: bool,
}

impl ArchiveState {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink
            .write_all(bytes)
            .map_err(|e| StrataError::ArchiveWrite {
                cause: e.to_string(),
            })?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let central_offset = self.offset;
        let entries = std::mem::take(&mut self.entries);
        for record in &entries {
            let header = format::encode_central_header(record)?;
            self.write(&header)?;
        }
        let central_size = self.offset - central_offset;
        let end = format::encode_end_of_central(entries.len(), central_offset, central_size)?;
        self.write(&end)?;
        self.sink.flush().map_err(|e| StrataError::ArchiveWrite {
            cause: e.to_string(),
        })
    }
}

/// The archive writer shared by the base serializer, its relative children
/// and their entry serializers. Entry emission is serialized by a mutex.
struct ZipArchive {
    state: Mutex<ArchiveState>,
}

impl ZipArchive {
    fn write_entry(&self, path: &EntryPath, region: &FrozenRegion) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(StrataError::ArchiveFinished);
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(region.as_slice());
        let record = EntryRecord {
            name: path.to_string(),
            method: METHOD_STORE,
            crc32: hasher.finalize(),
            size: region.len() as u64,
            local_header_offset: state.offset,
        };

        let header = format::encode_local_header(&record)?;
        state.write(&header)?;
        for block in region.as_slice().chunks(WRITE_BLOCK_SIZE) {
            state.write(block)?;
        }
        state.entries.push(record);
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        self.state.lock().finish()
    }
}

impl Drop for ZipArchive {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if !state.finished {
            if let Err(error) = state.finish() {
                error!(%error, "failed to finalize zip archive on drop");
            }
        }
    }
}

/// A structured serializer that writes a STORE-only zip archive.
///
/// Every entry is stored uncompressed so that reopening the archive through
/// a memory mapping yields each entry's bytes as a contiguous sub-range.
/// The central directory is finalized by [`commit`] on the root instance or,
/// failing that, when the last handle to the archive drops.
///
/// [`commit`]: StructuredSerializer::commit
pub struct ZipStructuredSerializer {
    archive: Arc<ZipArchive>,
    prefix: EntryPath,
}

impl ZipStructuredSerializer {
    /// Create an archive streaming into a fresh file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| StrataError::FileCreate {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_sink(Box::new(BufWriter::with_capacity(
            WRITE_BLOCK_SIZE,
            file,
        ))))
    }

    /// Create an archive streaming into an arbitrary byte sink.
    #[must_use]
    pub fn from_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            archive: Arc::new(ZipArchive {
                state: Mutex::new(ArchiveState {
                    sink,
                    offset: 0,
                    entries: Vec::new(),
                    finished: false,
                }),
            }),
            prefix: EntryPath::root(),
        }
    }
}

impl StructuredSerializer for ZipStructuredSerializer {
    fn new_structure(&self, name: &PathElement) -> Result<Box<dyn StructuredSerializer>> {
        Ok(Box::new(ZipStructuredSerializer {
            archive: Arc::clone(&self.archive),
            prefix: self.prefix.child(name.clone()),
        }))
    }

    fn new_entry(&self, name: &PathElement) -> Result<Box<dyn MappedSerializer>> {
        Ok(Box::new(ZipEntrySerializer {
            archive: Arc::clone(&self.archive),
            path: self.prefix.child(name.clone()),
            memory: MemorySerializer::new(),
            frozen: Mutex::new(None),
        }))
    }

    fn commit(&self) -> Result<()> {
        // Relative instances have nothing of their own to finalize; each
        // entry was emitted as its serializer dropped.
        if self.prefix.is_empty() {
            self.archive.finish()
        } else {
            Ok(())
        }
    }
}

/// Builds one archive entry in heap memory.
///
/// The most recently frozen region becomes the entry payload; it is written
/// to the archive, under the full path, when this serializer drops.
struct ZipEntrySerializer {
    archive: Arc<ZipArchive>,
    path: EntryPath,
    memory: MemorySerializer,
    frozen: Mutex<Option<FrozenRegion>>,
}

impl MappedSerializer for ZipEntrySerializer {
    fn allocate_writable(&self, bytes: u64, alignment: usize) -> Result<WritableRegion> {
        self.memory.allocate_writable(bytes, alignment)
    }

    fn freeze(&self, region: WritableRegion) -> Result<FrozenRegion> {
        let frozen = self.memory.freeze(region)?;
        *self.frozen.lock() = Some(frozen.clone());
        Ok(frozen)
    }
}

impl Drop for ZipEntrySerializer {
    fn drop(&mut self) {
        let region = self.frozen.lock().take().unwrap_or_else(FrozenRegion::empty);
        if let Err(error) = self.archive.write_entry(&self.path, &region) {
            error!(%error, entry = %self.path, "failed to emit zip entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::StructuredSerializerExt;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn take(&self) -> Vec<u8> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn el(name: &str) -> PathElement {
        PathElement::new(name).unwrap()
    }

    #[test]
    fn writes_store_entries_and_central_directory() {
        let sink = SharedSink::default();
        let serializer = ZipStructuredSerializer::from_sink(Box::new(sink.clone()));

        {
            let entry = serializer.new_entry(&el("greeting")).unwrap();
            let mut writable = entry.allocate_writable(5, 1).unwrap();
            writable.as_mut_slice().copy_from_slice(b"hello");
            entry.freeze(writable).unwrap();
        }
        serializer.commit().unwrap();

        let bytes = sink.take();
        let eocd = format::find_end_of_central(&bytes).unwrap();
        assert_eq!(eocd.entry_count, 1);

        let (record, _) =
            format::parse_central_header(&bytes, eocd.central_offset as usize).unwrap();
        assert_eq!(record.name, "greeting");
        assert_eq!(record.method, METHOD_STORE);
        assert_eq!(record.size, 5);

        let payload = format::payload_offset(&bytes, record.local_header_offset).unwrap() as usize;
        assert_eq!(&bytes[payload..payload + 5], b"hello");
    }

    #[test]
    fn nested_structures_produce_joined_pathnames() {
        let sink = SharedSink::default();
        let serializer = ZipStructuredSerializer::from_sink(Box::new(sink.clone()));

        let child = serializer.new_structure(&el("outer")).unwrap();
        let grandchild = child.new_structure(&el("inner")).unwrap();
        grandchild.new_object(&el("md"), &42u32).unwrap();
        drop(grandchild);
        drop(child);
        serializer.commit().unwrap();

        let bytes = sink.take();
        let eocd = format::find_end_of_central(&bytes).unwrap();
        let (record, _) =
            format::parse_central_header(&bytes, eocd.central_offset as usize).unwrap();
        assert_eq!(record.name, "outer/inner/md");
    }

    #[test]
    fn commit_is_idempotent_and_blocks_later_entries() {
        let sink = SharedSink::default();
        let serializer = ZipStructuredSerializer::from_sink(Box::new(sink.clone()));
        serializer.commit().unwrap();
        serializer.commit().unwrap();

        let entry = serializer.new_entry(&el("late")).unwrap();
        let region = entry.copy(&FrozenRegion::empty());
        // The memory-side copy succeeds; emission on drop is rejected and
        // the archive contents stay untouched.
        assert!(region.is_ok());
        drop(entry);

        let bytes = sink.take();
        let eocd = format::find_end_of_central(&bytes).unwrap();
        assert_eq!(eocd.entry_count, 0);
    }
}
