//! Reading back a hierarchy of named entries.
//!
//! A [`StructuredReconstituter`] is the inverse of a structured serializer:
//! it enumerates children, hands out leaf payloads as [`FrozenRegion`]s
//! sharing the container's lifetime root, and descends into child
//! structures. Recursive lookups walk one path element at a time.

use crate::error::{Result, StrataError};
use crate::path::{EntryPath, PathElement};
use crate::region::FrozenRegion;
use serde::de::DeserializeOwned;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// One immediate child of a structured reconstituter.
///
/// A child can carry a leaf payload, a subtree, or both (a name that is at
/// once an entry and a directory).
pub struct DirectoryEntry {
    /// The child's name.
    pub name: PathElement,
    /// The leaf payload, if the child has one.
    pub region: Option<FrozenRegion>,
    /// The child structure, if the child has children of its own.
    pub structure: Option<Arc<dyn StructuredReconstituter>>,
}

impl std::fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.name)
            .field("region", &self.region.as_ref().map(FrozenRegion::len))
            .field("structure", &self.structure.is_some())
            .finish()
    }
}

/// Capability to read back a hierarchy of named entries.
pub trait StructuredReconstituter: Send + Sync + std::fmt::Debug {
    /// Human-readable locator of this structure, used in error messages.
    fn context(&self) -> String;

    /// Enumerate the immediate children.
    fn get_directory(&self) -> Result<Vec<DirectoryEntry>>;

    /// Fetch the leaf payload stored under `name`.
    fn get_region(&self, name: &PathElement) -> Result<FrozenRegion>;

    /// Descend into the child structure under `name`.
    fn get_structure(&self, name: &PathElement) -> Result<Arc<dyn StructuredReconstituter>>;

    /// Fetch a leaf payload by path, descending one element at a time.
    fn get_region_recursive(&self, path: &EntryPath) -> Result<FrozenRegion> {
        let (head, tail) = path.split_head().ok_or(StrataError::EmptyPath)?;
        if tail.is_empty() {
            self.get_region(head)
        } else {
            self.get_structure(head)?.get_region_recursive(&tail)
        }
    }

    /// Descend to a child structure by path.
    fn get_structure_recursive(&self, path: &EntryPath) -> Result<Arc<dyn StructuredReconstituter>> {
        let (head, tail) = path.split_head().ok_or(StrataError::EmptyPath)?;
        let mut current = self.get_structure(head)?;
        for element in tail.iter() {
            let next = current.get_structure(element)?;
            current = next;
        }
        Ok(current)
    }

    /// Open a seekable byte source over the leaf payload under `name`.
    fn get_stream(&self, name: &PathElement) -> Result<RegionReader> {
        Ok(RegionReader::new(self.get_region(name)?))
    }

    /// Open a seekable byte source over a leaf payload by path.
    fn get_stream_recursive(&self, path: &EntryPath) -> Result<RegionReader> {
        Ok(RegionReader::new(self.get_region_recursive(path)?))
    }
}

/// Typed-object sugar over [`StructuredReconstituter`].
pub trait StructuredReconstituterExt: StructuredReconstituter {
    /// JSON-parse the leaf payload under `name` into a typed value.
    fn get_object<T: DeserializeOwned>(&self, name: &PathElement) -> Result<T> {
        let region = self.get_region(name)?;
        serde_json::from_slice(region.as_slice()).map_err(|e| StrataError::ObjectCodec {
            name: name.clone(),
            cause: e.to_string(),
        })
    }
}

impl<R: StructuredReconstituter + ?Sized> StructuredReconstituterExt for R {}

/// A seekable reader over a frozen region.
///
/// Supports start-, current- and end-relative seeks; reads past the end
/// return zero bytes.
#[derive(Debug)]
pub struct RegionReader {
    region: FrozenRegion,
    pos: u64,
}

impl RegionReader {
    /// Create a reader positioned at the start of `region`.
    #[must_use]
    pub fn new(region: FrozenRegion) -> Self {
        Self { region, pos: 0 }
    }

    /// The region being read.
    #[must_use]
    pub fn region(&self) -> &FrozenRegion {
        &self.region
    }
}

impl Read for RegionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.region.as_slice();
        let pos = (self.pos).min(bytes.len() as u64) as usize;
        let take = buf.len().min(bytes.len() - pos);
        buf[..take].copy_from_slice(&bytes[pos..pos + take]);
        self.pos = (pos + take) as u64;
        Ok(take)
    }
}

impl Seek for RegionReader {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let len = self.region.len() as i64;
        let new_pos = match target {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of region",
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}
