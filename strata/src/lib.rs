//! Strata backends.
//!
//! This crate implements the OS-facing halves of the strata substrate on top
//! of the capability traits from [`strata_core`]:
//!
//! - [`FileSerializer`]: a mapped serializer backed by a single file grown
//!   as a sequence of memory-mapped arenas
//! - [`ZipStructuredSerializer`] / [`ZipStructuredReconstituter`]: a
//!   structured container persisted as a STORE-only zip archive, so each
//!   entry is directly addressable inside a memory-mapped file
//! - [`map_file`]: open a `file://` URL and map an arbitrary byte span as a
//!   frozen region
//!
//! Producers allocate writable regions, fill them and freeze them; a
//! structured serializer composes the frozen regions under named paths and
//! streams the container out. Reopening the container hands back sub-regions
//! of one mapping, shared zero-copy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file;
pub mod mapfile;
mod sys;
pub mod zip;

pub use file::{FileSerializer, FileSerializerOptions};
pub use mapfile::map_file;
pub use zip::{ZipStructuredReconstituter, ZipStructuredSerializer};

// Re-export the core surface so backend users need a single import.
pub use strata_core::{
    DirectoryEntry, EntryPath, ErrorKind, FrozenRegion, MappedSerializer, MemorySerializer,
    PathElement, RegionReader, RegionSink, Result, StrataError, StructuredReconstituter,
    StructuredReconstituterExt, StructuredSerializer, StructuredSerializerExt, WritableRegion,
};
