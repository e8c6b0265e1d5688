//! Strata core library.
//!
//! This crate provides the region model and the capability traits that the
//! strata backends implement.
//!
//! # Overview
//!
//! Strata is a memory-region serialization substrate: large binary artifacts
//! are built incrementally in writable regions handed out by a serializer,
//! *frozen* into immutable views, composed into a named hierarchy, and later
//! reopened with zero-copy random access.
//!
//! # Key Components
//!
//! - **Regions**: [`FrozenRegion`] and [`WritableRegion`], raw byte views
//!   pinned by a reference-counted lifetime root
//! - **Serializers**: the [`MappedSerializer`] capability (allocate, freeze,
//!   copy, stream) and the heap-backed [`MemorySerializer`]
//! - **Structured containers**: [`StructuredSerializer`] and
//!   [`StructuredReconstituter`], a hierarchy of named entries over regions
//! - **Paths**: [`PathElement`] and [`EntryPath`], the logical addresses of
//!   entries within a structured container

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod memory;
pub mod path;
pub mod reconstitute;
pub mod region;
pub mod serializer;
pub mod structured;

pub use error::{ErrorKind, Result, StrataError};
pub use memory::MemorySerializer;
pub use path::{EntryPath, PathElement};
pub use reconstitute::{
    DirectoryEntry, RegionReader, StructuredReconstituter, StructuredReconstituterExt,
};
pub use region::{FrozenRegion, RegionRoot, WritableRegion};
pub use serializer::{MappedSerializer, RegionSink};
pub use structured::{StructuredSerializer, StructuredSerializerExt};
