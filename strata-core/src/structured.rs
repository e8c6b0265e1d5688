//! Hierarchical serialization of named entries.
//!
//! A [`StructuredSerializer`] composes many frozen regions under a tree of
//! names. Concrete backends decide the container format; entries are built
//! through [`MappedSerializer`]s and committed when the entry serializer is
//! dropped.

use crate::error::{Result, StrataError};
use crate::path::PathElement;
use crate::region::FrozenRegion;
use crate::serializer::{MappedSerializer, RegionSink};
use serde::Serialize;

/// Capability to build a hierarchy of named entries.
pub trait StructuredSerializer: Send + Sync {
    /// Create a logical child directory under `name`.
    fn new_structure(&self, name: &PathElement) -> Result<Box<dyn StructuredSerializer>>;

    /// Create a leaf entry under `name`.
    ///
    /// The returned serializer accumulates the entry's bytes; its frozen
    /// output is stored under `name` when it is dropped.
    fn new_entry(&self, name: &PathElement) -> Result<Box<dyn MappedSerializer>>;

    /// Create a leaf entry under `name` whose bytes come from a stream.
    ///
    /// The sink owns the entry serializer; the entry is emitted once the
    /// sink commits (on [`RegionSink::finish`] or drop).
    fn new_stream(&self, name: &PathElement) -> Result<RegionSink<'static>> {
        Ok(RegionSink::owned(self.new_entry(name)?))
    }

    /// Store a copy of an existing frozen region under `name`.
    fn add_region(&self, region: &FrozenRegion, name: &PathElement) -> Result<()> {
        self.new_entry(name)?.copy(region)?;
        Ok(())
    }

    /// Finalize this structure.
    fn commit(&self) -> Result<()>;
}

/// Typed-object sugar over [`StructuredSerializer`].
///
/// Kept off the object-safe core trait because it is generic; available on
/// every structured serializer, including trait objects.
pub trait StructuredSerializerExt: StructuredSerializer {
    /// Serialize `value` as JSON and store it under `name`.
    fn new_object<T: Serialize>(&self, name: &PathElement, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StrataError::ObjectCodec {
            name: name.clone(),
            cause: e.to_string(),
        })?;
        let entry = self.new_entry(name)?;
        let mut writable = entry.allocate_writable(bytes.len() as u64, 1)?;
        writable.as_mut_slice().copy_from_slice(&bytes);
        entry.freeze(writable)?;
        Ok(())
    }
}

impl<S: StructuredSerializer + ?Sized> StructuredSerializerExt for S {}
