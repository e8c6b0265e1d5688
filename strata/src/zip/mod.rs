//! STORE-only zip container backend.
//!
//! The write side streams a zip archive whose entries are stored without
//! compression; the read side memory-maps an archive and serves each entry
//! as a sub-range of the mapping. See [`ZipStructuredSerializer`] and
//! [`ZipStructuredReconstituter`].

mod format;
mod reader;
mod writer;

pub use reader::ZipStructuredReconstituter;
pub use writer::ZipStructuredSerializer;
