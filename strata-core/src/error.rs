//! Error types for strata.
//!
//! Errors are strongly typed and carry the context needed to act on them:
//! the offending path, offset or name, and the underlying system error
//! string where there is one.

use crate::path::PathElement;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    // =========================================================================
    // Region errors (E001-E099)
    // =========================================================================
    /// Sub-range bounds are inverted or exceed the region.
    #[error("E001: invalid region range [{start}, {end}) for region of {length} bytes")]
    RegionBounds {
        /// Requested start of the sub-range.
        start: usize,
        /// Requested end of the sub-range.
        end: usize,
        /// Length of the region being sliced.
        length: usize,
    },

    /// Requested allocation alignment is not a power of two.
    #[error("E002: invalid allocation alignment {alignment}")]
    RegionAlignment {
        /// The rejected alignment.
        alignment: usize,
    },

    // =========================================================================
    // Allocation errors (E100-E199)
    // =========================================================================
    /// Heap allocation for a writable region failed.
    #[error("E101: failed to allocate {bytes} bytes (alignment {alignment})")]
    AllocationFailed {
        /// Number of bytes requested.
        bytes: u64,
        /// Effective alignment of the request.
        alignment: usize,
    },

    // =========================================================================
    // File serializer errors (E200-E299)
    // =========================================================================
    /// Failed to create or lock the backing file.
    #[error("E201: failed to create serializer file at {path}: {cause}")]
    FileCreate {
        /// The backing file path.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// Failed to extend or shrink the backing file.
    #[error("E202: failed to truncate {path} to {len} bytes: {cause}")]
    FileTruncate {
        /// The backing file path.
        path: PathBuf,
        /// The length the file was being set to.
        len: u64,
        /// Reason for the failure.
        cause: String,
    },

    /// Failed to memory-map a span of the backing file.
    #[error("E203: failed to map {len} bytes of {path} at offset {offset}: {cause}")]
    FileMap {
        /// The backing file path.
        path: PathBuf,
        /// File offset of the span.
        offset: u64,
        /// Length of the span.
        len: u64,
        /// Reason for the failure.
        cause: String,
    },

    /// On-disk size diverged from the tracked allocation total.
    #[error("E204: size mismatch for {path}: tracked {expected} bytes, on disk {actual}")]
    FileSizeMismatch {
        /// The backing file path.
        path: PathBuf,
        /// The tracked allocation total.
        expected: u64,
        /// The size reported by the filesystem.
        actual: u64,
    },

    // =========================================================================
    // Structured container errors (E300-E399)
    // =========================================================================
    /// A named child does not exist in a structured reconstituter.
    #[error("E301: entry '{name}' not found at {context}")]
    EntryNotFound {
        /// The name that was looked up.
        name: PathElement,
        /// Locator of the structure that was searched.
        context: String,
    },

    /// A recursive lookup was given an empty path.
    #[error("E302: recursive lookup requires a non-empty path")]
    EmptyPath,

    /// Writing to the archive sink failed.
    #[error("E303: archive write failed: {cause}")]
    ArchiveWrite {
        /// Reason for the failure.
        cause: String,
    },

    /// The archive bytes do not parse as a supported container.
    #[error("E304: malformed archive at offset {offset}: {cause}")]
    ArchiveFormat {
        /// Byte offset of the malformed structure.
        offset: u64,
        /// Description of the problem.
        cause: String,
    },

    /// An archive entry uses a storage method the reader cannot map.
    #[error("E305: entry '{name}' uses unsupported storage method {method}")]
    UnsupportedEntry {
        /// The archive entry pathname.
        name: String,
        /// The entry's compression method id.
        method: u16,
    },

    /// The archive was already finalized when a write was attempted.
    #[error("E306: archive already finalized")]
    ArchiveFinished,

    /// A path element was empty or contained the separator.
    #[error("E307: invalid path element '{name}'")]
    InvalidPathElement {
        /// The rejected element text.
        name: String,
    },

    // =========================================================================
    // Object codec errors (E400-E499)
    // =========================================================================
    /// JSON (de)serialization of a typed object entry failed.
    #[error("E401: object codec failed for entry '{name}': {cause}")]
    ObjectCodec {
        /// The entry name being encoded or decoded.
        name: PathElement,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Mapping and I/O errors (E500-E599)
    // =========================================================================
    /// Only file:// URLs can be memory mapped.
    #[error("E501: cannot memory-map '{url}': only file:// URLs are supported")]
    UnsupportedScheme {
        /// The rejected URL.
        url: String,
    },

    /// General file I/O failure.
    #[error("E502: I/O error at {path}: {cause}")]
    Io {
        /// The path where the I/O error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },

    /// A requested map span lies outside the file.
    #[error("E503: map range [{offset}, {offset}+{length}) exceeds file of {file_size} bytes")]
    MapRange {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        length: u64,
        /// Actual file size.
        file_size: u64,
    },

    // =========================================================================
    // Internal errors (E900-E999)
    // =========================================================================
    /// An internal invariant was violated.
    #[error("E901: internal invariant violated: {cause}")]
    Internal {
        /// Description of the violated invariant.
        cause: String,
    },
}

/// Coarse classification of an error, independent of its concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed something malformed: bad bounds, bad alignment,
    /// an empty path, a corrupt archive.
    InvalidArgument,
    /// A named entry does not exist.
    NotFound,
    /// The underlying allocator, filesystem or mapping ran out of room.
    ResourceExhausted,
    /// A read or write against the operating system failed.
    Io,
    /// The operation is outside what this implementation supports.
    Unsupported,
    /// An invariant that should hold in a correct implementation did not.
    Internal,
}

impl StrataError {
    /// Get the stable error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RegionBounds { .. } => "E001",
            Self::RegionAlignment { .. } => "E002",
            Self::AllocationFailed { .. } => "E101",
            Self::FileCreate { .. } => "E201",
            Self::FileTruncate { .. } => "E202",
            Self::FileMap { .. } => "E203",
            Self::FileSizeMismatch { .. } => "E204",
            Self::EntryNotFound { .. } => "E301",
            Self::EmptyPath => "E302",
            Self::ArchiveWrite { .. } => "E303",
            Self::ArchiveFormat { .. } => "E304",
            Self::UnsupportedEntry { .. } => "E305",
            Self::ArchiveFinished => "E306",
            Self::InvalidPathElement { .. } => "E307",
            Self::ObjectCodec { .. } => "E401",
            Self::UnsupportedScheme { .. } => "E501",
            Self::Io { .. } => "E502",
            Self::MapRange { .. } => "E503",
            Self::Internal { .. } => "E901",
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RegionBounds { .. }
            | Self::RegionAlignment { .. }
            | Self::EmptyPath
            | Self::ArchiveFormat { .. }
            | Self::ArchiveFinished
            | Self::InvalidPathElement { .. }
            | Self::ObjectCodec { .. }
            | Self::MapRange { .. } => ErrorKind::InvalidArgument,
            Self::EntryNotFound { .. } => ErrorKind::NotFound,
            Self::AllocationFailed { .. } | Self::FileTruncate { .. } | Self::FileMap { .. } => {
                ErrorKind::ResourceExhausted
            }
            Self::FileCreate { .. }
            | Self::FileSizeMismatch { .. }
            | Self::ArchiveWrite { .. }
            | Self::Io { .. } => ErrorKind::Io,
            Self::UnsupportedEntry { .. } | Self::UnsupportedScheme { .. } => {
                ErrorKind::Unsupported
            }
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Check whether this error means a looked-up name was absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type alias using `StrataError`.
pub type Result<T> = std::result::Result<T, StrataError>;
