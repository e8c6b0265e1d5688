//! Memory-mapping files as frozen regions.

use memmap2::MmapOptions;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use strata_core::{FrozenRegion, RegionRoot, Result, StrataError};

use crate::sys;

/// Resolve a `file://` URL (or a bare path) to a filesystem path. Any other
/// scheme cannot be memory mapped.
fn file_url_path(url: &str) -> Result<&Path> {
    if let Some(rest) = url.strip_prefix("file://") {
        Ok(Path::new(rest))
    } else if url.contains("://") {
        Err(StrataError::UnsupportedScheme {
            url: url.to_string(),
        })
    } else {
        Ok(Path::new(url))
    }
}

/// Memory-map the span `[start_offset, start_offset + length)` of the file
/// at `url` as a frozen region.
///
/// `length` of `None` maps through the end of the file. The mapping itself
/// is page-aligned regardless of `start_offset`; the returned region points
/// at the requested first byte and its lifetime root owns the mapping and
/// the file handle.
pub fn map_file(url: &str, start_offset: u64, length: Option<u64>) -> Result<FrozenRegion> {
    let path = file_url_path(url)?;
    let io_error = |e: std::io::Error| StrataError::Io {
        path: path.to_path_buf(),
        cause: e.to_string(),
    };

    let file = File::open(path).map_err(io_error)?;
    let file_size = file.metadata().map_err(io_error)?.len();

    let length = match length {
        Some(length) => length,
        None => file_size.saturating_sub(start_offset),
    };
    let span_end = start_offset
        .checked_add(length)
        .filter(|end| *end <= file_size)
        .ok_or(StrataError::MapRange {
            offset: start_offset,
            length,
            file_size,
        })?;
    if length == 0 {
        return Ok(FrozenRegion::empty());
    }

    let page = sys::page_size() as u64;
    let map_offset = start_offset & !(page - 1);
    let map_len = (span_end - map_offset) as usize;

    // SAFETY: the mapping is read-only and its lifetime root below keeps
    // both the mapping and the file handle alive for every derived region.
    let map = unsafe {
        MmapOptions::new()
            .offset(map_offset)
            .len(map_len)
            .map(&file)
    }
    .map_err(|e| StrataError::FileMap {
        path: path.to_path_buf(),
        offset: map_offset,
        len: map_len as u64,
        cause: e.to_string(),
    })?;

    let lead = (start_offset - map_offset) as usize;
    // SAFETY: lead + length lies within the mapping by construction.
    let ptr = unsafe { map.as_ptr().add(lead) };
    let root: Arc<dyn RegionRoot> = Arc::new((map, file));
    // SAFETY: ptr/length describe initialized bytes of the read-only
    // mapping owned by `root`.
    Ok(unsafe { FrozenRegion::from_raw_parts(Some(root), ptr, length as usize) })
}
