//! STORE-only zip wire format.
//!
//! Only the structures this container actually uses are modeled: local file
//! headers, central directory records and the end-of-central-directory
//! record, all in the pre-zip64 layout. Entries are always stored without
//! compression so that a reopened archive can hand out payloads as direct
//! sub-ranges of one mapping.

use strata_core::{Result, StrataError};

pub(crate) const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub(crate) const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub(crate) const END_OF_CENTRAL_SIGNATURE: u32 = 0x0605_4b50;

pub(crate) const LOCAL_HEADER_LEN: usize = 30;
pub(crate) const CENTRAL_HEADER_LEN: usize = 46;
pub(crate) const END_OF_CENTRAL_LEN: usize = 22;
/// Maximum length of the trailing archive comment, bounding the EOCD scan.
pub(crate) const MAX_COMMENT_LEN: usize = u16::MAX as usize;

pub(crate) const METHOD_STORE: u16 = 0;
pub(crate) const VERSION_NEEDED: u16 = 20;
/// Unix origin, zip spec 2.0.
pub(crate) const VERSION_MADE_BY: u16 = (3 << 8) | 20;
pub(crate) const FLAG_UTF8_NAMES: u16 = 1 << 11;
/// Regular file with mode 0440 in the unix half of the external attributes.
pub(crate) const EXTERNAL_ATTRIBUTES: u32 = 0o100_440 << 16;

/// Output block size of the archive writer.
pub(crate) const WRITE_BLOCK_SIZE: usize = 65536;

/// One archive entry as recorded in the central directory.
#[derive(Debug, Clone)]
pub(crate) struct EntryRecord {
    pub(crate) name: String,
    pub(crate) method: u16,
    pub(crate) crc32: u32,
    pub(crate) size: u64,
    pub(crate) local_header_offset: u64,
}

/// The end-of-central-directory record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EndOfCentral {
    pub(crate) entry_count: u64,
    pub(crate) central_offset: u64,
    pub(crate) central_size: u64,
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn entry_u32(name: &str, value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StrataError::ArchiveWrite {
        cause: format!("entry '{}': {} {} exceeds the 4 GiB archive limit", name, what, value),
    })
}

fn name_u16(name: &str) -> Result<u16> {
    u16::try_from(name.len()).map_err(|_| StrataError::ArchiveWrite {
        cause: format!("entry name of {} bytes is too long", name.len()),
    })
}

/// Encode a local file header for a STORE entry.
pub(crate) fn encode_local_header(record: &EntryRecord) -> Result<Vec<u8>> {
    let size = entry_u32(&record.name, record.size, "size")?;
    let name_len = name_u16(&record.name)?;
    let mut out = Vec::with_capacity(LOCAL_HEADER_LEN + record.name.len());
    put_u32(&mut out, LOCAL_HEADER_SIGNATURE);
    put_u16(&mut out, VERSION_NEEDED);
    put_u16(&mut out, FLAG_UTF8_NAMES);
    put_u16(&mut out, METHOD_STORE);
    put_u16(&mut out, 0); // mod time
    put_u16(&mut out, 0); // mod date
    put_u32(&mut out, record.crc32);
    put_u32(&mut out, size); // compressed == uncompressed under STORE
    put_u32(&mut out, size);
    put_u16(&mut out, name_len);
    put_u16(&mut out, 0); // extra field
    out.extend_from_slice(record.name.as_bytes());
    Ok(out)
}

/// Encode a central directory record.
pub(crate) fn encode_central_header(record: &EntryRecord) -> Result<Vec<u8>> {
    let size = entry_u32(&record.name, record.size, "size")?;
    let offset = entry_u32(&record.name, record.local_header_offset, "offset")?;
    let name_len = name_u16(&record.name)?;
    let mut out = Vec::with_capacity(CENTRAL_HEADER_LEN + record.name.len());
    put_u32(&mut out, CENTRAL_HEADER_SIGNATURE);
    put_u16(&mut out, VERSION_MADE_BY);
    put_u16(&mut out, VERSION_NEEDED);
    put_u16(&mut out, FLAG_UTF8_NAMES);
    put_u16(&mut out, METHOD_STORE);
    put_u16(&mut out, 0); // mod time
    put_u16(&mut out, 0); // mod date
    put_u32(&mut out, record.crc32);
    put_u32(&mut out, size);
    put_u32(&mut out, size);
    put_u16(&mut out, name_len);
    put_u16(&mut out, 0); // extra field
    put_u16(&mut out, 0); // comment
    put_u16(&mut out, 0); // disk number
    put_u16(&mut out, 0); // internal attributes
    put_u32(&mut out, EXTERNAL_ATTRIBUTES);
    put_u32(&mut out, offset);
    out.extend_from_slice(record.name.as_bytes());
    Ok(out)
}

/// Encode the end-of-central-directory record.
pub(crate) fn encode_end_of_central(
    entry_count: usize,
    central_offset: u64,
    central_size: u64,
) -> Result<Vec<u8>> {
    let entries = u16::try_from(entry_count).map_err(|_| StrataError::ArchiveWrite {
        cause: format!("{} entries exceed the archive entry limit", entry_count),
    })?;
    let offset = entry_u32("<central directory>", central_offset, "offset")?;
    let size = entry_u32("<central directory>", central_size, "size")?;
    let mut out = Vec::with_capacity(END_OF_CENTRAL_LEN);
    put_u32(&mut out, END_OF_CENTRAL_SIGNATURE);
    put_u16(&mut out, 0); // disk number
    put_u16(&mut out, 0); // central directory disk
    put_u16(&mut out, entries); // entries on this disk
    put_u16(&mut out, entries);
    put_u32(&mut out, size);
    put_u32(&mut out, offset);
    put_u16(&mut out, 0); // comment length
    Ok(out)
}

fn format_error(offset: usize, cause: impl Into<String>) -> StrataError {
    StrataError::ArchiveFormat {
        offset: offset as u64,
        cause: cause.into(),
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    let end = offset
        .checked_add(2)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| format_error(offset, "truncated field"))?;
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&bytes[offset..end]);
    Ok(u16::from_le_bytes(raw))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let end = offset
        .checked_add(4)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| format_error(offset, "truncated field"))?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..end]);
    Ok(u32::from_le_bytes(raw))
}

/// Locate and decode the end-of-central-directory record by scanning
/// backwards past any trailing archive comment.
pub(crate) fn find_end_of_central(bytes: &[u8]) -> Result<EndOfCentral> {
    if bytes.len() < END_OF_CENTRAL_LEN {
        return Err(format_error(0, "archive shorter than its end record"));
    }
    let floor = bytes
        .len()
        .saturating_sub(END_OF_CENTRAL_LEN + MAX_COMMENT_LEN);
    let mut candidate = bytes.len() - END_OF_CENTRAL_LEN;
    loop {
        if read_u32(bytes, candidate)? == END_OF_CENTRAL_SIGNATURE {
            let comment_len = read_u16(bytes, candidate + 20)? as usize;
            if candidate + END_OF_CENTRAL_LEN + comment_len == bytes.len() {
                let entry_count = read_u16(bytes, candidate + 10)? as u64;
                let central_size = read_u32(bytes, candidate + 12)? as u64;
                let central_offset = read_u32(bytes, candidate + 16)? as u64;
                if central_offset == u32::MAX as u64 {
                    return Err(format_error(candidate, "zip64 archives are not supported"));
                }
                return Ok(EndOfCentral {
                    entry_count,
                    central_offset,
                    central_size,
                });
            }
        }
        if candidate == floor {
            return Err(format_error(bytes.len(), "end of central directory not found"));
        }
        candidate -= 1;
    }
}

/// Decode the central directory record at `offset`, returning it together
/// with the offset of the next record.
pub(crate) fn parse_central_header(bytes: &[u8], offset: usize) -> Result<(EntryRecord, usize)> {
    if read_u32(bytes, offset)? != CENTRAL_HEADER_SIGNATURE {
        return Err(format_error(offset, "bad central directory signature"));
    }
    let method = read_u16(bytes, offset + 10)?;
    let crc32 = read_u32(bytes, offset + 16)?;
    let size = read_u32(bytes, offset + 20)? as u64;
    let uncompressed = read_u32(bytes, offset + 24)? as u64;
    let name_len = read_u16(bytes, offset + 28)? as usize;
    let extra_len = read_u16(bytes, offset + 30)? as usize;
    let comment_len = read_u16(bytes, offset + 32)? as usize;
    let local_header_offset = read_u32(bytes, offset + 42)? as u64;

    if size == u32::MAX as u64 || local_header_offset == u32::MAX as u64 {
        return Err(format_error(offset, "zip64 entries are not supported"));
    }
    if method == METHOD_STORE && size != uncompressed {
        return Err(format_error(offset, "stored entry sizes disagree"));
    }

    let name_start = offset + CENTRAL_HEADER_LEN;
    let name_end = name_start
        .checked_add(name_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| format_error(offset, "truncated entry name"))?;
    let name = std::str::from_utf8(&bytes[name_start..name_end])
        .map_err(|_| format_error(name_start, "entry name is not valid UTF-8"))?
        .to_string();

    let next = name_end + extra_len + comment_len;
    Ok((
        EntryRecord {
            name,
            method,
            crc32,
            size,
            local_header_offset,
        },
        next,
    ))
}

/// Compute the payload offset of an entry from its local file header:
/// the header is 30 bytes plus the name and extra fields actually written
/// there (which may differ from the central directory's).
pub(crate) fn payload_offset(bytes: &[u8], local_header_offset: u64) -> Result<u64> {
    let base = usize::try_from(local_header_offset)
        .map_err(|_| format_error(0, "local header offset out of range"))?;
    if read_u32(bytes, base)? != LOCAL_HEADER_SIGNATURE {
        return Err(format_error(base, "bad local header signature"));
    }
    let name_len = read_u16(bytes, base + 26)? as u64;
    let extra_len = read_u16(bytes, base + 28)? as u64;
    Ok(local_header_offset + LOCAL_HEADER_LEN as u64 + name_len + extra_len)
}
