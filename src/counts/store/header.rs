use std::fmt;
use std::path::Path;

use crate::counts::key::KEY_LEN;
use crate::primitives::bytes::ord;
use crate::types::{header_crc32, CountsError, Generation, Result, TxId};

/// Format descriptor at the start of every counts store file.
pub const STORE_MAGIC: [u8; 8] = *b"SBCOUNTS";
/// Layout version written by this engine.
pub const STORE_FORMAT_VERSION: u16 = 1;
/// Fixed header size; entries start right after it.
pub const HEADER_LEN: usize = 128;
/// Encoded size of one `(key, value)` entry.
pub const ENTRY_LEN: usize = KEY_LEN + 8;
/// Longest version tag that fits in the header.
pub const MAX_VERSION_TAG_LEN: usize = 78;
/// Version tag stamped by default on new stores.
pub const DEFAULT_VERSION_TAG: &str = "SombraCounts v1";

mod layout {
    //! Byte offsets for fixed header fields.
    use core::ops::Range;

    pub const MAGIC: Range<usize> = 0..8;
    pub const FORMAT_VERSION: Range<usize> = 8..10;
    pub const ENTRY_LEN: Range<usize> = 10..12;
    pub const RESERVED: Range<usize> = 12..16;
    pub const TX_ID: Range<usize> = 16..24;
    pub const GENERATION: Range<usize> = 24..32;
    pub const ENTRY_COUNT: Range<usize> = 32..40;
    pub const BODY_CRC32: Range<usize> = 40..44;
    pub const TAG_LEN: Range<usize> = 44..46;
    pub const TAG: Range<usize> = 46..124;
    pub const HEADER_CRC32: Range<usize> = 124..128;
}

/// Decoded header of a snapshot store file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreHeader {
    /// Layout version of the file.
    pub format_version: u16,
    /// Size of each entry in bytes.
    pub entry_len: u16,
    /// Engine version tag the file was written with.
    pub version_tag: String,
    /// Every update committed up to and including this transaction is reflected.
    pub tx_id: TxId,
    /// Physical generation of the file.
    pub generation: Generation,
    /// Number of entries in the body.
    pub entry_count: u64,
    /// CRC32 over the body bytes.
    pub body_crc32: u32,
}

impl StoreHeader {
    /// Creates a header for a store about to be written; counts and checksum
    /// are filled in once the body is complete.
    pub fn new(version_tag: &str, tx_id: TxId, generation: Generation) -> Result<Self> {
        validate_version_tag(version_tag)?;
        Ok(Self {
            format_version: STORE_FORMAT_VERSION,
            entry_len: ENTRY_LEN as u16,
            version_tag: version_tag.to_owned(),
            tx_id,
            generation,
            entry_count: 0,
            body_crc32: 0,
        })
    }

    /// Length of the body implied by the entry count.
    pub fn body_len(&self) -> Option<u64> {
        self.entry_count.checked_mul(ENTRY_LEN as u64)
    }

    /// Expected total file length.
    pub fn file_len(&self) -> Option<u64> {
        self.body_len()?.checked_add(HEADER_LEN as u64)
    }

    /// Serializes the header, including its trailing checksum.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_LEN {
            return Err(CountsError::Invalid("header buffer too small"));
        }
        validate_version_tag(&self.version_tag)?;
        let buf = &mut buf[..HEADER_LEN];
        buf.fill(0);
        buf[layout::MAGIC].copy_from_slice(&STORE_MAGIC);
        ord::put_u16_be(&mut buf[layout::FORMAT_VERSION], self.format_version);
        ord::put_u16_be(&mut buf[layout::ENTRY_LEN], self.entry_len);
        ord::put_u64_be(&mut buf[layout::TX_ID], self.tx_id.0);
        ord::put_u64_be(&mut buf[layout::GENERATION], self.generation.0);
        ord::put_u64_be(&mut buf[layout::ENTRY_COUNT], self.entry_count);
        ord::put_u32_be(&mut buf[layout::BODY_CRC32], self.body_crc32);
        let tag = self.version_tag.as_bytes();
        ord::put_u16_be(&mut buf[layout::TAG_LEN], tag.len() as u16);
        buf[layout::TAG.start..layout::TAG.start + tag.len()].copy_from_slice(tag);
        let crc = header_crc32(self.generation.0, &buf[..layout::HEADER_CRC32.start]);
        ord::put_u32_be(&mut buf[layout::HEADER_CRC32], crc);
        Ok(())
    }

    /// Parses and checksums a header read from `path`.
    ///
    /// Only structural problems are reported here; compatibility with the
    /// running engine is checked by [`StoreHeader::check_compatible`].
    pub fn decode(path: &Path, buf: &[u8]) -> Result<Self> {
        let corrupt = |reason| CountsError::CorruptHeader {
            path: path.to_path_buf(),
            reason,
        };
        if buf.len() < HEADER_LEN {
            return Err(corrupt("header truncated"));
        }
        let buf = &buf[..HEADER_LEN];
        if buf.iter().all(|b| *b == 0) {
            return Err(corrupt("header never written"));
        }
        if buf[layout::MAGIC] != STORE_MAGIC {
            return Err(corrupt("bad format descriptor"));
        }
        let generation = ord::get_u64_be(&buf[layout::GENERATION]);
        let crc = header_crc32(generation, &buf[..layout::HEADER_CRC32.start]);
        if crc != ord::get_u32_be(&buf[layout::HEADER_CRC32]) {
            return Err(corrupt("header crc mismatch"));
        }
        if buf[layout::RESERVED].iter().any(|b| *b != 0) {
            return Err(corrupt("header reserved field non-zero"));
        }
        let tag_len = ord::get_u16_be(&buf[layout::TAG_LEN]) as usize;
        if tag_len == 0 || tag_len > MAX_VERSION_TAG_LEN {
            return Err(corrupt("version tag length out of range"));
        }
        let tag_end = layout::TAG.start + tag_len;
        if buf[tag_end..layout::TAG.end].iter().any(|b| *b != 0) {
            return Err(corrupt("version tag padding non-zero"));
        }
        let version_tag = std::str::from_utf8(&buf[layout::TAG.start..tag_end])
            .map_err(|_| corrupt("version tag is not UTF-8"))?
            .to_owned();
        Ok(Self {
            format_version: ord::get_u16_be(&buf[layout::FORMAT_VERSION]),
            entry_len: ord::get_u16_be(&buf[layout::ENTRY_LEN]),
            version_tag,
            tx_id: TxId(ord::get_u64_be(&buf[layout::TX_ID])),
            generation: Generation(generation),
            entry_count: ord::get_u64_be(&buf[layout::ENTRY_COUNT]),
            body_crc32: ord::get_u32_be(&buf[layout::BODY_CRC32]),
        })
    }

    /// Refuses files written by another layout version or engine version tag.
    pub fn check_compatible(&self, path: &Path, expected_tag: &str) -> Result<()> {
        if self.format_version != STORE_FORMAT_VERSION || self.entry_len as usize != ENTRY_LEN {
            return Err(CountsError::VersionMismatch {
                path: path.to_path_buf(),
                expected: format!("format {STORE_FORMAT_VERSION}/{ENTRY_LEN}"),
                found: format!("format {}/{}", self.format_version, self.entry_len),
            });
        }
        if self.version_tag != expected_tag {
            return Err(CountsError::VersionMismatch {
                path: path.to_path_buf(),
                expected: expected_tag.to_owned(),
                found: self.version_tag.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for StoreHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreHeader(format_version={}, version_tag={}, tx_id={}, generation={}, entry_count={}, body_crc32={:#010x})",
            self.format_version,
            self.version_tag,
            self.tx_id,
            self.generation,
            self.entry_count,
            self.body_crc32,
        )
    }
}

/// Checks that a version tag can be stored in a header.
pub fn validate_version_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(CountsError::Invalid("version tag must not be empty"));
    }
    if tag.len() > MAX_VERSION_TAG_LEN {
        return Err(CountsError::Invalid("version tag too long"));
    }
    Ok(())
}
