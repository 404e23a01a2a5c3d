#![forbid(unsafe_code)]

//! CRC32 helpers for snapshot files.

/// Running CRC32 over a snapshot body, fed one batch of entries at a time.
#[derive(Clone, Default)]
pub struct BodyCrc {
    hasher: crc32fast::Hasher,
    bytes: u64,
}

impl BodyCrc {
    /// Folds `bytes` into the checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.bytes += bytes.len() as u64;
    }

    /// Number of bytes folded in so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Checksum of everything folded in so far; the running state is kept.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// CRC over a store header, seeded with its generation so a header copied
/// between files does not validate.
pub fn header_crc32(generation: u64, header: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&generation.to_be_bytes());
    hasher.update(header);
    hasher.finalize()
}
