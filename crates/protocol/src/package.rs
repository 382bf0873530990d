//! Binary file-transfer package codec.
//!
//! # Wire format
//!
//! ```text
//! PACKAGE (platform -> device, payload of one transport message):
//!   [32 bytes: SHA-256 of the previous package's data]
//!   [1..N bytes: raw file data]
//!   [32 bytes: SHA-256 of this package's data]
//! ```
//!
//! Minimum total length is 65 bytes: a package with empty data is never
//! valid. The first package of a file carries 32 zero bytes as its
//! previous hash.

use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest in bytes.
pub const HASH_LEN: usize = 32;

/// Minimum valid package length: two digests plus at least one data byte.
pub const MIN_PACKAGE_LEN: usize = 2 * HASH_LEN + 1;

/// Errors produced by the package codec.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("package too short: {0} bytes (min {MIN_PACKAGE_LEN})")]
    TooShort(usize),
}

/// One hash-chained chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferPackage {
    /// SHA-256 of the previous package's data (32 zero bytes for the first).
    pub previous_hash: [u8; HASH_LEN],
    /// Raw file data, at least one byte.
    pub data: Vec<u8>,
    /// SHA-256 of `data`.
    pub current_hash: [u8; HASH_LEN],
}

impl FileTransferPackage {
    /// Decodes a package from the raw payload of a transport message.
    pub fn decode(bytes: &[u8]) -> Result<Self, PackageError> {
        if bytes.len() < MIN_PACKAGE_LEN {
            return Err(PackageError::TooShort(bytes.len()));
        }

        let mut previous_hash = [0u8; HASH_LEN];
        previous_hash.copy_from_slice(&bytes[..HASH_LEN]);

        let mut current_hash = [0u8; HASH_LEN];
        current_hash.copy_from_slice(&bytes[bytes.len() - HASH_LEN..]);

        Ok(Self {
            previous_hash,
            data: bytes[HASH_LEN..bytes.len() - HASH_LEN].to_vec(),
            current_hash,
        })
    }

    /// Encodes the package into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * HASH_LEN + self.data.len());
        out.extend_from_slice(&self.previous_hash);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.current_hash);
        out
    }

    /// Builds a package from raw data, computing `current_hash`.
    pub fn from_data(previous_hash: [u8; HASH_LEN], data: Vec<u8>) -> Self {
        let current_hash = sha256(&data);
        Self {
            previous_hash,
            data,
            current_hash,
        }
    }
}

/// Computes the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
