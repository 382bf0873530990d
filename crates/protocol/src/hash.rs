//! Announced-file-hash codec.
//!
//! The platform announces the whole-file MD5 either hex-encoded or as
//! base64 of the 16-byte digest, depending on protocol vintage. Base64
//! arrives with its `=` padding stripped by some senders, so padding is
//! repaired before decoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Length of an MD5 digest in bytes.
pub const MD5_LEN: usize = 16;

/// A decoded whole-file MD5 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHash(pub [u8; MD5_LEN]);

impl FileHash {
    /// Parses an announced hash, accepting 32-char hex or base64 of the
    /// 16-byte digest. Returns `None` when neither decoding yields an
    /// MD5-sized value.
    pub fn parse(announced: &str) -> Option<Self> {
        if announced.len() == 2 * MD5_LEN {
            if let Ok(bytes) = hex::decode(announced) {
                if let Ok(digest) = <[u8; MD5_LEN]>::try_from(bytes.as_slice()) {
                    return Some(Self(digest));
                }
            }
        }

        let padded = repair_padding(announced);
        let bytes = STANDARD.decode(padded).ok()?;
        let digest = <[u8; MD5_LEN]>::try_from(bytes.as_slice()).ok()?;
        Some(Self(digest))
    }

    /// Returns the hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn repair_padding(value: &str) -> String {
    let missing = (4 - value.len() % 4) % 4;
    let mut out = String::with_capacity(value.len() + missing);
    out.push_str(value);
    for _ in 0..missing {
        out.push('=');
    }
    out
}
