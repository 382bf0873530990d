use serde::{Deserialize, Serialize};

/// One file in the managed directory, as reported to the platform.
///
/// Derived on demand by scanning the directory; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub name: String,
    pub size_bytes: u64,
    pub md5_hex: String,
}
