//! Platform-facing value types for device-side file management and
//! firmware update.
//!
//! This crate is wire-variant neutral: it carries the statuses, records,
//! and the binary package codec that every protocol adapter (JSON or
//! otherwise) encodes for the platform. The adapters themselves live in
//! the message layer, not here.

pub mod hash;
pub mod package;
pub mod status;
pub mod types;

pub use hash::{FileHash, MD5_LEN};
pub use package::{sha256, FileTransferPackage, PackageError, HASH_LEN, MIN_PACKAGE_LEN};
pub use status::{
    FileTransferError, FileTransferStatus, FirmwareUpdateError, FirmwareUpdateStatus,
};
pub use types::FileRecord;
