//! Chunked file transfer from the platform to the device.
//!
//! Two acquisition paths share the managed directory: the package-based
//! [`FileTransferSession`] (hash-chained chunks requested one at a time
//! through the message layer) and the [`UrlTransferSession`] (whole-file
//! download through a pluggable downloader). Exactly one transfer is in
//! flight system-wide; both sessions enforce that with state checks, not
//! locks held across I/O.

mod chain;
mod session;
mod timer;
mod url;

pub use chain::{verify_package, PackageFault};
pub use session::{FileTransferSession, PackageRequest, StatusCallback, TransferConfig};
pub use url::{http_downloader, Downloader, UrlStatusCallback, UrlTransferSession};

use std::time::Duration;

/// Default package size in bytes (256 KiB).
///
/// Package sizes are expressed in bytes throughout; hosts announcing a
/// preferred size in other units must convert before configuring.
pub const DEFAULT_PACKAGE_SIZE: u64 = 256 * 1024;

/// Consecutive invalid packages tolerated at one index before aborting.
pub const MAX_RETRIES: u32 = 3;

/// How long to wait for a requested package before aborting the session.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
