use serde::{Deserialize, Serialize};

/// Terminal error kinds in the file-transfer domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileTransferError {
    UnspecifiedError,
    TransferProtocolDisabled,
    UnsupportedFileSize,
    MalformedUrl,
    FileHashMismatch,
    FileSystemError,
    RetryCountExceeded,
}

/// File management status reported to the platform.
///
/// `Idle` is an internal session phase, never reported, so it has no
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileTransferStatus {
    FileTransfer,
    FileReady,
    Aborted,
    Error(FileTransferError),
}

/// Terminal error kinds in the firmware-update domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirmwareUpdateError {
    Unknown,
    UnknownFile,
    InstallationFailed,
}

/// Firmware update status reported to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirmwareUpdateStatus {
    Installing,
    Success,
    Aborted,
    Error(FirmwareUpdateError),
}
