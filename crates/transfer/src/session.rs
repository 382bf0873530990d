//! Package-based file transfer session.
//!
//! One session exists process-wide. The message layer feeds it parsed
//! commands and raw packages; it answers through two callbacks: a status
//! report and a package request that the message layer encodes for the
//! platform. All session state lives behind one mutex (single-writer);
//! callbacks are invoked only after the guard is released, so a callback
//! that reenters the session cannot deadlock.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use otaclient_protocol::{FileHash, FileTransferError, FileTransferPackage, FileTransferStatus, HASH_LEN};
use otaclient_store::FileStore;

use crate::chain::{self, PackageFault};
use crate::timer::RequestTimer;
use crate::{DEFAULT_PACKAGE_SIZE, MAX_RETRIES, REQUEST_TIMEOUT};

/// Reports a transfer status for a file to the message layer.
pub type StatusCallback = Box<dyn Fn(&str, FileTransferStatus) + Send + Sync>;

/// Asks the platform to send the package at the given index.
pub type PackageRequest = Box<dyn Fn(&str, u64) + Send + Sync>;

/// Transfer tuning knobs.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Package size in bytes. Zero means the whole file arrives as a
    /// single package.
    pub package_size: u64,
    /// Largest announced file size accepted. Zero means no cap.
    pub max_file_size: u64,
    /// Consecutive invalid packages tolerated at one index.
    pub max_retries: u32,
    /// How long to wait for a requested package.
    pub request_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            package_size: DEFAULT_PACKAGE_SIZE,
            max_file_size: 0,
            max_retries: MAX_RETRIES,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Transfer,
}

#[derive(Default)]
struct TransferState {
    phase: Phase,
    file_name: String,
    file_size: u64,
    file_hash: Option<FileHash>,
    expected_packages: u64,
    next_package: u64,
    retry_count: u32,
    last_package_hash: [u8; HASH_LEN],
    temp: Option<NamedTempFile>,
    timer: Option<RequestTimer>,
    /// Bumped on every timer arm and every reset; a timer fire whose
    /// captured generation no longer matches is a no-op.
    generation: u64,
}

/// Resets every session field to its Idle default.
///
/// Closing the temp-file handle and cancelling the timer are part of every
/// terminal transition, in that order, before any callback runs.
fn reset(state: &mut TransferState) {
    state.timer = None;
    state.generation = state.generation.wrapping_add(1);
    state.temp = None;
    state.phase = Phase::Idle;
    state.file_name.clear();
    state.file_size = 0;
    state.file_hash = None;
    state.expected_packages = 0;
    state.next_package = 0;
    state.retry_count = 0;
    state.last_package_hash = [0u8; HASH_LEN];
}

/// State machine driving package-based file transfer.
pub struct FileTransferSession {
    config: TransferConfig,
    store: FileStore,
    state: Arc<Mutex<TransferState>>,
    on_status: Arc<StatusCallback>,
    request_package: Arc<PackageRequest>,
}

impl FileTransferSession {
    pub fn new(
        config: TransferConfig,
        store: FileStore,
        on_status: StatusCallback,
        request_package: PackageRequest,
    ) -> Self {
        Self {
            config,
            store,
            state: Arc::new(Mutex::new(TransferState::default())),
            on_status: Arc::new(on_status),
            request_package: Arc::new(request_package),
        }
    }

    /// Returns `true` when no transfer is in progress.
    pub fn is_idle(&self) -> bool {
        self.state.lock().unwrap().phase == Phase::Idle
    }

    /// Handles a platform request to transfer a file package by package.
    pub fn handle_upload_initiation(&self, file_name: &str, file_size: u64, file_hash: &str) {
        info!(
            file = %file_name,
            size = file_size,
            hash = %file_hash,
            "file transfer initiated"
        );

        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Idle {
            warn!("not in idle state, ignoring file upload initiation");
            return;
        }

        if self.config.max_file_size > 0 && file_size > self.config.max_file_size {
            error!(
                size = file_size,
                max = self.config.max_file_size,
                "announced file size above configured maximum"
            );
            drop(state);
            self.emit(
                file_name,
                FileTransferStatus::Error(FileTransferError::UnsupportedFileSize),
            );
            return;
        }

        if !is_plain_file_name(file_name) {
            error!(file = %file_name, "file name is not a plain file name");
            drop(state);
            self.emit(
                file_name,
                FileTransferStatus::Error(FileTransferError::FileSystemError),
            );
            return;
        }

        let Some(announced_hash) = FileHash::parse(file_hash) else {
            error!(hash = %file_hash, "announced file hash is not a valid MD5");
            drop(state);
            self.emit(
                file_name,
                FileTransferStatus::Error(FileTransferError::FileHashMismatch),
            );
            return;
        };

        // Already-present short-circuit: never re-download identical content.
        if let Some(path) = self.store.path_of(file_name) {
            match otaclient_store::md5_file(&path) {
                Ok(digest) if digest == announced_hash.0 => {
                    info!(file = %file_name, "file already on device with matching hash");
                    drop(state);
                    self.emit(file_name, FileTransferStatus::FileReady);
                }
                Ok(_) => {
                    warn!(file = %file_name, "file already on device but hash differs");
                    drop(state);
                    self.emit(
                        file_name,
                        FileTransferStatus::Error(FileTransferError::FileHashMismatch),
                    );
                }
                Err(e) => {
                    error!(file = %file_name, error = %e, "failed to hash existing file");
                    drop(state);
                    self.emit(
                        file_name,
                        FileTransferStatus::Error(FileTransferError::FileSystemError),
                    );
                }
            }
            return;
        }

        let expected_packages = if self.config.package_size == 0 {
            1
        } else {
            file_size.div_ceil(self.config.package_size).max(1)
        };

        let temp = match NamedTempFile::new() {
            Ok(temp) => temp,
            Err(e) => {
                error!(error = %e, "failed to open temporary file");
                drop(state);
                self.emit(
                    file_name,
                    FileTransferStatus::Error(FileTransferError::FileSystemError),
                );
                return;
            }
        };

        state.phase = Phase::Transfer;
        state.file_name = file_name.to_string();
        state.file_size = file_size;
        state.file_hash = Some(announced_hash);
        state.expected_packages = expected_packages;
        state.next_package = 0;
        state.retry_count = 0;
        state.last_package_hash = [0u8; HASH_LEN];
        state.temp = Some(temp);
        self.arm_timer(&mut state);
        drop(state);

        info!(expected_packages, "requesting first package");
        self.emit(file_name, FileTransferStatus::FileTransfer);
        (self.request_package)(file_name, 0);
    }

    /// Handles one received package: validate, store, and request the next,
    /// or re-request on corruption with bounded retries.
    pub fn handle_file_binary_response(&self, package: &FileTransferPackage) {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Transfer {
            warn!("file transfer not in progress, ignoring package");
            return;
        }

        // Cancel the pending timeout before anything else.
        state.timer = None;

        if let Err(fault) = chain::verify_package(package, &state.last_package_hash) {
            self.handle_invalid_package(state, fault);
            return;
        }

        debug!(index = state.next_package, "valid package received");
        state.last_package_hash = package.current_hash;
        state.retry_count = 0;

        if let Err(e) = append_package(state.temp.as_mut(), &package.data) {
            error!(error = %e, "failed to write package, aborting file transfer");
            let name = std::mem::take(&mut state.file_name);
            reset(&mut state);
            drop(state);
            self.emit(
                &name,
                FileTransferStatus::Error(FileTransferError::FileSystemError),
            );
            return;
        }

        state.next_package += 1;

        if state.next_package < state.expected_packages {
            debug!(
                next = state.next_package,
                expected = state.expected_packages,
                "stored package, requesting next"
            );
            let name = state.file_name.clone();
            let index = state.next_package;
            self.arm_timer(&mut state);
            drop(state);
            self.emit(&name, FileTransferStatus::FileTransfer);
            (self.request_package)(&name, index);
            return;
        }

        self.finish_transfer(state);
    }

    /// Aborts a running transfer, reporting `Aborted`. Idempotent: does
    /// nothing when no transfer is in progress.
    pub fn handle_file_upload_abort(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Idle {
            return;
        }
        info!(file = %state.file_name, "aborting file transfer");
        let name = std::mem::take(&mut state.file_name);
        reset(&mut state);
        drop(state);
        self.emit(&name, FileTransferStatus::Aborted);
    }

    fn handle_invalid_package(&self, mut state: MutexGuard<'_, TransferState>, fault: PackageFault) {
        warn!(
            ?fault,
            index = state.next_package,
            expected_previous = %hex::encode(state.last_package_hash),
            "received invalid file package"
        );
        state.retry_count += 1;

        if state.retry_count >= self.config.max_retries {
            error!("retry count exceeded, aborting file transfer");
            let name = std::mem::take(&mut state.file_name);
            reset(&mut state);
            drop(state);
            self.emit(
                &name,
                FileTransferStatus::Error(FileTransferError::RetryCountExceeded),
            );
            return;
        }

        info!(index = state.next_package, "requesting package again");
        let name = state.file_name.clone();
        let index = state.next_package;
        self.arm_timer(&mut state);
        drop(state);
        (self.request_package)(&name, index);
    }

    /// Final package stored: verify the whole-file hash and move the file
    /// into the managed directory.
    fn finish_transfer(&self, mut state: MutexGuard<'_, TransferState>) {
        let name = std::mem::take(&mut state.file_name);
        let announced = state.file_hash.take();
        let temp = state.temp.take();
        reset(&mut state);
        drop(state);

        let (Some(temp), Some(announced)) = (temp, announced) else {
            self.emit(
                &name,
                FileTransferStatus::Error(FileTransferError::FileSystemError),
            );
            return;
        };

        match otaclient_store::md5_file(temp.path()) {
            Ok(digest) if digest == announced.0 => {}
            Ok(digest) => {
                error!(
                    file = %name,
                    actual = %hex::encode(digest),
                    expected = %announced.to_hex(),
                    "assembled file hash does not match announced hash"
                );
                self.emit(
                    &name,
                    FileTransferStatus::Error(FileTransferError::FileHashMismatch),
                );
                return;
            }
            Err(e) => {
                error!(file = %name, error = %e, "failed to hash assembled file");
                self.emit(
                    &name,
                    FileTransferStatus::Error(FileTransferError::FileSystemError),
                );
                return;
            }
        }

        let dest = self.store.target_path(&name);
        if let Err(e) = std::fs::copy(temp.path(), &dest) {
            error!(file = %name, error = %e, "failed to store assembled file");
            self.emit(
                &name,
                FileTransferStatus::Error(FileTransferError::FileSystemError),
            );
            return;
        }

        info!(file = %name, "file transfer complete");
        self.emit(&name, FileTransferStatus::FileReady);
    }

    /// Arms the request timeout. Bumps the session generation so a timer
    /// from an earlier arm that is still racing for the lock fizzles.
    fn arm_timer(&self, state: &mut TransferState) {
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let weak = Arc::downgrade(&self.state);
        let on_status = Arc::clone(&self.on_status);
        state.timer = Some(RequestTimer::arm(self.config.request_timeout, move || {
            fire_timeout(&weak, generation, &on_status);
        }));
    }

    fn emit(&self, file_name: &str, status: FileTransferStatus) {
        (self.on_status)(file_name, status);
    }
}

fn fire_timeout(
    weak: &Weak<Mutex<TransferState>>,
    generation: u64,
    on_status: &StatusCallback,
) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut state = shared.lock().unwrap();
    if state.generation != generation || state.phase != Phase::Transfer {
        return;
    }
    error!(file = %state.file_name, "timed out waiting for next package, aborting");
    let name = std::mem::take(&mut state.file_name);
    reset(&mut state);
    drop(state);
    on_status(
        &name,
        FileTransferStatus::Error(FileTransferError::UnspecifiedError),
    );
}

/// A platform-supplied file name must be a plain name within the managed
/// directory, never a path.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

fn append_package(temp: Option<&mut NamedTempFile>, data: &[u8]) -> std::io::Result<()> {
    let Some(temp) = temp else {
        return Err(std::io::Error::other("no open temporary file"));
    };
    let file = temp.as_file_mut();
    file.write_all(data)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}
