//! Whole-file acquisition by URL download.
//!
//! The download itself goes through a pluggable function so hosts can
//! substitute their own fetch (FTP, local cache, test double); the default
//! is a blocking HTTP GET streamed to disk. No downloader configured means
//! the URL path is disabled.

use std::path::Path;
use std::sync::Mutex;

use tracing::{error, info, warn};

use otaclient_protocol::{FileTransferError, FileTransferStatus};
use otaclient_store::FileStore;

/// Reports a URL download status to the message layer, carrying the
/// resolved file name once the file is ready.
pub type UrlStatusCallback = Box<dyn Fn(&str, FileTransferStatus, Option<&str>) + Send + Sync>;

/// Fetches `url` into the destination path, returning `true` on success.
pub type Downloader = Box<dyn Fn(&str, &Path) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Transfer,
}

#[derive(Default)]
struct UrlState {
    phase: Phase,
    file_url: String,
    file_name: String,
    /// Bumped on every initiation and abort; a download finishing under a
    /// stale epoch is discarded.
    epoch: u64,
}

/// Alternate acquisition path: download a whole file from a URL into the
/// managed directory.
pub struct UrlTransferSession {
    store: FileStore,
    downloader: Option<Downloader>,
    state: Mutex<UrlState>,
    on_status: UrlStatusCallback,
}

impl UrlTransferSession {
    pub fn new(store: FileStore, downloader: Option<Downloader>, on_status: UrlStatusCallback) -> Self {
        Self {
            store,
            downloader,
            state: Mutex::new(UrlState::default()),
            on_status,
        }
    }

    /// Returns `true` when no download is in progress.
    pub fn is_idle(&self) -> bool {
        self.state.lock().unwrap().phase == Phase::Idle
    }

    /// Handles a platform request to obtain a file from `url`.
    ///
    /// Blocks on the downloader; the session lock is not held meanwhile,
    /// so [`handle_file_url_download_abort`](Self::handle_file_url_download_abort)
    /// is accepted mid-download from another thread.
    pub fn handle_file_url_download_initiation(&self, url: &str) {
        info!(url = %url, "file URL download initiated");

        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Idle {
            warn!("not in idle state, ignoring file URL download initiation");
            return;
        }

        let Some(downloader) = self.downloader.as_ref() else {
            warn!("no downloader configured, URL transfer is disabled");
            drop(state);
            self.emit(
                url,
                FileTransferStatus::Error(FileTransferError::TransferProtocolDisabled),
                None,
            );
            return;
        };

        let Some(file_name) = file_name_from_url(url) else {
            error!(url = %url, "received URL is not valid");
            drop(state);
            self.emit(
                url,
                FileTransferStatus::Error(FileTransferError::MalformedUrl),
                None,
            );
            return;
        };

        state.phase = Phase::Transfer;
        state.file_url = url.to_string();
        state.file_name = file_name.clone();
        state.epoch = state.epoch.wrapping_add(1);
        let epoch = state.epoch;
        drop(state);

        self.emit(url, FileTransferStatus::FileTransfer, None);

        let dest = self.store.target_path(&file_name);
        let ok = downloader(url, &dest);

        let mut state = self.state.lock().unwrap();
        if state.epoch != epoch || state.phase != Phase::Transfer {
            // Aborted while the download ran: discard the late completion.
            drop(state);
            let _ = std::fs::remove_file(&dest);
            return;
        }
        state.phase = Phase::Idle;
        state.file_url.clear();
        state.file_name.clear();
        state.epoch = state.epoch.wrapping_add(1);
        drop(state);

        if !ok || !dest.is_file() {
            error!(url = %url, "file failed to store from URL");
            let _ = std::fs::remove_file(&dest);
            self.emit(
                url,
                FileTransferStatus::Error(FileTransferError::FileSystemError),
                None,
            );
            return;
        }

        info!(url = %url, file = %file_name, "file obtained from URL");
        self.emit(url, FileTransferStatus::FileReady, Some(&file_name));
    }

    /// Aborts a running URL download and resets to Idle.
    pub fn handle_file_url_download_abort(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Idle {
            return;
        }
        info!(url = %state.file_url, "aborting URL download");
        state.phase = Phase::Idle;
        state.file_url.clear();
        state.file_name.clear();
        state.epoch = state.epoch.wrapping_add(1);
    }

    fn emit(&self, url: &str, status: FileTransferStatus, file_name: Option<&str>) {
        (self.on_status)(url, status, file_name);
    }
}

/// Derives the file name from the URL's last path segment, requiring a
/// syntactically valid scheme.
fn file_name_from_url(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }

    let path = rest.split(['?', '#']).next().unwrap_or(rest);
    let name = path.rsplit('/').next().unwrap_or("");
    if name.is_empty() || name == path {
        // No path separator at all means the URL has no file component.
        return None;
    }
    Some(name.to_string())
}

/// Default downloader: blocking HTTP GET streamed to disk.
pub fn http_downloader() -> Downloader {
    Box::new(|url, dest| match fetch(url, dest) {
        Ok(()) => true,
        Err(e) => {
            warn!(url = %url, error = %e, "HTTP download failed");
            false
        }
    })
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fetch(url: &str, dest: &Path) -> Result<(), FetchError> {
    let mut response = reqwest::blocking::get(url)?.error_for_status()?;
    let mut file = std::fs::File::create(dest)?;
    response.copy_to(&mut file)?;
    file.sync_all()?;
    Ok(())
}
