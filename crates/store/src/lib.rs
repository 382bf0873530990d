//! Managed-directory file inventory.
//!
//! A single directory is the authoritative file store for the device:
//! listing, checksum, lookup, and deletion all scan it on demand rather
//! than caching, so the directory itself is always the source of truth.
//! Hidden files and anything that is not a regular file are ignored.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::{debug, info};

use otaclient_protocol::FileRecord;

/// Errors produced by the file store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The managed download directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path a file with `name` would occupy in the store.
    ///
    /// The file need not exist; use [`path_of`](Self::path_of) to look up
    /// existing files.
    pub fn target_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Lists regular, non-hidden files with their size and MD5.
    pub fn list(&self) -> Result<Vec<FileRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let digest = md5_file(&entry.path())?;
            records.push(FileRecord {
                name: name.into_owned(),
                size_bytes: metadata.len(),
                md5_hex: hex::encode(digest),
            });
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = records.len(), "listed files in store");
        Ok(records)
    }

    /// Returns the path to `name` if it is a listed file in the store.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        if name.starts_with('.') || name.contains('/') || name.contains('\\') {
            return None;
        }
        let path = self.dir.join(name);
        if path.is_file() { Some(path) } else { None }
    }

    /// Computes the MD5 of a stored file, hex-encoded.
    pub fn md5_hex(&self, name: &str) -> Result<Option<String>, StoreError> {
        match self.path_of(name) {
            Some(path) => Ok(Some(hex::encode(md5_file(&path)?))),
            None => Ok(None),
        }
    }

    /// Deletes the named files. Missing files are silently ignored.
    pub fn delete<I, S>(&self, names: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if let Some(path) = self.path_of(name) {
                std::fs::remove_file(&path)?;
                info!(file = %name, "deleted file from store");
            }
        }
        Ok(())
    }

    /// Deletes all regular non-hidden files from the store.
    pub fn purge(&self) -> Result<(), StoreError> {
        for record in self.list()? {
            std::fs::remove_file(self.dir.join(&record.name))?;
        }
        info!("purged file store");
        Ok(())
    }
}

/// Computes the MD5 digest of a file, streaming in 8 KiB blocks.
pub fn md5_file(path: &Path) -> std::io::Result<[u8; 16]> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
