//! Firmware installation with restart-surviving result resolution.
//!
//! Installing firmware may restart the process or the whole device, so
//! `install_firmware` is allowed to never return. The installer therefore
//! persists the current version to a marker file *before* invoking the
//! handler; on the next start, [`FirmwareInstaller::report_result`]
//! compares the stored version against the now-running one and reports
//! success or failure. The marker's mere existence means "install
//! attempted, outcome unresolved".

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use otaclient_protocol::{FirmwareUpdateError, FirmwareUpdateStatus};

/// Fixed name of the install marker file.
pub const MARKER_FILE_NAME: &str = "firmware_version.txt";

/// Reports a firmware update status to the message layer.
pub type FirmwareStatusCallback = Box<dyn Fn(FirmwareUpdateStatus) + Send + Sync>;

/// Externally supplied installer.
///
/// `install_firmware` may never return control: a real handler typically
/// flashes the image and reboots.
pub trait FirmwareHandler: Send {
    fn install_firmware(&self, file_path: &Path);
    fn get_current_version(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Installing,
}

/// Drives the firmware installation process, one install at a time.
pub struct FirmwareInstaller {
    handler: Box<dyn FirmwareHandler>,
    marker_path: PathBuf,
    on_status: FirmwareStatusCallback,
    phase: Mutex<Phase>,
}

impl FirmwareInstaller {
    /// Creates an installer whose marker file lives in `state_dir`.
    pub fn new(
        handler: Box<dyn FirmwareHandler>,
        state_dir: impl Into<PathBuf>,
        on_status: FirmwareStatusCallback,
    ) -> Self {
        Self {
            handler,
            marker_path: state_dir.into().join(MARKER_FILE_NAME),
            on_status,
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Returns the device's current firmware version.
    pub fn current_version(&self) -> String {
        self.handler.get_current_version()
    }

    /// Handles a received installation command.
    ///
    /// Writes the marker, reports `Installing`, and invokes the handler.
    /// The handler call may not return; nothing here depends on it
    /// returning.
    pub fn handle_install(&self, file_path: &Path) {
        debug!(file = %file_path.display(), "handling firmware install command");

        let mut phase = self.phase.lock().unwrap();
        if *phase != Phase::Idle {
            warn!("not in idle state, ignoring install command");
            return;
        }

        if self.marker_path.exists() {
            // A previous install never got resolved; do not touch the
            // installer until report_result has run.
            error!("previous firmware update did not complete");
            drop(phase);
            self.emit(FirmwareUpdateStatus::Error(FirmwareUpdateError::Unknown));
            return;
        }

        if !file_path.exists() {
            error!(file = %file_path.display(), "firmware file not present at given path");
            drop(phase);
            self.emit(FirmwareUpdateStatus::Error(FirmwareUpdateError::UnknownFile));
            return;
        }

        let version = self.handler.get_current_version();
        if let Err(e) = std::fs::write(&self.marker_path, &version) {
            error!(error = %e, "failed to persist install marker");
            drop(phase);
            self.emit(FirmwareUpdateStatus::Error(FirmwareUpdateError::Unknown));
            return;
        }

        *phase = Phase::Installing;
        drop(phase);

        info!(
            file = %file_path.display(),
            version = %version,
            "beginning firmware installation"
        );
        self.emit(FirmwareUpdateStatus::Installing);

        // May never return (process/device restart).
        self.handler.install_firmware(file_path);
    }

    /// Handles an abort command. Effective only while installing.
    pub fn handle_abort(&self) {
        let mut phase = self.phase.lock().unwrap();
        if *phase == Phase::Idle {
            return;
        }
        info!("aborting firmware installation");
        *phase = Phase::Idle;
        drop(phase);

        self.emit(FirmwareUpdateStatus::Aborted);
        if self.marker_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.marker_path) {
                warn!(error = %e, "failed to remove install marker");
            }
        }
    }

    /// Resolves the outcome of a possibly-restarted installation.
    ///
    /// Intended to run once at process start, before any new install can
    /// be requested. Does nothing when no install was pending.
    pub fn report_result(&self) {
        debug!("reporting firmware update result");

        if !self.marker_path.exists() {
            debug!("no stored firmware version found");
            return;
        }

        let stored = match std::fs::read_to_string(&self.marker_path) {
            Ok(contents) => contents,
            Err(e) => {
                error!(error = %e, "failed to read install marker");
                self.remove_marker();
                self.emit(FirmwareUpdateStatus::Error(FirmwareUpdateError::Unknown));
                return;
            }
        };

        let current = self.handler.get_current_version();
        let status = if stored.trim() == current {
            warn!(version = %current, "firmware version unchanged, installation failed");
            FirmwareUpdateStatus::Error(FirmwareUpdateError::InstallationFailed)
        } else {
            info!(from = %stored.trim(), to = %current, "firmware version changed");
            FirmwareUpdateStatus::Success
        };

        self.remove_marker();
        *self.phase.lock().unwrap() = Phase::Idle;
        self.emit(status);
    }

    fn remove_marker(&self) {
        if let Err(e) = std::fs::remove_file(&self.marker_path) {
            warn!(error = %e, "failed to remove install marker");
        }
    }

    fn emit(&self, status: FirmwareUpdateStatus) {
        (self.on_status)(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct TestHandler {
        version: Mutex<String>,
        installs: AtomicUsize,
    }

    impl TestHandler {
        fn new(version: &str) -> Arc<Self> {
            Arc::new(Self {
                version: Mutex::new(version.to_string()),
                installs: AtomicUsize::new(0),
            })
        }

        fn set_version(&self, version: &str) {
            *self.version.lock().unwrap() = version.to_string();
        }
    }

    impl FirmwareHandler for Arc<TestHandler> {
        fn install_firmware(&self, _file_path: &Path) {
            self.installs.fetch_add(1, Ordering::SeqCst);
        }

        fn get_current_version(&self) -> String {
            self.version.lock().unwrap().clone()
        }
    }

    type Reports = Arc<Mutex<Vec<FirmwareUpdateStatus>>>;

    fn make_installer(
        handler: Arc<TestHandler>,
        dir: &Path,
    ) -> (Reports, FirmwareInstaller) {
        let reports: Reports = Arc::default();
        let log = Arc::clone(&reports);
        let installer = FirmwareInstaller::new(
            Box::new(handler),
            dir,
            Box::new(move |status| log.lock().unwrap().push(status)),
        );
        (reports, installer)
    }

    fn firmware_file(dir: &Path) -> PathBuf {
        let path = dir.join("fw.bin");
        std::fs::write(&path, b"image").unwrap();
        path
    }

    #[test]
    fn install_writes_marker_and_invokes_handler() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = TestHandler::new("1.0");
        let (reports, installer) = make_installer(Arc::clone(&handler), tmp.path());
        let fw = firmware_file(tmp.path());

        installer.handle_install(&fw);

        assert_eq!(*reports.lock().unwrap(), vec![FirmwareUpdateStatus::Installing]);
        assert_eq!(handler.installs.load(Ordering::SeqCst), 1);
        let marker = tmp.path().join(MARKER_FILE_NAME);
        assert_eq!(std::fs::read_to_string(marker).unwrap(), "1.0");
    }

    #[test]
    fn install_rejected_when_marker_exists() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MARKER_FILE_NAME), "1.0").unwrap();
        let handler = TestHandler::new("1.0");
        let (reports, installer) = make_installer(Arc::clone(&handler), tmp.path());
        let fw = firmware_file(tmp.path());

        installer.handle_install(&fw);

        assert_eq!(
            *reports.lock().unwrap(),
            vec![FirmwareUpdateStatus::Error(FirmwareUpdateError::Unknown)]
        );
        // The installer must never be touched.
        assert_eq!(handler.installs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn install_rejected_for_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = TestHandler::new("1.0");
        let (reports, installer) = make_installer(Arc::clone(&handler), tmp.path());

        installer.handle_install(&tmp.path().join("nonexistent.bin"));

        assert_eq!(
            *reports.lock().unwrap(),
            vec![FirmwareUpdateStatus::Error(FirmwareUpdateError::UnknownFile)]
        );
        assert_eq!(handler.installs.load(Ordering::SeqCst), 0);
        assert!(!tmp.path().join(MARKER_FILE_NAME).exists());
    }

    #[test]
    fn second_install_ignored_while_installing() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = TestHandler::new("1.0");
        let (reports, installer) = make_installer(Arc::clone(&handler), tmp.path());
        let fw = firmware_file(tmp.path());

        installer.handle_install(&fw);
        installer.handle_install(&fw);

        assert_eq!(*reports.lock().unwrap(), vec![FirmwareUpdateStatus::Installing]);
        assert_eq!(handler.installs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_deletes_marker_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = TestHandler::new("1.0");
        let (reports, installer) = make_installer(Arc::clone(&handler), tmp.path());
        let fw = firmware_file(tmp.path());

        installer.handle_install(&fw);
        installer.handle_abort();

        assert_eq!(
            *reports.lock().unwrap(),
            vec![FirmwareUpdateStatus::Installing, FirmwareUpdateStatus::Aborted]
        );
        assert!(!tmp.path().join(MARKER_FILE_NAME).exists());

        // Abort while idle is a no-op.
        installer.handle_abort();
        assert_eq!(reports.lock().unwrap().len(), 2);
    }

    #[test]
    fn report_result_without_marker_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = TestHandler::new("1.0");
        let (reports, installer) = make_installer(handler, tmp.path());

        installer.report_result();
        assert!(reports.lock().unwrap().is_empty());
    }

    #[test]
    fn unchanged_version_reports_installation_failed() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MARKER_FILE_NAME), "1.0").unwrap();
        let handler = TestHandler::new("1.0");
        let (reports, installer) = make_installer(handler, tmp.path());

        installer.report_result();

        assert_eq!(
            *reports.lock().unwrap(),
            vec![FirmwareUpdateStatus::Error(
                FirmwareUpdateError::InstallationFailed
            )]
        );
        assert!(!tmp.path().join(MARKER_FILE_NAME).exists());
    }

    #[test]
    fn changed_version_reports_success() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MARKER_FILE_NAME), "1.0").unwrap();
        let handler = TestHandler::new("2.0");
        let (reports, installer) = make_installer(handler, tmp.path());

        installer.report_result();

        assert_eq!(*reports.lock().unwrap(), vec![FirmwareUpdateStatus::Success]);
        assert!(!tmp.path().join(MARKER_FILE_NAME).exists());
    }

    #[test]
    fn full_cycle_across_simulated_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = TestHandler::new("1.0");
        let (_reports, installer) = make_installer(Arc::clone(&handler), tmp.path());
        let fw = firmware_file(tmp.path());

        installer.handle_install(&fw);
        assert!(tmp.path().join(MARKER_FILE_NAME).exists());

        // "Restart": a fresh installer over the same state directory, with
        // the handler now reporting the new version.
        handler.set_version("2.0");
        let (reports2, installer2) = make_installer(Arc::clone(&handler), tmp.path());
        installer2.report_result();

        assert_eq!(*reports2.lock().unwrap(), vec![FirmwareUpdateStatus::Success]);
        assert!(!tmp.path().join(MARKER_FILE_NAME).exists());

        // A new install is accepted after resolution.
        installer2.handle_install(&fw);
        assert_eq!(
            reports2.lock().unwrap().last(),
            Some(&FirmwareUpdateStatus::Installing)
        );
    }
}
