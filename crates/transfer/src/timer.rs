//! One-shot request timeout.
//!
//! Dropping the handle cancels the timer: the timer thread waits on a
//! channel whose sender lives in the handle, so a drop disconnects the
//! channel and the thread exits without firing. The session additionally
//! guards every fire with a generation check, so a timer that already woke
//! up and is waiting on the session lock becomes a no-op once the session
//! has moved on.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use tracing::debug;

pub(crate) struct RequestTimer {
    _cancel: mpsc::Sender<()>,
}

impl RequestTimer {
    /// Arms a timer that runs `on_fire` after `timeout` unless the
    /// returned handle is dropped first.
    pub(crate) fn arm<F>(timeout: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("request-timeout".into())
            .spawn(move || {
                if rx.recv_timeout(timeout) == Err(RecvTimeoutError::Timeout) {
                    on_fire();
                }
            });
        if spawned.is_err() {
            debug!("failed to spawn timeout thread; transfer will not time out");
        }
        Self { _cancel: tx }
    }
}
