// src/engine/watchdog.rs
//
// Processing deadline. Native codec calls cannot be interrupted, so a
// pipeline that overruns is presumed wedged and the process is aborted:
// the worker's thread-local codec state can no longer be trusted.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

/// Fires its action unless dropped before the deadline.
pub struct Watchdog {
    // Dropping the sender wakes the timer thread with `Disconnected`.
    disarm: Option<Sender<()>>,
    timer: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    /// Abort the process if not dropped within `deadline`.
    pub fn arm(label: impl Into<String>, deadline: Duration) -> Self {
        let label = label.into();
        let message = label.clone();
        Self::with_action(label, deadline, move || {
            error!(
                "{message}: processing exceeded {deadline:?}, codec presumed wedged; aborting"
            );
            std::process::abort();
        })
    }

    /// Run `action` on the timer thread if not dropped within `deadline`.
    pub fn with_action<F>(label: impl Into<String>, deadline: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = bounded::<()>(0);
        let spawned = thread::Builder::new()
            .name(format!("watchdog-{label}"))
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(deadline) {
                    action();
                }
            });

        match spawned {
            Ok(timer) => Self {
                disarm: Some(tx),
                timer: Some(timer),
            },
            Err(e) => {
                warn!("{label}: could not start watchdog thread, running unguarded: {e}");
                Self {
                    disarm: None,
                    timer: None,
                }
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm.take();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}
