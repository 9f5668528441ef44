use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::models::PipelineSettings;

/// Errors that can end an install-confirmation wait
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("install confirmation not received within {0:?}")]
    TimedOut(Duration),

    #[error("install wait cancelled")]
    Cancelled,
}

/// Install-completion synchronizer
///
/// On platforms where package installation completes asynchronously, the
/// build worker suspends on [`wait`](Self::wait) until the external
/// completion handler calls [`confirm`](Self::confirm). Interest is
/// registered around batches that need it so stray platform signals outside
/// a batch are ignored.
///
/// Confirmation is delivered over a watch channel; the poll interval only
/// drives a periodic fallback re-check of the confirmed flag so a
/// confirmation racing [`begin_wait`](Self::begin_wait) is never lost.
pub struct InstallSync {
    registered: AtomicBool,

    /// Latest-value channel carrying the confirmed flag
    confirmed_tx: watch::Sender<bool>,

    wait_timeout: Duration,
    poll_interval: Duration,
}

impl InstallSync {
    pub fn new(wait_timeout: Duration, poll_interval: Duration) -> Self {
        let (confirmed_tx, _) = watch::channel(false);
        Self {
            registered: AtomicBool::new(false),
            confirmed_tx,
            wait_timeout,
            poll_interval,
        }
    }

    /// Construct from the configured timing knobs
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.install_wait_timeout(),
            settings.install_poll_interval(),
        )
    }

    /// Register interest in install-completion signals for the coming batch
    pub fn register(&self) {
        self.registered.store(true, Ordering::SeqCst);
        self.confirmed_tx.send_replace(false);
        tracing::debug!("install-completion listener registered");
    }

    /// Drop interest once the batch (including any deferred drain) is done
    pub fn unregister(&self) {
        self.registered.store(false, Ordering::SeqCst);
        tracing::debug!("install-completion listener unregistered");
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Arm the synchronizer for one install
    ///
    /// Must be called before the operation whose completion will be awaited
    /// is started, so a fast confirmation cannot slip through.
    pub fn begin_wait(&self) {
        self.confirmed_tx.send_replace(false);
    }

    /// Deliver an install-completion signal
    ///
    /// Called by the external platform handler. Ignored unless interest is
    /// registered. `send_replace` stores the flag even while no wait is
    /// subscribed yet, so a confirmation racing the build is retained.
    pub fn confirm(&self) {
        if !self.is_registered() {
            tracing::debug!("install confirmation received outside a batch, ignoring");
            return;
        }
        self.confirmed_tx.send_replace(true);
    }

    /// Suspend until the pending install is confirmed
    ///
    /// Resolves when [`confirm`](Self::confirm) fires, errors on timeout or
    /// when the cancellation token flips.
    pub async fn wait(&self, cancel: &mut watch::Receiver<bool>) -> Result<(), SyncError> {
        let mut confirmed_rx = self.confirmed_tx.subscribe();

        let wait = async {
            loop {
                if *confirmed_rx.borrow() {
                    return Ok(());
                }
                tokio::select! {
                    changed = confirmed_rx.changed() => {
                        if changed.is_err() {
                            // Sender lives as long as self; treat closure as cancellation
                            return Err(SyncError::Cancelled);
                        }
                    }
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return Err(SyncError::Cancelled);
                        }
                    }
                    // Fallback re-check in case a confirmation raced registration
                    _ = sleep(self.poll_interval) => {}
                }
            }
        };

        match timeout(self.wait_timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.wait_timeout, "install confirmation timed out");
                Err(SyncError::TimedOut(self.wait_timeout))
            }
        }
    }
}
