//! Shutdown signal handling.
//!
//! Latches the first OS signal, broadcasts it to interested tasks, and
//! swallows duplicates so the liquidation pass runs exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Emergency shutdown triggered by a critical internal error
    Emergency,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Emergency => write!(f, "emergency"),
        }
    }
}

/// Shutdown coordinator shared between the run loop and signal handlers
pub struct ShutdownController {
    requested: AtomicBool,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (signal_tx, _) = broadcast::channel(8);
        Self {
            requested: AtomicBool::new(false),
            signal_tx,
        }
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown; duplicate requests are ignored
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers that route into the controller
pub async fn install_signal_handlers(controller: Arc<ShutdownController>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let on_sigterm = controller.clone();
        let on_sigint = controller.clone();

        tokio::spawn(async move {
            let mut stream = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    return;
                }
            };
            stream.recv().await;
            info!("Received SIGTERM");
            on_sigterm.request_shutdown(ShutdownSignal::Graceful);
        });

        tokio::spawn(async move {
            let mut stream = match signal(SignalKind::interrupt()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install SIGINT handler: {}", e);
                    return;
                }
            };
            stream.recv().await;
            info!("Received SIGINT");
            on_sigint.request_shutdown(ShutdownSignal::Graceful);
        });
    }

    #[cfg(windows)]
    {
        let on_ctrl_c = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                on_ctrl_c.request_shutdown(ShutdownSignal::Graceful);
            }
        });
    }
}
