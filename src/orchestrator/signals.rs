//! Signal handling via a shared abort flag.
//!
//! The listener is a minimal writer: it sets one write-once boolean and
//! logs. The driver polls the flag at every re-entry point and performs
//! the actual unwinding, so no state mutation happens in signal context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

/// Write-once, read-many abort request shared between the signal
/// listener and the driver.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spawn the INT/TERM listener. The returned handle is aborted in the
/// task's guaranteed-exit scope.
#[must_use]
pub fn install(flag: AbortFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut interrupt = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = interrupt.recv() => warn!("SIGINT received, requesting abort"),
                _ = terminate.recv() => warn!("SIGTERM received, requesting abort"),
            }
            flag.request();
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("ctrl-c received, requesting abort");
                flag.request();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear_and_latches() {
        let flag = AbortFlag::new();
        assert!(!flag.is_requested());
        flag.request();
        assert!(flag.is_requested());
        // Clones observe the same flag.
        let clone = flag.clone();
        assert!(clone.is_requested());
    }
}
