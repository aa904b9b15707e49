//! Interrupt handling for runs
//!
//! An interrupt stops the dispatch of new packages. Packages already in
//! flight stop at their next phase boundary and stay pending in the run
//! state, so a later resume restarts them from scratch.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{BuildError, Result};

/// What interrupted a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Ctrl-C
    Sigint,
    Sigterm,
    /// Requested programmatically
    Requested,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::Sigint => write!(f, "SIGINT"),
            Interrupt::Sigterm => write!(f, "SIGTERM"),
            Interrupt::Requested => write!(f, "interrupt request"),
        }
    }
}

/// Shared interrupt state of one orchestrator
///
/// The flag is polled at phase and batch boundaries; the watch channel
/// lets callers await the first interrupt.
pub struct ShutdownManager {
    flag: Arc<AtomicBool>,
    count: AtomicUsize,
    first: watch::Sender<Option<Interrupt>>,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (first, _) = watch::channel(None);
        Self { flag: Arc::new(AtomicBool::new(false)), count: AtomicUsize::new(0), first }
    }

    /// The flag handed to the phase engine and schedulers
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// The first interrupt received, if any
    pub fn interrupted_by(&self) -> Option<Interrupt> {
        *self.first.borrow()
    }

    /// Wait until the run is interrupted
    pub async fn wait(&self) -> Interrupt {
        let mut receiver = self.first.subscribe();
        loop {
            if let Some(interrupt) = *receiver.borrow_and_update() {
                return interrupt;
            }
            if receiver.changed().await.is_err() {
                return Interrupt::Requested;
            }
        }
    }

    /// Record an interrupt and raise the flag
    pub fn interrupt(&self, interrupt: Interrupt) {
        let seen = self.count.fetch_add(1, Ordering::AcqRel);
        self.flag.store(true, Ordering::Release);
        if seen == 0 {
            info!("Received {}: no new packages will start", interrupt);
            self.first.send_replace(Some(interrupt));
        } else {
            warn!("Received {} again: waiting for in-flight packages to reach a phase boundary", interrupt);
        }
    }
}

/// Route SIGINT and SIGTERM into `manager`
pub async fn setup_signal_handlers(manager: Arc<ShutdownManager>) -> Result<()> {
    let ctrl_c_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        loop {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            ctrl_c_manager.interrupt(Interrupt::Sigint);
        }
    });

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let sigterm_manager = Arc::clone(&manager);
        tokio::spawn(async move {
            while sigterm.recv().await.is_some() {
                sigterm_manager.interrupt(Interrupt::Sigterm);
            }
        });
    }

    debug!("Signal handlers installed");
    Ok(())
}

/// Fail with `ShutdownInProgress` once the run was interrupted
pub fn check_shutdown(shutdown_signal: &AtomicBool) -> Result<()> {
    if shutdown_signal.load(Ordering::Acquire) {
        return Err(BuildError::ShutdownInProgress);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn test_first_interrupt_wins() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown_requested());
        assert_eq!(manager.interrupted_by(), None);

        manager.interrupt(Interrupt::Sigterm);
        manager.interrupt(Interrupt::Sigint);

        assert!(manager.is_shutdown_requested());
        assert!(manager.shutdown_signal().load(Ordering::Acquire));
        assert_eq!(manager.interrupted_by(), Some(Interrupt::Sigterm));
    }

    #[tokio::test]
    async fn test_wait_returns_after_interrupt() {
        let manager = Arc::new(ShutdownManager::new());
        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait().await })
        };

        manager.interrupt(Interrupt::Requested);

        let interrupt = timeout(Duration::from_millis(500), waiter).await.unwrap().unwrap();
        assert_eq!(interrupt, Interrupt::Requested);
        assert_eq!(manager.wait().await, Interrupt::Requested);
    }

    #[test]
    fn test_check_shutdown() {
        let signal = AtomicBool::new(false);
        assert!(check_shutdown(&signal).is_ok());

        signal.store(true, Ordering::Release);
        assert!(matches!(check_shutdown(&signal), Err(BuildError::ShutdownInProgress)));
    }
}
