use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use log::{debug, info, warn};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Result of checking on the active subprocess
#[derive(Debug)]
pub enum PollOutcome {
    /// Still running; the handle stays registered
    Running,
    /// Exited on its own; the handle has been cleared
    Exited(ExitStatus),
    /// Nothing registered: someone else released it, i.e. an interrupt killed it
    Released,
}

/// Process-wide cancellation flag plus the slot for the one live engine process.
///
/// The slot is only ever emptied under its lock, by either `poll` (normal exit)
/// or `release` (kill). Whichever gets there first owns the `Child`; the other
/// finds the slot empty, so a process is never killed or reaped twice.
#[derive(Debug, Default)]
pub struct CancellationCoordinator {
    cancelled: AtomicBool,
    active: Mutex<Option<Child>>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Child>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `child` the active process. A previous, unreleased handle is killed.
    pub fn register(&self, child: Child) {
        let previous = self.slot().replace(child);
        if let Some(mut stale) = previous {
            warn!("Replacing an engine process that was never released (pid {:?})", stale.id());
            let _ = stale.start_kill();
        }
    }

    pub fn has_active(&self) -> bool {
        self.slot().is_some()
    }

    /// PID of the active process, if one is registered and still known to the OS
    pub fn active_pid(&self) -> Option<u32> {
        self.slot().as_ref().and_then(|child| child.id())
    }

    /// Non-blocking exit check of the active process
    pub fn poll(&self) -> std::io::Result<PollOutcome> {
        let mut slot = self.slot();
        let status = match slot.as_mut() {
            None => return Ok(PollOutcome::Released),
            Some(child) => child.try_wait()?,
        };
        match status {
            Some(status) => {
                slot.take();
                Ok(PollOutcome::Exited(status))
            }
            None => Ok(PollOutcome::Running),
        }
    }

    /// Take the active process out of the slot and send it a kill.
    ///
    /// Returns the child so the caller can reap it; `None` when there was
    /// nothing to release. Safe to call any number of times.
    pub fn release(&self) -> Option<Child> {
        let mut child = self.slot().take()?;
        match child.start_kill() {
            Ok(()) => debug!("Sent kill to engine process {:?}", child.id()),
            Err(e) => warn!("Failed to kill engine process {:?}: {}", child.id(), e),
        }
        Some(child)
    }

    /// The interrupt: raise the flag (it stays raised) and kill whatever is running
    pub fn interrupt(&self) -> Option<Child> {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("Interrupt received, cancelling batch");
        }
        self.release()
    }
}

/// Kill-and-wait for a released child, ignoring errors from an already-dead process
pub async fn reap(mut child: Child) {
    if let Err(e) = child.wait().await {
        debug!("Waiting on killed engine process failed: {}", e);
    }
}

/// Forward Ctrl+C to `coordinator` for the lifetime of the runtime
pub fn listen_for_interrupt(coordinator: Arc<CancellationCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            if let Some(child) = coordinator.interrupt() {
                reap(child).await;
            }
        }
    })
}
