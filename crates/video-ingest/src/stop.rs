//! Cooperative stop signal shared between pipeline threads.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

/// One-shot stop flag. Triggering it also disconnects an internal channel so
/// threads parked in [`StopSignal::wait_timeout`] wake immediately.
pub struct StopSignal {
    stopped: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    waiter: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            stopped: AtomicBool::new(false),
            trigger: Mutex::new(Some(tx)),
            waiter: rx,
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let sender = match self.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`. Returns `true` if the signal fired meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.waiter.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Ok(()) | Err(RecvTimeoutError::Timeout) => self.is_stopped(),
        }
    }

    /// Receiver that disconnects when the signal fires, for use in `select!`.
    pub fn receiver(&self) -> Receiver<()> {
        self.waiter.clone()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
