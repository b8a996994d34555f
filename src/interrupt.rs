use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Notify;

/// Cooperative cancellation shared between the Ctrl-C listener and the job
/// runner. The listener only flips the flag; the runner does the rest.
#[derive(Debug, Default)]
pub struct Interrupt {
    interrupted: AtomicBool,
    wakeup: Notify,
}

impl Interrupt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trigger(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger` has been called, immediately if it already was.
    pub async fn triggered(&self) {
        loop {
            let notified = self.wakeup.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    pub fn listen_for_ctrl_c(self: &Arc<Self>) {
        let interrupt = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    debug!("interrupt received");
                    interrupt.trigger();
                }
                Err(err) => warn!("unable to listen for Ctrl-C: {err}"),
            }
        });
    }
}
