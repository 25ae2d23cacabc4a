//! Cooperative abort signal for runs.
//!
//! The loop checks the flag between iterations and races `cancelled()`
//! against in-flight model/tool futures; dropping a tool future kills its
//! `kill_on_drop` subprocess, which is the forcible half of cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot abort signal shared between a run task and its controller.
#[derive(Debug, Default)]
pub struct AbortSignal {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Latch the signal and wake every waiter. Idempotent.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is aborted. Safe to race in `select!`.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so an abort between the check and the
            // await still wakes us.
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}
