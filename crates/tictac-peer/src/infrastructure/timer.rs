//! Start-delay timers.
//!
//! [`TokioStartScheduler`] sleeps on the tokio runtime and posts a
//! [`StartTimerFired`] back to the runtime actor.  [`ManualStartScheduler`]
//! only records requests; tests fire them explicitly.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::application::ports::StartScheduler;

/// Posted when a start delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTimerFired {
    pub epoch: u64,
}

/// Production scheduler: one `tokio::time::sleep` task per request.
///
/// Must be used from within a tokio runtime.
pub struct TokioStartScheduler {
    fired: mpsc::UnboundedSender<StartTimerFired>,
}

impl TokioStartScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StartTimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { fired: tx }, rx)
    }
}

impl StartScheduler for TokioStartScheduler {
    fn schedule_start(&self, epoch: u64, delay: Duration) {
        let fired = self.fired.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired.send(StartTimerFired { epoch }).is_err() {
                trace!(epoch, "start timer fired after runtime stopped");
            }
        });
    }
}

/// Records start requests until a test takes them.
#[derive(Debug, Default)]
pub struct ManualStartScheduler {
    pending: Mutex<Vec<(u64, Duration)>>,
}

impl ManualStartScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every `(epoch, delay)` requested so far.
    pub fn take_pending(&self) -> Vec<(u64, Duration)> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl StartScheduler for ManualStartScheduler {
    fn schedule_start(&self, epoch: u64, delay: Duration) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((epoch, delay));
    }
}
