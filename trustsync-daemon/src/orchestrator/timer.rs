//! Single-shot step timer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{post, Event};

/// One pending timeout at a time.
///
/// Every arm gets a new sequence number. A firing is only honoured if its
/// sequence is still current, which covers the window where the sleep task
/// has already queued its event when it is cancelled.
#[derive(Default)]
pub(crate) struct StepTimer {
    seq: u64,
    task: Option<JoinHandle<()>>,
}

impl StepTimer {
    /// Arm the timer, replacing any pending one.
    pub fn arm(&mut self, after: Duration, tx: mpsc::WeakUnboundedSender<Event>) {
        self.cancel();
        let seq = self.seq;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            post(&tx, Event::TimerFired { seq });
        }));
    }

    /// Cancel the pending timer, if any.
    pub fn cancel(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Consume a firing. Returns true if it belongs to the armed timer.
    pub fn take_fired(&mut self, seq: u64) -> bool {
        if self.task.is_some() && seq == self.seq {
            self.cancel();
            true
        } else {
            false
        }
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
