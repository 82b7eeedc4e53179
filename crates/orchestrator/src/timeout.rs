//! Step deadline supervision.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::SagaId;
use saga_store::StepName;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Raised when no reply arrived for a dispatched command within its
/// deadline. Consumed by the engine's run loop exactly like a failure reply.
#[derive(Debug, Clone)]
pub struct TimeoutNotice {
    pub saga_id: SagaId,
    pub step: StepName,
    /// The deadline that elapsed.
    pub after: Duration,
}

/// Tracks one deadline per outstanding `(saga, step)` command.
///
/// `schedule` spawns a deadline task; `cancel` aborts it when the reply is
/// recorded. A notice for a deadline that raced a reply is rendered
/// harmless by the state machine's discard rule.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    deadline: Duration,
    tx: mpsc::UnboundedSender<TimeoutNotice>,
    pending: Arc<Mutex<HashMap<(SagaId, StepName), AbortHandle>>>,
}

impl TimeoutSupervisor {
    /// Creates a supervisor and the notice stream its deadlines feed.
    pub fn new(deadline: Duration) -> (Self, mpsc::UnboundedReceiver<TimeoutNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                deadline,
                tx,
                pending: Arc::new(Mutex::new(HashMap::new())),
            },
            rx,
        )
    }

    /// The configured step deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Schedules the deadline for a dispatched command, replacing any
    /// deadline already pending for the same key.
    pub fn schedule(&self, saga_id: SagaId, step: StepName) {
        let deadline = self.deadline;
        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            pending.lock().unwrap().remove(&(saga_id, step));
            // Receiver gone means the engine stopped; nothing to raise.
            let _ = tx.send(TimeoutNotice {
                saga_id,
                step,
                after: deadline,
            });
        });

        if let Some(previous) = self
            .pending
            .lock()
            .unwrap()
            .insert((saga_id, step), handle.abort_handle())
        {
            previous.abort();
        }
    }

    /// Cancels the pending deadline for a key, if any.
    pub fn cancel(&self, saga_id: SagaId, step: StepName) {
        if let Some(handle) = self.pending.lock().unwrap().remove(&(saga_id, step)) {
            handle.abort();
        }
    }

    /// Number of deadlines currently pending.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
