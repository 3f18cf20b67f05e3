//! Background memory persistence.
//!
//! Generation calls do not talk to the memory service's add endpoint
//! themselves. They hand a job to a single worker task through a bounded
//! channel and return without waiting for it. The worker runs jobs one at a
//! time, in submission order, and logs failures instead of propagating them.
//!
//! Scheduling never waits: when the queue is full the job is dropped and
//! logged, so a slow memory service cannot add latency to generation.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CallSite, MemoryScope, MemoryStore};
use crate::prompt::Message;

/// What happened to a memory update when it was handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MemoryUpdate {
    /// Queued; the worker stores it after the call returns.
    Scheduled,
    /// Not queued: the queue was full or the worker had stopped.
    Dropped,
}

#[derive(Debug)]
struct UpdateJob {
    request_id: String,
    messages: Vec<Message>,
    scope: MemoryScope,
}

/// Submits jobs to the [`PersistenceWorker`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<UpdateJob>,
}

impl PersistenceHandle {
    /// Queue a job without waiting for it or for queue capacity.
    pub fn schedule(
        &self,
        request_id: &str,
        messages: Vec<Message>,
        scope: MemoryScope,
    ) -> MemoryUpdate {
        let job = UpdateJob {
            request_id: request_id.to_string(),
            messages,
            scope,
        };
        match self.tx.try_send(job) {
            Ok(()) => {
                debug!(request_id = %request_id, queued = self.queued(), "Memory update queued");
                MemoryUpdate::Scheduled
            }
            Err(TrySendError::Full(job)) => {
                warn!(
                    request_id = %job.request_id,
                    capacity = self.tx.max_capacity(),
                    "Persistence queue full, memory update dropped"
                );
                MemoryUpdate::Dropped
            }
            Err(TrySendError::Closed(job)) => {
                warn!(request_id = %job.request_id, "Persistence worker stopped, memory update dropped");
                MemoryUpdate::Dropped
            }
        }
    }

    /// Jobs waiting in the queue, not counting one the worker is running.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// The task that drains the persistence queue.
#[derive(Debug)]
pub struct PersistenceWorker {
    task: JoinHandle<()>,
}

impl PersistenceWorker {
    /// Start the worker on the current Tokio runtime.
    pub fn spawn(store: Arc<dyn MemoryStore>, capacity: usize) -> (PersistenceHandle, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(store, rx));
        (PersistenceHandle { tx }, Self { task })
    }

    /// Wait for the queue to drain.
    ///
    /// Returns once every [`PersistenceHandle`] has been dropped and all
    /// queued jobs have run.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Persistence worker ended abnormally");
        }
    }
}

async fn run(store: Arc<dyn MemoryStore>, mut rx: mpsc::Receiver<UpdateJob>) {
    debug!("Persistence worker started");
    while let Some(job) = rx.recv().await {
        match store.add(&job.messages, &job.scope).await {
            Ok(_) => debug!(request_id = %job.request_id, "Memory update stored"),
            Err(e) => {
                warn!(request_id = %job.request_id, "Memory update failed");
                CallSite::BackgroundAdd.report(&e);
            }
        }
    }
    info!("Persistence worker stopped");
}
