//! Defines the job handle passed to processing callbacks.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::manager::Core;
use crate::models::job::{HandlerResult, Payload};
use crate::models::QubeResult;

/// A dequeued job, as seen by a processing callback.
///
/// Carries the payload plus two live handles back into the queue: a progress writer
/// and an early-completion signal.
pub struct Job {
    id: u64,
    data: serde_json::Value,
    group: String,
    core: Arc<Core>,
    done: Completion,
}

impl Job {
    pub(crate) fn new(core: Arc<Core>, payload: Payload, done: Completion) -> Self {
        let (id, data, group) = payload.into_parts();
        Self {
            id,
            data,
            group,
            core,
            done,
        }
    }

    /// The store-assigned job ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The payload passed to `add`, byte-for-byte.
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Name of the group this job belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Write the job's progress field (clamped to 0-100).
    pub async fn progress(&self, value: u8) -> QubeResult<()> {
        self.core.update_progress(self.id, value).await
    }

    /// Signal completion ahead of returning from the callback.
    ///
    /// The first signal wins: once `done` has fired, the callback's eventual return
    /// value (or a second `done`) is ignored.
    pub fn done(&self, result: HandlerResult) {
        self.done.resolve(result);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("data", &self.data)
            .finish()
    }
}

/// Single-shot completion signal; resolves its channel at most once.
pub(crate) struct Completion {
    tx: Mutex<Option<oneshot::Sender<HandlerResult>>>,
}

impl Completion {
    pub(crate) fn new(tx: oneshot::Sender<HandlerResult>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn resolve(&self, result: HandlerResult) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            // receiver may already be gone if the worker lost interest; nothing to do
            let _ = tx.send(result);
        }
    }
}
