//! Defines the consumer record shared between nodes via the `activeGroupConsumers` hash.

use serde::{Deserialize, Serialize};

/// Record advertising a live group worker to every participating process.
///
/// Stored as a JSON hash field keyed by `qube:{queue}:{group}:{workerId}`. The camelCase
/// field names are part of the wire layout other nodes observe; don't rename them.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    /// Instance ID of the process that spawned this worker.
    pub owner: String,

    /// Random per-worker identifier, also the last segment of the record's field name.
    pub worker_id: String,

    /// Cooperative stop flag; the worker checks this on every empty dequeue.
    pub should_stop: bool,
}

impl ConsumerInfo {
    pub fn new<S: Into<String>>(owner: S, worker_id: S) -> Self {
        Self {
            owner: owner.into(),
            worker_id: worker_id.into(),
            should_stop: false,
        }
    }
}
