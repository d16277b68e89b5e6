//! Data structures used throughout the crate.

pub mod job;
mod consumer;
mod duration;
mod error;

pub use self::consumer::ConsumerInfo;
pub use self::duration::Duration;
pub use self::error::{QubeError, QubeResult};

use serde::{Deserialize, Serialize};

/// Message published on the new-job channel after every enqueue.
///
/// The camelCase field names are the wire layout shared with other nodes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJobMessage {
    pub queue_name: String,
    pub group_name: String,
}
