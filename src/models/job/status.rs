//! Defines structs used to represent the status of a job in Redis.

use std::fmt;
use std::str::FromStr;

use redis::{self, FromRedisValue, ToRedisArgs};
use serde::{Deserialize, Serialize};

const PENDING_STATUS: &str = "pending";
const ACTIVE_STATUS: &str = "active";
const COMPLETED_STATUS: &str = "completed";
const FAILED_STATUS: &str = "failed";

/// Status of a job that exists in Redis.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Job is on its group's list, waiting for a worker to pick it up.
    Pending,

    /// Job has been dequeued and handed to a processing callback.
    Active,

    /// Callback reported that the job completed successfully.
    Completed,

    /// Callback reported an error, raised, or signalled failure via `done`.
    Failed,
}

impl Status {
    /// Whether moving from this status to `next` is a permitted transition.
    ///
    /// The lifecycle is strictly `pending -> active -> {completed, failed}`; everything
    /// else (including repeats) is rejected, which is what makes status updates
    /// idempotent under double completion.
    pub fn can_transition_to(&self, next: &Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Active)
                | (Status::Active, Status::Completed)
                | (Status::Active, Status::Failed)
        )
    }

    /// Whether this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Status {
    fn as_ref(&self) -> &str {
        match self {
            Status::Pending => PENDING_STATUS,
            Status::Active => ACTIVE_STATUS,
            Status::Completed => COMPLETED_STATUS,
            Status::Failed => FAILED_STATUS,
        }
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Status, ()> {
        match s {
            PENDING_STATUS => Ok(Status::Pending),
            ACTIVE_STATUS => Ok(Status::Active),
            COMPLETED_STATUS => Ok(Status::Completed),
            FAILED_STATUS => Ok(Status::Failed),
            _ => Err(()),
        }
    }
}

impl ToRedisArgs for Status {
    fn write_redis_args<W: ?Sized + redis::RedisWrite>(&self, out: &mut W) {
        self.as_ref().write_redis_args(out)
    }
}

impl FromRedisValue for Status {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        let s = String::from_redis_value(v)?;
        Status::from_str(&s).map_err(|_| (redis::ErrorKind::TypeError, "Invalid job status").into())
    }
}
