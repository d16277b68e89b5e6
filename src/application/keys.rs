//! Contains definitions for Redis keys, prefixes and channels used throughout the crate.
//!
//! This layout is shared state: every process pointed at the same Redis observes the same
//! keys, so changing anything here is a wire-format break.

/// Prefix used for job record keys in Redis. A job with the ID 123 is stored under the
/// hash key "qube:queue:job:123".
pub const JOB_PREFIX: &str = "qube:queue:job:";

/// Redis key for the job ID counter, INCR'd by the enqueue script to allocate unique IDs.
pub const JOB_ID_KEY: &str = "qube:queue:job:id";

/// Redis hash holding one record per live group worker across all nodes. Field names are
/// built by [`consumer_key`], values are JSON [`crate::models::ConsumerInfo`] records.
pub const ACTIVE_CONSUMERS_KEY: &str = "activeGroupConsumers";

/// Pub/sub channel notified after every enqueue, payload is a JSON
/// [`crate::models::NewJobMessage`].
pub const NEW_JOB_CHANNEL: &str = "QUEUE:NEWJOB";

/// Redis key for a job record from a job ID.
pub fn job_key(job_id: u64) -> String {
    format!("{}{}", JOB_PREFIX, job_id)
}

/// Redis key for the set of group keys known to a queue.
pub fn groups_key(queue: &str) -> String {
    format!("qube:{}:groups", queue)
}

/// Redis key for the FIFO list of job IDs awaiting processing in a group.
pub fn group_key(queue: &str, group: &str) -> String {
    format!("qube:{}:group:{}", queue, group)
}

/// Field name for a worker's record in the active consumers hash.
pub fn consumer_key(queue: &str, group: &str, worker_id: &str) -> String {
    format!("qube:{}:{}:{}", queue, group, worker_id)
}

/// Field name prefix shared by all of a group's records in the active consumers hash.
pub fn consumer_prefix(queue: &str, group: &str) -> String {
    format!("qube:{}:{}:", queue, group)
}

/// Extract the plain group name from a member of a queue's groups set.
///
/// Members are full group keys ("qube:{queue}:group:{group}"); anything that doesn't
/// carry the expected prefix is returned as-is.
pub fn group_name_from_key<'a>(queue: &str, key: &'a str) -> &'a str {
    let prefix = format!("qube:{}:group:", queue);
    key.strip_prefix(prefix.as_str()).unwrap_or(key)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(job_key(42), "qube:queue:job:42");
        assert_eq!(groups_key("CHANNEL"), "qube:CHANNEL:groups");
        assert_eq!(
            group_key("CHANNEL", "573205104418"),
            "qube:CHANNEL:group:573205104418"
        );
        assert_eq!(
            consumer_key("CHANNEL", "573205104418", "w1"),
            "qube:CHANNEL:573205104418:w1"
        );
        assert_eq!(
            consumer_prefix("CHANNEL", "573205104418"),
            "qube:CHANNEL:573205104418:"
        );
    }

    #[test]
    fn group_name_normalisation() {
        assert_eq!(
            group_name_from_key("CHANNEL", "qube:CHANNEL:group:573205104418"),
            "573205104418"
        );
        // plain names pass through untouched
        assert_eq!(group_name_from_key("CHANNEL", "573205104418"), "573205104418");
        // prefix for a different queue isn't stripped
        assert_eq!(
            group_name_from_key("OTHER", "qube:CHANNEL:group:g1"),
            "qube:CHANNEL:group:g1"
        );
    }

    #[test]
    fn consumer_key_has_group_prefix() {
        let key = consumer_key("Q", "G", "worker");
        assert!(key.starts_with(&consumer_prefix("Q", "G")));
    }
}
