//! Atomic server-side scripts and the registry that loads and runs them.
//!
//! All multi-key mutations of the queue run as Lua scripts so that enqueue/dequeue are
//! single atomic steps on the Redis side (this is what makes per-group FIFO hold across
//! processes). The registry uploads each script once at init, keeps the SHA1 digest next
//! to its source, and calls through EVALSHA. If Redis answers NOSCRIPT (e.g. after a
//! SCRIPT FLUSH or a failover to an empty cache) the affected script is re-uploaded once
//! and the call retried once; any other error surfaces unchanged.

use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, warn};
use redis::aio::ConnectionLike;

use crate::models::{QubeError, QubeResult};

// Atomically allocate a job ID and make the job visible to consumers.
//
// KEYS[1]: queue's groups set ("qube:{queue}:groups")
// KEYS[2]: group list ("qube:{queue}:group:{group}")
// KEYS[3]: job ID counter
// ARGV[1]: payload JSON
// ARGV[2]: plain group name
//
// Returns: the new job ID.
const ENQUEUE_SCRIPT: &str = r#"
local id = redis.call('INCR', KEYS[3])
local job_key = 'qube:queue:job:' .. id
redis.call('HSET', job_key, 'status', 'pending', 'progress', 0, 'group', ARGV[2], 'data', ARGV[1])
redis.call('RPUSH', KEYS[2], id)
redis.call('SADD', KEYS[1], KEYS[2])
return id
"#;

// Atomically pop the head of a group and mark the job active.
//
// KEYS[1]: group list ("qube:{queue}:group:{group}")
//
// Returns: {id, payload JSON, group name}, or nil if the group is empty or the popped
// job is not in the pending state (only enqueue ever pushes IDs, so a non-pending head
// means the record was tampered with or deleted; it is dropped rather than re-queued).
const DEQUEUE_SCRIPT: &str = r#"
local id = redis.call('LPOP', KEYS[1])
if not id then
    return nil
end
local job_key = 'qube:queue:job:' .. id
local status = redis.call('HGET', job_key, 'status')
if status ~= 'pending' then
    return nil
end
redis.call('HSET', job_key, 'status', 'active')
local data = redis.call('HGET', job_key, 'data')
local group = redis.call('HGET', job_key, 'group')
return {id, data, group}
"#;

// Apply a status transition if the lifecycle permits it.
//
// KEYS[1]: job record hash ("qube:queue:job:{id}")
// ARGV[1]: requested status
//
// Permitted: pending -> active, active -> completed, active -> failed. Everything else
// (including repeats and unknown jobs) is a no-op returning 0, which is what makes
// double completion harmless.
const UPDATE_STATUS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if current == false then
    return 0
end
local wanted = ARGV[1]
if (current == 'pending' and wanted == 'active')
    or (current == 'active' and (wanted == 'completed' or wanted == 'failed')) then
    redis.call('HSET', KEYS[1], 'status', wanted)
    return 1
end
return 0
"#;

// Read a job's current status.
//
// KEYS[1]: job record hash ("qube:queue:job:{id}")
//
// Returns: the status string, or nil for an unknown job.
const GET_STATUS_SCRIPT: &str = r#"
return redis.call('HGET', KEYS[1], 'status')
"#;

/// The four scripts managed by the registry.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScriptKind {
    Enqueue,
    Dequeue,
    UpdateStatus,
    GetStatus,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 4] = [
        ScriptKind::Enqueue,
        ScriptKind::Dequeue,
        ScriptKind::UpdateStatus,
        ScriptKind::GetStatus,
    ];

    /// The script's Lua source. Kept alongside the cached digest so that reloading
    /// after NOSCRIPT is always possible.
    fn source(&self) -> &'static str {
        match self {
            ScriptKind::Enqueue => ENQUEUE_SCRIPT,
            ScriptKind::Dequeue => DEQUEUE_SCRIPT,
            ScriptKind::UpdateStatus => UPDATE_STATUS_SCRIPT,
            ScriptKind::GetStatus => GET_STATUS_SCRIPT,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ScriptKind::Enqueue => "enqueue",
            ScriptKind::Dequeue => "dequeue",
            ScriptKind::UpdateStatus => "update_status",
            ScriptKind::GetStatus => "get_status",
        }
    }
}

/// Uploads the queue scripts and runs them by cached digest.
pub struct ScriptRegistry {
    digests: Mutex<HashMap<ScriptKind, String>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self {
            digests: Mutex::new(HashMap::new()),
        }
    }

    /// Upload every script and cache its digest. Called once at init.
    pub async fn load_all<C: ConnectionLike + Send>(&self, conn: &mut C) -> QubeResult<()> {
        for kind in ScriptKind::ALL {
            self.load(conn, kind).await?;
        }
        Ok(())
    }

    async fn load<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        kind: ScriptKind,
    ) -> QubeResult<String> {
        let digest: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(kind.source())
            .query_async(conn)
            .await?;
        debug!("loaded {} script as {}", kind.name(), digest);
        self.digests
            .lock()
            .unwrap()
            .insert(kind, digest.clone());
        Ok(digest)
    }

    fn cached_digest(&self, kind: ScriptKind) -> Option<String> {
        self.digests.lock().unwrap().get(&kind).cloned()
    }

    /// Run a script through EVALSHA with the cached digest.
    ///
    /// A NOSCRIPT reply triggers exactly one re-upload and one retry; any other error,
    /// or a second failure, surfaces to the caller.
    pub async fn eval<C, T>(
        &self,
        conn: &mut C,
        kind: ScriptKind,
        keys: &[&str],
        args: &[&str],
    ) -> QubeResult<T>
    where
        C: ConnectionLike + Send,
        T: redis::FromRedisValue,
    {
        let digest = match self.cached_digest(kind) {
            Some(digest) => digest,
            None => self.load(conn, kind).await?,
        };

        match Self::evalsha(conn, &digest, keys, args).await {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == redis::ErrorKind::NoScriptError => {
                warn!("{} script missing from store, reloading", kind.name());
                let digest = self.load(conn, kind).await?;
                Self::evalsha(conn, &digest, keys, args)
                    .await
                    .map_err(QubeError::from)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn evalsha<C, T>(
        conn: &mut C,
        digest: &str,
        keys: &[&str],
        args: &[&str],
    ) -> redis::RedisResult<T>
    where
        C: ConnectionLike + Send,
        T: redis::FromRedisValue,
    {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(digest).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }
        cmd.query_async(conn).await
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
