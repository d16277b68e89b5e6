//! Shared registry of live group workers.
//!
//! Every spawned worker is advertised to all nodes through a single Redis hash; the
//! per-group record count is the authoritative admission counter for consumer quotas.
//! All operations are single-key hash commands, so they're atomic without scripting.

use log::debug;
use redis::aio::ConnectionLike;
use redis::AsyncCommands;

use super::keys;
use crate::models::{ConsumerInfo, QubeResult};

/// Operations on the `activeGroupConsumers` hash.
pub struct ConsumerRegistry;

impl ConsumerRegistry {
    /// Upsert a worker's record.
    pub async fn add<C: ConnectionLike + Send>(
        conn: &mut C,
        queue: &str,
        group: &str,
        worker_id: &str,
        info: &ConsumerInfo,
    ) -> QubeResult<()> {
        let field = keys::consumer_key(queue, group, worker_id);
        let value = serde_json::to_string(info)?;
        let _: () = conn
            .hset(keys::ACTIVE_CONSUMERS_KEY, &field, value)
            .await?;
        debug!("[{}] consumer registered", field);
        Ok(())
    }

    /// Read a worker's record, if present.
    pub async fn get<C: ConnectionLike + Send>(
        conn: &mut C,
        queue: &str,
        group: &str,
        worker_id: &str,
    ) -> QubeResult<Option<ConsumerInfo>> {
        let field = keys::consumer_key(queue, group, worker_id);
        let raw: Option<String> = conn.hget(keys::ACTIVE_CONSUMERS_KEY, &field).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Remove a worker's record.
    pub async fn delete<C: ConnectionLike + Send>(
        conn: &mut C,
        queue: &str,
        group: &str,
        worker_id: &str,
    ) -> QubeResult<()> {
        let field = keys::consumer_key(queue, group, worker_id);
        let _: () = conn.hdel(keys::ACTIVE_CONSUMERS_KEY, &field).await?;
        debug!("[{}] consumer deregistered", field);
        Ok(())
    }

    /// Count records for a (queue, group) across all nodes.
    ///
    /// Stale records from crashed nodes are counted too; cleaning those up is the job
    /// of an external reaper, not this crate.
    pub async fn count_for_group<C: ConnectionLike + Send>(
        conn: &mut C,
        queue: &str,
        group: &str,
    ) -> QubeResult<usize> {
        let prefix = keys::consumer_prefix(queue, group);
        let fields: Vec<String> = conn.hkeys(keys::ACTIVE_CONSUMERS_KEY).await?;
        Ok(fields.iter().filter(|f| f.starts_with(&prefix)).count())
    }

    /// Flag a worker for cooperative shutdown.
    ///
    /// Re-reads the record first; returns false without writing if the record is gone
    /// or already flagged.
    pub async fn flag_stop<C: ConnectionLike + Send>(
        conn: &mut C,
        queue: &str,
        group: &str,
        worker_id: &str,
    ) -> QubeResult<bool> {
        match Self::get(conn, queue, group, worker_id).await? {
            Some(mut info) if !info.should_stop => {
                info.should_stop = true;
                Self::add(conn, queue, group, worker_id, &info).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
