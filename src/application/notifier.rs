//! Pub/sub notification fabric: one dedicated subscriber connection per process, and
//! the publisher path used after every enqueue.
//!
//! Both connections bypass the pool: a subscribed connection enters a mode that is
//! incompatible with ordinary commands, and the publisher must stay usable while every
//! pooled connection is held by workers.

use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, warn};
use redis::AsyncCommands;
use tokio::task::JoinHandle;

use super::keys;
use super::manager::Core;
use super::scheduler;
use crate::models::{NewJobMessage, QubeResult};

/// Subscribe to the new-job channel and spawn the routing task.
///
/// The SUBSCRIBE round-trip completes before this returns, so the caller can rely on
/// no notification published afterwards being missed. Malformed payloads are logged
/// and dropped; correctness rests on the workers' periodic poll, not on delivery.
pub(crate) async fn start(core: &Arc<Core>) -> QubeResult<JoinHandle<()>> {
    let client = redis::Client::open(core.config.redis.url())?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(keys::NEW_JOB_CHANNEL).await?;
    debug!("subscribed to {}", keys::NEW_JOB_CHANNEL);

    let task_core = Arc::clone(core);
    let handle = tokio::spawn(async move {
        let mut stream = pubsub.into_on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("dropping unreadable notification: {}", err);
                    continue;
                }
            };

            match serde_json::from_str::<NewJobMessage>(&payload) {
                Ok(msg) => scheduler::handle_new_job(&task_core, msg).await,
                Err(err) => warn!("dropping malformed notification {:?}: {}", payload, err),
            }
        }
        debug!("notification stream ended");
    });

    Ok(handle)
}

/// Publish a new-job notification on the dedicated publisher connection.
pub(crate) async fn publish(core: &Core, queue: &str, group: &str) -> QubeResult<()> {
    let msg = NewJobMessage {
        queue_name: queue.to_string(),
        group_name: group.to_string(),
    };
    let payload = serde_json::to_string(&msg)?;

    let mut conn = core.publisher()?;
    let _: () = conn.publish(keys::NEW_JOB_CHANNEL, payload).await?;
    Ok(())
}
