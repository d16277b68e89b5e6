//! The group worker: a cooperative loop that repeatedly dequeues from one group until
//! its registry record tells it to stop.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::oneshot;

use super::job::{Completion, Job};
use super::keys;
use super::manager::Core;
use super::registry::ConsumerRegistry;
use super::scheduler;
use super::scripts::ScriptKind;
use crate::models::job::{HandlerResult, Payload, Status};
use crate::models::QubeResult;

/// Worker main loop.
///
/// Jobs are processed strictly one at a time; the cooperative stop flag is only
/// checked on empty dequeues, so a busy group keeps its worker alive. A transient
/// store error counts as a failed iteration (log, sleep, retry); a closed pool is
/// terminal, since it means the client shut down.
pub(crate) async fn run(
    core: Arc<Core>,
    queue: String,
    group: String,
    group_key: String,
    worker_id: String,
) {
    let consumer_key = keys::consumer_key(&queue, &group, &worker_id);
    info!("[{}] worker started", consumer_key);

    loop {
        match next_payload(&core, &group_key).await {
            Ok(Some(payload)) => {
                run_job(&core, &queue, payload).await;
                if let Err(err) =
                    scheduler::reset_inactivity_timer(&core, &queue, &group, &worker_id).await
                {
                    warn!("[{}] failed to reset inactivity timer: {}", consumer_key, err);
                }
            }
            Ok(None) => match should_stop(&core, &queue, &group, &worker_id).await {
                Ok(true) => break,
                Ok(false) => tokio::time::sleep(core.config.queue.poll_interval.as_std()).await,
                Err(err) => {
                    if core.pool.is_closed() {
                        break;
                    }
                    warn!("[{}] failed to read consumer record: {}", consumer_key, err);
                    tokio::time::sleep(core.config.queue.poll_interval.as_std()).await;
                }
            },
            Err(err) => {
                if core.pool.is_closed() {
                    break;
                }
                warn!("[{}] dequeue failed: {}", consumer_key, err);
                tokio::time::sleep(core.config.queue.poll_interval.as_std()).await;
            }
        }
    }

    finish(&core, &queue, &group, &worker_id).await;
    info!("[{}] worker stopped", consumer_key);
}

/// Pop the next job from the group via the atomic dequeue script.
async fn next_payload(core: &Core, group_key: &str) -> QubeResult<Option<Payload>> {
    let mut conn = core.conn().await?;
    let row: Option<(u64, String, String)> = core
        .scripts
        .eval(&mut conn, ScriptKind::Dequeue, &[group_key], &[])
        .await?;

    match row {
        Some((id, data, group)) => {
            let data = serde_json::from_str(&data)?;
            Ok(Some(Payload::new(id, data, group)))
        }
        None => Ok(None),
    }
}

async fn should_stop(
    core: &Core,
    queue: &str,
    group: &str,
    worker_id: &str,
) -> QubeResult<bool> {
    let mut conn = core.conn().await?;
    Ok(
        match ConsumerRegistry::get(&mut conn, queue, group, worker_id).await? {
            Some(info) => info.should_stop,
            // record removed externally, treat as a stop request
            None => true,
        },
    )
}

/// Run one job through the registered callback and apply exactly one status transition.
///
/// The callback runs in its own task so a panic is contained (it surfaces as a join
/// error). Completion is first-winner: a `done()` call made during execution beats the
/// callback's own return value; whichever came second is ignored, and the status
/// lifecycle rejects any later transition anyway.
async fn run_job(core: &Arc<Core>, queue: &str, payload: Payload) {
    let job_id = payload.id();
    let job_key = keys::job_key(job_id);

    let handler = match scheduler::handler_for(core, queue) {
        Some(handler) => handler,
        None => {
            // registration vanished mid-flight; job stays active for external recovery
            warn!(
                "[{}] no processing callback registered for queue {}",
                job_key, queue
            );
            return;
        }
    };

    let (done_tx, mut done_rx) = oneshot::channel();
    let job = Job::new(Arc::clone(core), payload, Completion::new(done_tx));
    debug!("[{}] started", job_key);

    let joined = tokio::spawn(handler(job)).await;

    let outcome: HandlerResult = match done_rx.try_recv() {
        Ok(result) => result,
        Err(_) => match joined {
            Ok(result) => result,
            Err(err) => Err(format!("processing callback panicked: {}", err).into()),
        },
    };

    let status = match &outcome {
        Ok(()) => Status::Completed,
        Err(err) => {
            debug!("[{}] callback reported failure: {}", job_key, err);
            Status::Failed
        }
    };

    if let Err(err) = core.update_job_status(job_id, status).await {
        warn!("[{}] failed to update status to {}: {}", job_key, status, err);
    }
}

/// Worker exit path: drop the registry record and local timer, then hand any freed
/// capacity to deferred admissions.
async fn finish(core: &Arc<Core>, queue: &str, group: &str, worker_id: &str) {
    let consumer_key = keys::consumer_key(queue, group, worker_id);
    scheduler::clear_inactivity_timer(core, &consumer_key);

    match core.conn().await {
        Ok(mut conn) => {
            if let Err(err) = ConsumerRegistry::delete(&mut conn, queue, group, worker_id).await {
                warn!("[{}] failed to deregister consumer: {}", consumer_key, err);
            }
        }
        Err(err) => warn!("[{}] failed to deregister consumer: {}", consumer_key, err),
    }

    scheduler::drain_pending(core).await;
}
