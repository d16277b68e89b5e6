//! Group-consumer scheduling: admission control against the shared registry, the
//! pending-admissions list, and per-worker inactivity timers.
//!
//! All node-local maps live on [`Core`] behind mutexes; locks are only ever held for
//! plain map operations, never across an await point.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use redis::AsyncCommands;

use super::job::Job;
use super::keys;
use super::manager::{random_id, Core};
use super::registry::ConsumerRegistry;
use super::worker;
use crate::models::job::HandlerResult;
use crate::models::{ConsumerInfo, NewJobMessage, QubeResult};

/// Type-erased processing callback registered via `process`.
pub(crate) type BoxedHandler =
    Arc<dyn Fn(Job) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A queue's processing registration: the callback and its per-group consumer quota.
pub(crate) struct Registration {
    pub(crate) n_consumers: usize,
    pub(crate) handler: BoxedHandler,
}

/// A group-consumer admission deferred because the global quota was saturated.
pub(crate) struct PendingConsumer {
    pub(crate) queue: String,
    pub(crate) group: String,
    pub(crate) group_key: String,
}

/// Look up the registered callback for a queue.
pub(crate) fn handler_for(core: &Core, queue: &str) -> Option<BoxedHandler> {
    core.process_map
        .lock()
        .unwrap()
        .get(queue)
        .map(|reg| Arc::clone(&reg.handler))
}

/// Register a processing callback and start consumers for every currently-known group.
///
/// Groups that first appear later are only picked up via notifications; that's
/// intentional, the groups set is read once here.
pub(crate) async fn process(
    core: &Arc<Core>,
    queue: &str,
    n_consumers: usize,
    handler: BoxedHandler,
) -> QubeResult<()> {
    {
        let mut map = core.process_map.lock().unwrap();
        if map
            .insert(
                queue.to_string(),
                Registration {
                    n_consumers,
                    handler,
                },
            )
            .is_some()
        {
            debug!("[{}] processing registration replaced", queue);
        }
    }

    let members: Vec<String> = {
        let mut conn = core.conn().await?;
        conn.smembers(keys::groups_key(queue)).await?
    };
    info!(
        "[{}] processing registered, {} consumers per group, {} known groups",
        queue,
        n_consumers,
        members.len()
    );

    for member in members {
        let group = keys::group_name_from_key(queue, &member).to_string();
        for _ in 0..n_consumers {
            start_group_consumer(core, queue, &group, Some(member.clone()), false, n_consumers)
                .await?;
        }
    }

    Ok(())
}

/// Try to start one group worker, respecting the global quota.
///
/// If the (queue, group) already carries `n_consumers` records across all nodes, the
/// admission is appended to the pending list (unless it came from that list) and no
/// worker starts. Returns whether a worker was spawned.
pub(crate) fn start_group_consumer<'a>(
    core: &'a Arc<Core>,
    queue: &'a str,
    group: &'a str,
    group_key: Option<String>,
    from_pending: bool,
    n_consumers: usize,
) -> BoxFuture<'a, QubeResult<bool>> {
    Box::pin(start_group_consumer_inner(
        core, queue, group, group_key, from_pending, n_consumers,
    ))
}

async fn start_group_consumer_inner(
    core: &Arc<Core>,
    queue: &str,
    group: &str,
    group_key: Option<String>,
    from_pending: bool,
    n_consumers: usize,
) -> QubeResult<bool> {
    let group_key = group_key.unwrap_or_else(|| keys::group_key(queue, group));

    let mut conn = core.conn().await?;
    let count = ConsumerRegistry::count_for_group(&mut conn, queue, group).await?;
    if count >= n_consumers {
        drop(conn);
        if !from_pending {
            debug!(
                "[{}] consumer quota full ({}/{}), queueing admission",
                group_key, count, n_consumers
            );
            core.pending.lock().unwrap().push_back(PendingConsumer {
                queue: queue.to_string(),
                group: group.to_string(),
                group_key,
            });
        }
        return Ok(false);
    }

    let worker_id = random_id(12);
    let info = ConsumerInfo::new(core.instance_id.as_str(), worker_id.as_str());
    ConsumerRegistry::add(&mut conn, queue, group, &worker_id, &info).await?;
    drop(conn);

    arm_inactivity_timer(core, queue, group, &worker_id);

    let task_core = Arc::clone(core);
    let (queue, group) = (queue.to_string(), group.to_string());
    tokio::spawn(async move {
        worker::run(task_core, queue, group, group_key, worker_id).await;
    });

    Ok(true)
}

/// Route a new-job notification to the scheduler, if this process consumes the queue.
pub(crate) async fn handle_new_job(core: &Arc<Core>, msg: NewJobMessage) {
    let n_consumers = {
        core.process_map
            .lock()
            .unwrap()
            .get(&msg.queue_name)
            .map(|reg| reg.n_consumers)
    };
    let Some(n_consumers) = n_consumers else {
        return;
    };

    if let Err(err) = start_group_consumer(
        core,
        &msg.queue_name,
        &msg.group_name,
        None,
        false,
        n_consumers,
    )
    .await
    {
        warn!(
            "[{}] failed to start consumer for group {}: {}",
            msg.queue_name, msg.group_name, err
        );
    }
}

/// Drain deferred admissions after a worker exits.
///
/// Takes entries oldest-first; when the head of the line is still saturated it is put
/// back at the front and draining stops, so admission stays FIFO over groups.
pub(crate) async fn drain_pending(core: &Arc<Core>) {
    loop {
        let entry = core.pending.lock().unwrap().pop_front();
        let Some(entry) = entry else {
            return;
        };

        let n_consumers = {
            core.process_map
                .lock()
                .unwrap()
                .get(&entry.queue)
                .map(|reg| reg.n_consumers)
        };
        let Some(n_consumers) = n_consumers else {
            debug!(
                "[{}] dropping pending admission, queue no longer registered",
                entry.group_key
            );
            continue;
        };

        match start_group_consumer(
            core,
            &entry.queue,
            &entry.group,
            Some(entry.group_key.clone()),
            true,
            n_consumers,
        )
        .await
        {
            Ok(true) => continue,
            Ok(false) => {
                core.pending.lock().unwrap().push_front(entry);
                return;
            }
            Err(err) => {
                warn!("[{}] pending admission failed: {}", entry.group_key, err);
                core.pending.lock().unwrap().push_front(entry);
                return;
            }
        }
    }
}

/// Arm (or re-arm) the inactivity timer for a worker this node owns.
///
/// The timer is a spawned sleep; its `JoinHandle` in the timers map is the cancellable
/// handle. If it fires, the worker's registry record is flagged `shouldStop` and the
/// worker observes that on its next empty dequeue.
pub(crate) fn arm_inactivity_timer(core: &Arc<Core>, queue: &str, group: &str, worker_id: &str) {
    let consumer_key = keys::consumer_key(queue, group, worker_id);
    let timeout = core.config.queue.inactivity_timeout.as_std();

    let task_core = Arc::clone(core);
    let (queue, group, worker_id) = (
        queue.to_string(),
        group.to_string(),
        worker_id.to_string(),
    );
    let handle = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        expire_idle_worker(&task_core, &queue, &group, &worker_id).await;
    });

    let mut timers = core.timers.lock().unwrap();
    if let Some(old) = timers.insert(consumer_key, handle) {
        old.abort();
    }
}

/// Cancel and forget a worker's inactivity timer.
pub(crate) fn clear_inactivity_timer(core: &Core, consumer_key: &str) {
    if let Some(handle) = core.timers.lock().unwrap().remove(consumer_key) {
        handle.abort();
    }
}

/// Re-arm the inactivity timer after a successful dequeue.
///
/// Only the owning node resets, and never once shutdown has begun; a missing record
/// means the worker is already on its way out.
pub(crate) async fn reset_inactivity_timer(
    core: &Arc<Core>,
    queue: &str,
    group: &str,
    worker_id: &str,
) -> QubeResult<()> {
    let info = {
        let mut conn = core.conn().await?;
        ConsumerRegistry::get(&mut conn, queue, group, worker_id).await?
    };
    let Some(info) = info else {
        return Ok(());
    };
    if info.owner != core.instance_id || info.should_stop {
        return Ok(());
    }

    arm_inactivity_timer(core, queue, group, worker_id);
    Ok(())
}

async fn expire_idle_worker(core: &Arc<Core>, queue: &str, group: &str, worker_id: &str) {
    let consumer_key = keys::consumer_key(queue, group, worker_id);
    let flagged = async {
        let mut conn = core.conn().await?;
        ConsumerRegistry::flag_stop(&mut conn, queue, group, worker_id).await
    }
    .await;

    match flagged {
        Ok(true) => debug!(
            "[{}] flagged for shutdown after {} of inactivity",
            consumer_key, core.config.queue.inactivity_timeout
        ),
        Ok(false) => (),
        Err(err) => warn!("[{}] failed to flag idle worker: {}", consumer_key, err),
    }
}
