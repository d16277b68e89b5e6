//! Defines the main client, through which all queue operations are exposed.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use deadpool_redis::{Pool, PoolConfig, Runtime};
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::task::JoinHandle;

use super::job::Job;
use super::notifier;
use super::scheduler::{self, BoxedHandler, PendingConsumer, Registration};
use super::scripts::{ScriptKind, ScriptRegistry};
use super::keys;
use crate::config::Config;
use crate::models::job::{Field, HandlerResult, Status};
use crate::models::{QubeError, QubeResult};

/// Generate a random alphanumeric identifier, used for instance and worker IDs.
pub(crate) fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Shared state behind a [`Qube`] client: the connection pool, script registry,
/// dedicated pub/sub connections, and this node's scheduling maps.
pub(crate) struct Core {
    pub(crate) config: Config,

    /// Random identity of this process; the owner tag on every worker it spawns.
    pub(crate) instance_id: String,

    pub(crate) pool: Pool,
    pub(crate) scripts: ScriptRegistry,

    /// Dedicated publisher connection; pub/sub paths bypass the pool.
    publisher: Mutex<Option<ConnectionManager>>,

    /// Handle of the notification subscriber task, held for shutdown.
    notifier: Mutex<Option<JoinHandle<()>>>,

    /// Flips true once scripts are loaded and the subscription is confirmed.
    is_ready: AtomicBool,

    /// Registered processing callbacks, one per queue per process.
    pub(crate) process_map: Mutex<HashMap<String, Registration>>,

    /// Group-consumer admissions deferred because the global quota was full.
    pub(crate) pending: Mutex<VecDeque<PendingConsumer>>,

    /// Inactivity timer handle per worker this node owns, keyed by consumer key.
    pub(crate) timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Core {
    /// Get a pooled connection. Blocks (asynchronously) while the pool is exhausted,
    /// which is what bounds this node's concurrent store I/O.
    pub(crate) async fn conn(&self) -> QubeResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    pub(crate) fn publisher(&self) -> QubeResult<ConnectionManager> {
        self.publisher
            .lock()
            .unwrap()
            .clone()
            .ok_or(QubeError::NotReady)
    }

    pub(crate) fn ensure_ready(&self) -> QubeResult<()> {
        if self.is_ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QubeError::NotReady)
        }
    }

    /// Enqueue a job and notify all nodes. The notification is best-effort: if the
    /// publish fails the job is already durably enqueued, and consumers discover it
    /// on their next poll.
    pub(crate) async fn add(
        &self,
        queue: &str,
        group: &str,
        data: &serde_json::Value,
    ) -> QubeResult<u64> {
        let payload = serde_json::to_string(data)?;
        let groups_key = keys::groups_key(queue);
        let group_key = keys::group_key(queue, group);

        let mut conn = self.conn().await?;
        let job_id: u64 = self
            .scripts
            .eval(
                &mut conn,
                ScriptKind::Enqueue,
                &[groups_key.as_str(), group_key.as_str(), keys::JOB_ID_KEY],
                &[payload.as_str(), group],
            )
            .await?;
        drop(conn);

        info!("[{}] job {} enqueued", group_key, job_id);

        if let Err(err) = notifier::publish(self, queue, group).await {
            warn!(
                "job {} enqueued but notification publish failed: {}",
                job_id, err
            );
        }

        Ok(job_id)
    }

    /// Apply a status transition via the atomic script.
    ///
    /// Returns true if the transition was applied, false if the lifecycle rejected it
    /// (or the job doesn't exist).
    pub(crate) async fn update_job_status(&self, job_id: u64, status: Status) -> QubeResult<bool> {
        let key = keys::job_key(job_id);
        let mut conn = self.conn().await?;
        let applied: bool = self
            .scripts
            .eval(
                &mut conn,
                ScriptKind::UpdateStatus,
                &[key.as_str()],
                &[status.as_ref()],
            )
            .await?;

        if applied {
            info!("[{}] {}", key, status);
        } else {
            debug!("[{}] transition to {} rejected", key, status);
        }
        Ok(applied)
    }

    pub(crate) async fn get_status(&self, job_id: u64) -> QubeResult<Option<Status>> {
        let key = keys::job_key(job_id);
        let mut conn = self.conn().await?;
        let raw: Option<String> = self
            .scripts
            .eval(&mut conn, ScriptKind::GetStatus, &[key.as_str()], &[])
            .await?;

        raw.map(|s| {
            s.parse()
                .map_err(|_| QubeError::Parse(format!("invalid status '{}' for job {}", s, job_id)))
        })
        .transpose()
    }

    /// Write a job's progress field (0-100).
    pub(crate) async fn update_progress(&self, job_id: u64, progress: u8) -> QubeResult<()> {
        let key = keys::job_key(job_id);
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Err(QubeError::NoSuchJob(job_id));
        }
        let _: () = conn.hset(&key, Field::Progress, progress.min(100)).await?;
        Ok(())
    }
}

/// Group-ordered job queue client.
///
/// Producers [`add`](Qube::add) jobs into (queue, group) lanes; consumers register a
/// callback per queue with [`process`](Qube::process). Within a group, jobs are handed
/// out in FIFO order to at most one worker at a time per quota slot; across groups,
/// processing runs in parallel. Any number of processes may share the same Redis and
/// cooperate through it.
pub struct Qube {
    core: Arc<Core>,
}

impl Qube {
    /// Create a new, uninitialised client. [`init`](Qube::init) must complete before
    /// jobs can be added or processed.
    pub fn new(config: Config) -> QubeResult<Self> {
        let mut pool_config = deadpool_redis::Config::from_url(config.redis.url());
        pool_config.pool = Some(PoolConfig::new(config.queue.pool_max));
        let pool = pool_config.create_pool(Some(Runtime::Tokio1))?;

        let core = Arc::new(Core {
            config,
            instance_id: random_id(16),
            pool,
            scripts: ScriptRegistry::new(),
            publisher: Mutex::new(None),
            notifier: Mutex::new(None),
            is_ready: AtomicBool::new(false),
            process_map: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            timers: Mutex::new(HashMap::new()),
        });

        Ok(Qube { core })
    }

    /// Load the queue scripts, warm the pool, and subscribe to job notifications.
    ///
    /// Resolves only after the subscription is confirmed by Redis, so no notification
    /// published afterwards is missed.
    pub async fn init(&self) -> QubeResult<()> {
        if self.core.ensure_ready().is_ok() {
            return Ok(());
        }

        let mut conn = self.core.conn().await?;
        self.core.scripts.load_all(&mut conn).await?;
        drop(conn);

        // hold the configured minimum of connections once so they stay pooled as idle
        let mut warmed = Vec::with_capacity(self.core.config.queue.pool_min);
        for _ in 0..self.core.config.queue.pool_min {
            warmed.push(self.core.conn().await?);
        }
        drop(warmed);

        let client = redis::Client::open(self.core.config.redis.url())?;
        let publisher = client.get_connection_manager().await?;
        *self.core.publisher.lock().unwrap() = Some(publisher);

        let subscriber = notifier::start(&self.core).await?;
        *self.core.notifier.lock().unwrap() = Some(subscriber);

        self.core.is_ready.store(true, Ordering::SeqCst);
        info!("qube client ready, instance {}", self.core.instance_id);
        Ok(())
    }

    /// Whether [`init`](Qube::init) has completed and the notification subscription
    /// is live.
    pub fn is_ready(&self) -> bool {
        self.core.ensure_ready().is_ok()
    }

    /// Enqueue `data` into `group` of `queue`, returning the new job's ID.
    pub async fn add(&self, queue: &str, group: &str, data: &serde_json::Value) -> QubeResult<u64> {
        self.core.ensure_ready()?;
        self.core.add(queue, group, data).await
    }

    /// Register a processing callback for `queue` and start up to `n_consumers`
    /// workers per currently-known group.
    ///
    /// Groups that first appear after this call are picked up via notifications. At
    /// most one registration per queue is kept per process; calling again replaces it.
    pub async fn process<F, Fut>(
        &self,
        queue: &str,
        n_consumers: usize,
        handler: F,
    ) -> QubeResult<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.core.ensure_ready()?;
        let boxed: BoxedHandler = Arc::new(move |job| -> BoxFuture<'static, HandlerResult> {
            Box::pin(handler(job))
        });
        scheduler::process(&self.core, queue, n_consumers, boxed).await
    }

    /// Apply a status transition to a job; returns whether it was applied.
    pub async fn update_job_status(&self, job_id: u64, status: Status) -> QubeResult<bool> {
        self.core.update_job_status(job_id, status).await
    }

    /// Get a job's current status, or `None` for an unknown job ID.
    pub async fn get_status(&self, job_id: u64) -> QubeResult<Option<Status>> {
        self.core.get_status(job_id).await
    }

    /// Write a job's progress field (clamped to 0-100).
    pub async fn update_progress(&self, job_id: u64, progress: u8) -> QubeResult<()> {
        self.core.update_progress(job_id, progress).await
    }

    /// Shut down: stop the notifier, cancel local timers, and close the pool and
    /// dedicated connections.
    ///
    /// In-flight workers observe their next store operation fail and terminate; no
    /// graceful drain of running jobs is attempted.
    pub async fn close(&self) {
        self.core.is_ready.store(false, Ordering::SeqCst);

        if let Some(handle) = self.core.notifier.lock().unwrap().take() {
            handle.abort();
        }

        let timers: Vec<JoinHandle<()>> = {
            let mut map = self.core.timers.lock().unwrap();
            map.drain().map(|(_, handle)| handle).collect()
        };
        for handle in timers {
            handle.abort();
        }

        *self.core.publisher.lock().unwrap() = None;
        self.core.pool.close();
        info!("qube client closed, instance {}", self.core.instance_id);
    }
}
