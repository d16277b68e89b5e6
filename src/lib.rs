//! Group-ordered job queue backed by Redis.
//!
//! Producers enqueue jobs into named queues; within each queue, jobs are partitioned
//! into groups, and within a group jobs are processed in FIFO order by at most one
//! consumer at a time. Across groups of the same queue, processing runs in parallel.
//! Any number of processes may share the same Redis and cooperate: a job produced on
//! one node can be consumed on another.
//!
//! All multi-key mutations run as atomic server-side scripts; consumer quotas are
//! coordinated through a shared registry hash; idle workers shut themselves down after
//! an inactivity timeout and are re-spawned on demand by pub/sub notifications.
//!
//! ```no_run
//! use qube::{Config, Qube};
//!
//! # async fn example() -> qube::QubeResult<()> {
//! let client = Qube::new(Config::default())?;
//! client.init().await?;
//!
//! client
//!     .process("CHANNEL", 1, |job| async move {
//!         println!("job {} in group {}: {}", job.id(), job.group(), job.data());
//!         Ok(())
//!     })
//!     .await?;
//!
//! let job_id = client
//!     .add("CHANNEL", "573205104418", &serde_json::json!({"message": "Hola mundo"}))
//!     .await?;
//! # let _ = job_id;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod config;
pub mod models;

pub use crate::application::{Job, Qube};
pub use crate::config::Config;
pub use crate::models::{QubeError, QubeResult};
