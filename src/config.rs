//! Configuration parsing.

use std::default::Default;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::models::Duration;

/// Main client config, typically read from a `.toml` file or built in code.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// Configuration for connecting to Redis.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Queue behaviour tunables.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Read configuration from a file into a new Config struct.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();

        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) => return Err(err.to_string()),
        };

        let conf: Config = match toml::from_str(&data) {
            Ok(conf) => conf,
            Err(err) => return Err(err.to_string()),
        };

        Ok(conf)
    }
}

/// Configuration for connecting to Redis.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Host to connect to. Defaults to "127.0.0.1" if not specified.
    pub host: String,

    /// Port to connect to. Defaults to 6379 if not specified.
    pub port: u16,

    /// Optional password used with AUTH.
    pub password: Option<String>,

    /// Database index to SELECT. Defaults to 0.
    pub db: i64,
}

impl RedisConfig {
    /// Get the Redis URL to use for connecting to a Redis server.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "127.0.0.1".to_owned(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

/// Queue behaviour tunables.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Grace period a worker stays alive after its last successful dequeue. Defaults to "2s".
    pub inactivity_timeout: Duration,

    /// How long a worker sleeps after finding its group empty. Defaults to "1s".
    pub poll_interval: Duration,

    /// Number of pooled connections opened eagerly at init. Defaults to 2.
    pub pool_min: usize,

    /// Maximum number of pooled connections. Defaults to 1000.
    pub pool_max: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            inactivity_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(1000),
            pool_min: 2,
            pool_max: 1000,
        }
    }
}
