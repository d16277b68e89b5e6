//! Test support: boots a throwaway `redis-server` per test context.
//!
//! Requires Redis to be installed, so that tests can start/stop private Redis servers
//! as necessary using the `redis-server` binary.

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use qube::config::Config;

pub struct TestContext {
    port: u16,
    server: Child,
}

impl TestContext {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let port = free_port();
        let server = Command::new("redis-server")
            .arg("--port")
            .arg(port.to_string())
            .arg("--save")
            .arg("")
            .arg("--appendonly")
            .arg("no")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start redis-server, is it installed?");

        let ctx = Self { port, server };
        ctx.wait_until_ready();
        ctx
    }

    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}/0", self.port)
    }

    /// Client config pointing at this context's private server.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.redis.port = self.port;
        config
    }

    /// Direct (synchronous) connection for test assertions and server manipulation.
    pub fn connection(&self) -> redis::Connection {
        redis::Client::open(self.url())
            .unwrap()
            .get_connection()
            .unwrap()
    }

    /// Count live consumer records for a (queue, group) the same way the scheduler does.
    pub fn consumer_count(&self, queue: &str, group: &str) -> usize {
        let mut conn = self.connection();
        let fields: Vec<String> = redis::cmd("HKEYS")
            .arg("activeGroupConsumers")
            .query(&mut conn)
            .unwrap();
        let prefix = format!("qube:{}:{}:", queue, group);
        fields.iter().filter(|f| f.starts_with(&prefix)).count()
    }

    fn wait_until_ready(&self) {
        let client = redis::Client::open(self.url()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(mut conn) = client.get_connection() {
                if redis::cmd("PING").query::<String>(&mut conn).is_ok() {
                    return;
                }
            }
            if Instant::now() > deadline {
                panic!("redis-server did not become ready on port {}", self.port);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.server.kill();
        let _ = self.server.wait();
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
