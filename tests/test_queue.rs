//! Integration tests.
//!
//! Requires Redis to be installed, so that the tests can start/stop Redis servers as
//! necessary using the `redis-server` binary.

use std::time::{Duration, Instant};

use serde_json::json;

use qube::models::job::Status;
use qube::models::Duration as QubeDuration;
use qube::Qube;

use crate::support::TestContext;

mod support;

async fn ready_client(ctx: &TestContext) -> Qube {
    let qube = Qube::new(ctx.config()).unwrap();
    qube.init().await.unwrap();
    assert!(qube.is_ready());
    qube
}

/// Poll until a job reaches the expected status, panicking after a timeout.
async fn wait_for_status(qube: &Qube, job_id: u64, expected: Status) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = qube.get_status(job_id).await.unwrap();
        if status == Some(expected) {
            return;
        }
        if Instant::now() > deadline {
            panic!(
                "job {} did not reach status {} in time, last seen: {:?}",
                job_id, expected, status
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn init_required_before_use() {
    let ctx = TestContext::new();
    let qube = Qube::new(ctx.config()).unwrap();
    assert!(!qube.is_ready());
    assert!(qube.add("Q", "G", &json!({})).await.is_err());
}

#[tokio::test]
async fn single_enqueue_single_consume() {
    let ctx = TestContext::new();
    let qube = ready_client(&ctx).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    qube.process("CHANNEL", 1, move |job| {
        let tx = tx.clone();
        async move {
            tx.send((job.id(), job.data().clone(), job.group().to_string()))
                .unwrap();
            Ok(())
        }
    })
    .await
    .unwrap();

    let data = json!({"to": "573205104418", "message": "Hola mundo 1"});
    let job_id = qube.add("CHANNEL", "573205104418", &data).await.unwrap();

    let (seen_id, seen_data, seen_group) =
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for job delivery")
            .unwrap();
    assert_eq!(seen_id, job_id);
    assert_eq!(seen_data, data);
    assert_eq!(seen_group, "573205104418");

    wait_for_status(&qube, job_id, Status::Completed).await;
    qube.close().await;
}

#[tokio::test]
async fn five_enqueues_one_group_consumed_in_order() {
    let ctx = TestContext::new();
    let mut config = ctx.config();
    config.queue.inactivity_timeout = QubeDuration::from_millis(500);
    config.queue.poll_interval = QubeDuration::from_millis(100);
    let qube = Qube::new(config).unwrap();
    qube.init().await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    qube.process("CHANNEL", 1, move |job| {
        let tx = tx.clone();
        async move {
            tx.send(job.data()["message"].as_str().unwrap().to_string())
                .unwrap();
            Ok(())
        }
    })
    .await
    .unwrap();

    let mut job_ids = Vec::new();
    for i in 1..=5 {
        let data = json!({"to": "573205104418", "message": format!("Hola mundo {}", i)});
        job_ids.push(qube.add("CHANNEL", "573205104418", &data).await.unwrap());
    }

    let mut seen = Vec::new();
    for _ in 0..5 {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for job delivery")
            .unwrap();
        seen.push(message);
    }
    assert_eq!(
        seen,
        vec![
            "Hola mundo 1",
            "Hola mundo 2",
            "Hola mundo 3",
            "Hola mundo 4",
            "Hola mundo 5"
        ]
    );

    for job_id in job_ids {
        wait_for_status(&qube, job_id, Status::Completed).await;
    }
    qube.close().await;
}

#[tokio::test]
async fn group_capacity_saturation() {
    let ctx = TestContext::new();
    let mut config = ctx.config();
    config.queue.inactivity_timeout = QubeDuration::from_millis(300);
    config.queue.poll_interval = QubeDuration::from_millis(100);
    let qube = Qube::new(config).unwrap();
    qube.init().await.unwrap();

    qube.process("Q", 2, |_job| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    })
    .await
    .unwrap();

    let mut job_ids = Vec::new();
    for i in 0..3 {
        job_ids.push(qube.add("Q", "G", &json!({"n": i})).await.unwrap());
    }

    // the quota bounds live workers for (Q, G) to 2 at any instant; the third
    // admission waits in the pending list
    for _ in 0..20 {
        assert!(ctx.consumer_count("Q", "G") <= 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for job_id in job_ids {
        wait_for_status(&qube, job_id, Status::Completed).await;
    }

    // freed capacity drains: workers stop via inactivity and deregister
    let deadline = Instant::now() + Duration::from_secs(5);
    while ctx.consumer_count("Q", "G") > 0 {
        assert!(Instant::now() < deadline, "consumer records never drained");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    qube.close().await;
}

#[tokio::test]
async fn inactivity_shutdown_deregisters_worker() {
    let ctx = TestContext::new();
    let mut config = ctx.config();
    config.queue.inactivity_timeout = QubeDuration::from_millis(200);
    config.queue.poll_interval = QubeDuration::from_millis(100);
    let qube = Qube::new(config).unwrap();
    qube.init().await.unwrap();

    qube.process("Q", 1, |_job| async move { Ok(()) })
        .await
        .unwrap();

    let job_id = qube.add("Q", "idle-group", &json!({"message": "once"})).await.unwrap();
    wait_for_status(&qube, job_id, Status::Completed).await;
    assert_eq!(ctx.consumer_count("Q", "idle-group"), 1);

    // one inactivity timeout plus one poll, with some slack
    let deadline = Instant::now() + Duration::from_millis(1200);
    while ctx.consumer_count("Q", "idle-group") > 0 {
        assert!(
            Instant::now() < deadline,
            "idle worker did not deregister in time"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    qube.close().await;
}

#[tokio::test]
async fn panicking_callback_fails_job_and_worker_survives() {
    let ctx = TestContext::new();
    let mut config = ctx.config();
    config.queue.inactivity_timeout = QubeDuration::from_millis(500);
    config.queue.poll_interval = QubeDuration::from_millis(100);
    let qube = Qube::new(config).unwrap();
    qube.init().await.unwrap();

    qube.process("Q", 1, |job| async move {
        if job.data()["boom"] == true {
            panic!("boom");
        }
        Ok(())
    })
    .await
    .unwrap();

    let bad = qube.add("Q", "G", &json!({"boom": true})).await.unwrap();
    let good = qube.add("Q", "G", &json!({"boom": false})).await.unwrap();

    wait_for_status(&qube, bad, Status::Failed).await;
    wait_for_status(&qube, good, Status::Completed).await;
    qube.close().await;
}

#[tokio::test]
async fn done_signal_beats_return_value() {
    let ctx = TestContext::new();
    let qube = ready_client(&ctx).await;

    qube.process("Q", 1, |job| async move {
        job.done(Err("signalled failure".into()));
        // the early signal wins over this Ok
        Ok(())
    })
    .await
    .unwrap();

    let job_id = qube.add("Q", "G", &json!({})).await.unwrap();
    wait_for_status(&qube, job_id, Status::Failed).await;
    qube.close().await;
}

#[tokio::test]
async fn script_cache_flush_recovery() {
    let ctx = TestContext::new();
    let qube = ready_client(&ctx).await;

    let first = qube.add("Q", "G", &json!({"n": 1})).await.unwrap();
    assert_eq!(qube.get_status(first).await.unwrap(), Some(Status::Pending));

    // wipe the server's script cache; the next call must reload and retry
    let mut conn = ctx.connection();
    let _: () = redis::cmd("SCRIPT").arg("FLUSH").query(&mut conn).unwrap();

    let second = qube.add("Q", "G", &json!({"n": 2})).await.unwrap();
    assert_eq!(second, first + 1);
    assert_eq!(qube.get_status(second).await.unwrap(), Some(Status::Pending));
    qube.close().await;
}

#[tokio::test]
async fn status_transitions_and_idempotence() {
    let ctx = TestContext::new();
    let qube = ready_client(&ctx).await;

    let job_id = qube.add("Q", "G", &json!({})).await.unwrap();
    assert_eq!(qube.get_status(job_id).await.unwrap(), Some(Status::Pending));

    // jumping straight to a terminal status is rejected
    assert!(!qube.update_job_status(job_id, Status::Completed).await.unwrap());
    assert_eq!(qube.get_status(job_id).await.unwrap(), Some(Status::Pending));

    assert!(qube.update_job_status(job_id, Status::Active).await.unwrap());
    assert!(qube.update_job_status(job_id, Status::Completed).await.unwrap());

    // repeat application is a no-op, as is flipping a terminal status
    assert!(!qube.update_job_status(job_id, Status::Completed).await.unwrap());
    assert!(!qube.update_job_status(job_id, Status::Failed).await.unwrap());
    assert_eq!(
        qube.get_status(job_id).await.unwrap(),
        Some(Status::Completed)
    );

    // unknown jobs: no status, no transition
    assert_eq!(qube.get_status(999_999).await.unwrap(), None);
    assert!(!qube.update_job_status(999_999, Status::Active).await.unwrap());
    qube.close().await;
}

#[tokio::test]
async fn progress_updates() {
    let ctx = TestContext::new();
    let qube = ready_client(&ctx).await;

    let job_id = qube.add("Q", "G", &json!({})).await.unwrap();
    qube.update_progress(job_id, 42).await.unwrap();

    let mut conn = ctx.connection();
    let progress: u8 = redis::cmd("HGET")
        .arg(format!("qube:queue:job:{}", job_id))
        .arg("progress")
        .query(&mut conn)
        .unwrap();
    assert_eq!(progress, 42);

    // values above the scale clamp to 100
    qube.update_progress(job_id, 255).await.unwrap();
    let progress: u8 = redis::cmd("HGET")
        .arg(format!("qube:queue:job:{}", job_id))
        .arg("progress")
        .query(&mut conn)
        .unwrap();
    assert_eq!(progress, 100);

    assert!(qube.update_progress(999_999, 10).await.is_err());
    qube.close().await;
}

#[tokio::test]
async fn process_picks_up_existing_groups() {
    let ctx = TestContext::new();
    let mut config = ctx.config();
    config.queue.inactivity_timeout = QubeDuration::from_millis(500);
    config.queue.poll_interval = QubeDuration::from_millis(100);
    let qube = Qube::new(config).unwrap();
    qube.init().await.unwrap();

    // jobs land before any consumer is registered; the later `process` call must
    // discover both groups from the queue's group index, without any notification
    let a = qube.add("Q", "G1", &json!({"n": 1})).await.unwrap();
    let b = qube.add("Q", "G2", &json!({"n": 2})).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    qube.process("Q", 1, move |job| {
        let tx = tx.clone();
        async move {
            tx.send(job.group().to_string()).unwrap();
            Ok(())
        }
    })
    .await
    .unwrap();

    let mut groups = Vec::new();
    for _ in 0..2 {
        groups.push(
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for job delivery")
                .unwrap(),
        );
    }
    groups.sort();
    assert_eq!(groups, vec!["G1", "G2"]);

    wait_for_status(&qube, a, Status::Completed).await;
    wait_for_status(&qube, b, Status::Completed).await;
    qube.close().await;
}

#[tokio::test]
async fn job_record_wire_layout() {
    let ctx = TestContext::new();
    let qube = ready_client(&ctx).await;

    let data = json!({"to": "573205104418", "message": "Hola mundo 1"});
    let job_id = qube.add("CHANNEL", "573205104418", &data).await.unwrap();

    let mut conn = ctx.connection();
    let record: std::collections::HashMap<String, String> = redis::cmd("HGETALL")
        .arg(format!("qube:queue:job:{}", job_id))
        .query(&mut conn)
        .unwrap();
    assert_eq!(record["status"], "pending");
    assert_eq!(record["progress"], "0");
    assert_eq!(record["group"], "573205104418");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&record["data"]).unwrap(),
        data
    );

    // the group list holds the job, the queue's group index holds the group key
    let queued: Vec<u64> = redis::cmd("LRANGE")
        .arg("qube:CHANNEL:group:573205104418")
        .arg(0)
        .arg(-1)
        .query(&mut conn)
        .unwrap();
    assert_eq!(queued, vec![job_id]);

    let groups: Vec<String> = redis::cmd("SMEMBERS")
        .arg("qube:CHANNEL:groups")
        .query(&mut conn)
        .unwrap();
    assert_eq!(groups, vec!["qube:CHANNEL:group:573205104418"]);
    qube.close().await;
}

#[tokio::test]
async fn close_stops_client() {
    let ctx = TestContext::new();
    let qube = ready_client(&ctx).await;
    qube.close().await;
    assert!(!qube.is_ready());
    assert!(qube.add("Q", "G", &json!({})).await.is_err());
}

#[tokio::test]
async fn cross_client_produce_consume() {
    let ctx = TestContext::new();

    // consumer and producer are separate clients sharing the store
    let consumer = ready_client(&ctx).await;
    let producer = ready_client(&ctx).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    consumer
        .process("CHANNEL", 1, move |job| {
            let tx = tx.clone();
            async move {
                tx.send(job.id()).unwrap();
                Ok(())
            }
        })
        .await
        .unwrap();

    let job_id = producer
        .add("CHANNEL", "g1", &json!({"message": "hello"}))
        .await
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for cross-client delivery")
        .unwrap();
    assert_eq!(seen, job_id);

    wait_for_status(&producer, job_id, Status::Completed).await;
    consumer.close().await;
    producer.close().await;
}
