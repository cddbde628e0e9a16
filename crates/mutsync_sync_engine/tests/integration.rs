//! End-to-end tests: adapter, engine, outbox, and mock transport together.

use mutsync_codec::{ModelRef, MutationKind, MutationRecord, Origin};
use mutsync_outbox::{LogOutboxStore, OutboxStore, OutgoingMutationQueue};
use mutsync_sync_engine::{
    EngineState, ExhaustedPolicy, InMemoryStorageAdapter, LocalStorageAdapter, MockTransport,
    RetryConfig, SyncConfig, SyncEngine, SyncError, SyncEvent,
};
use mutsync_testkit::{person, post, test_codec, Person};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

type Engine = SyncEngine<InMemoryStorageAdapter, MockTransport>;

struct Harness {
    engine: Engine,
    adapter: Arc<InMemoryStorageAdapter>,
    transport: Arc<MockTransport>,
    queue: Arc<OutgoingMutationQueue>,
}

fn harness_with_queue(config: SyncConfig, queue: Arc<OutgoingMutationQueue>) -> Harness {
    let adapter = Arc::new(InMemoryStorageAdapter::new());
    let transport = Arc::new(MockTransport::new());
    let engine = SyncEngine::new(
        config,
        Arc::clone(&queue),
        Arc::clone(&adapter),
        Arc::clone(&transport),
    );
    Harness {
        engine,
        adapter,
        transport,
        queue,
    }
}

fn harness(config: SyncConfig) -> Harness {
    let queue = Arc::new(OutgoingMutationQueue::in_memory(test_codec()).unwrap());
    harness_with_queue(config, queue)
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(20))
        .with_jitter(false)
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<SyncEvent>,
    mut matches: impl FnMut(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn queue_len(queue: &OutgoingMutationQueue) -> usize {
    queue.len().await.unwrap()
}

#[tokio::test]
async fn local_write_is_published_and_removed() {
    let h = harness(SyncConfig::default());
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    wait_until("publish", || h.transport.publish_count() == 1).await;
    wait_until("empty outbox", || h.engine.stats().published == 1).await;
    assert_eq!(queue_len(&h.queue).await, 0);

    let published = h.transport.published();
    assert_eq!(published[0].model_id, "p1");
    assert_eq!(published[0].kind, MutationKind::Create);
    assert_eq!(published[0].origin, Origin::Local);

    let stats = h.engine.stats();
    assert_eq!(stats.captured, 1);
    assert!(stats.last_publish_time.is_some());
    h.engine.stop().await;
}

#[tokio::test]
async fn engine_writes_are_not_captured() {
    let h = harness(SyncConfig::default());
    let mut events = h.engine.events();
    h.engine.start().await.unwrap();

    let item: ModelRef = Arc::new(person("p1", "From remote"));
    h.adapter.save(item, Origin::SyncEngine).await.unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, SyncEvent::EchoSkipped { .. })).await;
    assert_eq!(
        event,
        SyncEvent::EchoSkipped {
            model_type: "Person".into(),
            model_id: "p1".into(),
        }
    );
    assert_eq!(queue_len(&h.queue).await, 0);
    assert_eq!(h.transport.attempts(), 0);
    h.engine.stop().await;
}

#[tokio::test]
async fn echo_write_back_does_not_loop() {
    let h = harness(SyncConfig::default());
    h.transport.set_echo(true);
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    wait_until("echo skipped", || h.engine.stats().echoes_skipped == 1).await;

    let writes = h.adapter.writes();
    assert_eq!(
        writes,
        vec![
            (MutationKind::Create, Origin::Local, "p1".to_string()),
            (MutationKind::Update, Origin::SyncEngine, "p1".to_string()),
        ]
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.publish_count(), 1);
    assert_eq!(h.engine.stats().captured, 1);
    assert_eq!(queue_len(&h.queue).await, 0);
    h.engine.stop().await;
}

#[tokio::test]
async fn echoed_delete_is_written_back_as_delete() {
    let h = harness(SyncConfig::default());
    h.transport.set_echo(true);
    h.engine.start().await.unwrap();

    h.adapter.remove(person("p1", "Ada")).await.unwrap();
    wait_until("echo skipped", || h.engine.stats().echoes_skipped == 1).await;

    let writes = h.adapter.writes();
    assert_eq!(writes[1], (MutationKind::Delete, Origin::SyncEngine, "p1".to_string()));
    assert!(h.adapter.get("Person", "p1").is_none());
    h.engine.stop().await;
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let h = harness(SyncConfig::default());
    assert_eq!(h.engine.state(), EngineState::Stopped);

    h.engine.start().await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Running);
    assert!(matches!(
        h.engine.start().await,
        Err(SyncError::AlreadyRunning)
    ));

    h.engine.stop().await;
    assert_eq!(h.engine.state(), EngineState::Stopped);
    h.engine.stop().await;
    assert_eq!(h.engine.state(), EngineState::Stopped);

    h.engine.start().await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Running);
    h.engine.stop().await;
}

#[tokio::test]
async fn lifecycle_events_are_broadcast() {
    let h = harness(SyncConfig::default());
    let mut events = h.engine.events();
    let mut states = h.engine.state_changes();

    h.engine.start().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Started);
    assert_eq!(*states.borrow_and_update(), EngineState::Running);

    h.engine.stop().await;
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Stopped);
    assert_eq!(*states.borrow_and_update(), EngineState::Stopped);
}

#[tokio::test]
async fn failed_publish_stays_queued_until_restart() {
    let h = harness(SyncConfig::default().with_retry(RetryConfig::no_retry()));
    h.transport.fail_model("p1", None, true);
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    wait_until("failure", || h.engine.stats().publish_failures == 1).await;
    assert_eq!(queue_len(&h.queue).await, 1);
    assert!(h.engine.stats().last_error.is_some());

    h.engine.stop().await;
    h.transport.heal_model("p1");
    h.engine.start().await.unwrap();

    wait_until("publish after restart", || h.transport.publish_count() == 1).await;
    wait_until("removal", || h.engine.stats().published == 1).await;
    assert_eq!(queue_len(&h.queue).await, 0);
    h.engine.stop().await;
}

#[tokio::test]
async fn held_identity_keeps_its_order() {
    let h = harness(SyncConfig::default().with_retry(RetryConfig::no_retry()));
    h.transport.fail_model("p1", Some(1), false);
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "first")).await.unwrap();
    h.adapter.write(person("p1", "second")).await.unwrap();
    h.adapter.write(person("p2", "other")).await.unwrap();

    wait_until("other identity published", || h.transport.publish_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.published()[0].model_id, "p2");
    assert_eq!(queue_len(&h.queue).await, 2);

    h.engine.stop().await;
    h.engine.start().await.unwrap();
    wait_until("held entries published", || h.transport.publish_count() == 3).await;

    let codec = test_codec();
    let names: Vec<String> = h.transport.published()[1..]
        .iter()
        .map(|record| {
            let event = codec.decode(record).unwrap();
            event.model_as::<Person>().unwrap().name.clone()
        })
        .collect();
    assert_eq!(names, vec!["first", "second"]);
    h.engine.stop().await;
}

#[tokio::test]
async fn no_outbox_writes_after_stop() {
    let h = harness(SyncConfig::default());
    h.transport.set_latency(Duration::from_millis(30));
    h.engine.start().await.unwrap();

    for n in 0..5 {
        h.adapter.write(person("p1", &format!("v{n}"))).await.unwrap();
    }
    wait_until("all captured", || h.engine.stats().captured == 5).await;
    wait_until("first attempt", || h.transport.attempts() >= 1).await;

    h.engine.stop().await;
    let len_at_stop = queue_len(&h.queue).await;
    let published_at_stop = h.transport.publish_count();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(queue_len(&h.queue).await, len_at_stop);
    assert_eq!(h.transport.publish_count(), published_at_stop);
    assert_eq!(len_at_stop + published_at_stop, 5);
}

#[tokio::test]
async fn one_publish_per_identity_at_a_time() {
    let h = harness(SyncConfig::default());
    h.transport.set_latency(Duration::from_millis(10));
    h.engine.start().await.unwrap();

    for n in 0..5 {
        h.adapter.write(person("p1", &format!("v{n}"))).await.unwrap();
    }
    wait_until("all published", || h.transport.publish_count() == 5).await;
    assert_eq!(h.transport.max_in_flight_per_identity(), 1);

    let codec = test_codec();
    let names: Vec<String> = h
        .transport
        .published()
        .iter()
        .map(|record| {
            let event = codec.decode(record).unwrap();
            event.model_as::<Person>().unwrap().name.clone()
        })
        .collect();
    assert_eq!(names, vec!["v0", "v1", "v2", "v3", "v4"]);
    h.engine.stop().await;
}

#[tokio::test]
async fn different_identities_publish_in_parallel() {
    let h = harness(SyncConfig::default());
    h.transport.set_latency(Duration::from_millis(50));
    h.engine.start().await.unwrap();

    for n in 0..4 {
        h.adapter.write(person(&format!("p{n}"), "Ada")).await.unwrap();
    }
    wait_until("all published", || h.transport.publish_count() == 4).await;
    assert!(h.transport.max_in_flight_total() >= 2);
    assert_eq!(h.transport.max_in_flight_per_identity(), 1);
    h.engine.stop().await;
}

#[tokio::test]
async fn concurrency_limit_is_respected() {
    let h = harness(SyncConfig::default().with_max_concurrent_publishes(2));
    h.transport.set_latency(Duration::from_millis(20));
    h.engine.start().await.unwrap();

    for n in 0..6 {
        h.adapter.write(person(&format!("p{n}"), "Ada")).await.unwrap();
    }
    wait_until("all published", || h.transport.publish_count() == 6).await;
    assert!(h.transport.max_in_flight_total() <= 2);
    h.engine.stop().await;
}

#[tokio::test]
async fn stored_entries_publish_before_live_ones() {
    let h = harness(SyncConfig::default().with_max_concurrent_publishes(1));
    for n in 1..=3 {
        h.queue
            .enqueue(&mutsync_testkit::local_event(person(&format!("p{n}"), "stored")))
            .await
            .unwrap();
    }

    h.engine.start().await.unwrap();
    h.adapter.write(person("p4", "live")).await.unwrap();
    wait_until("all published", || h.transport.publish_count() == 4).await;

    let ids: Vec<String> = h
        .transport
        .published()
        .into_iter()
        .map(|record| record.model_id)
        .collect();
    assert_eq!(ids, vec!["p1", "p2", "p3", "p4"]);
    h.engine.stop().await;
}

#[tokio::test]
async fn retryable_failure_is_retried() {
    let h = harness(SyncConfig::default().with_retry(fast_retry(3)));
    let mut events = h.engine.events();
    h.transport.fail_model("p1", Some(2), true);
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    let event = wait_for_event(&mut events, |e| matches!(e, SyncEvent::Published { .. })).await;
    assert!(matches!(event, SyncEvent::Published { attempts: 3, .. }));

    assert_eq!(h.transport.attempts(), 3);
    let stats = h.engine.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.publish_failures, 2);
    assert_eq!(queue_len(&h.queue).await, 0);
    h.engine.stop().await;
}

#[tokio::test]
async fn fatal_failure_is_not_retried() {
    let h = harness(SyncConfig::default().with_retry(fast_retry(3)));
    h.transport.fail_model("p1", Some(1), false);
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    wait_until("failure", || h.engine.stats().publish_failures == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.transport.attempts(), 1);
    assert_eq!(h.engine.stats().retries, 0);
    assert_eq!(queue_len(&h.queue).await, 1);
    h.engine.stop().await;
}

#[tokio::test]
async fn publish_timeout_is_a_failure() {
    let h = harness(
        SyncConfig::default()
            .with_retry(RetryConfig::no_retry())
            .with_publish_timeout(Duration::from_millis(20)),
    );
    h.transport.set_latency(Duration::from_millis(500));
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    wait_until("timeout", || h.engine.stats().publish_failures == 1).await;
    assert_eq!(
        h.engine.stats().last_error.as_deref(),
        Some("operation timed out")
    );
    assert_eq!(queue_len(&h.queue).await, 1);
    h.engine.stop().await;
}

#[tokio::test]
async fn exhausted_entries_go_to_dead_letter() {
    let dead_letters = Arc::new(LogOutboxStore::in_memory().unwrap());
    let config = SyncConfig::default()
        .with_retry(fast_retry(2))
        .with_exhausted_policy(ExhaustedPolicy::DeadLetter(
            Arc::clone(&dead_letters) as Arc<dyn OutboxStore>
        ));
    let h = harness(config);
    h.transport.fail_model("p1", None, true);
    h.engine.start().await.unwrap();

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    wait_until("dead letter", || h.engine.stats().dead_lettered == 1).await;

    assert_eq!(dead_letters.len().unwrap(), 1);
    assert_eq!(dead_letters.entries().unwrap()[0].record.model_id, "p1");
    assert_eq!(queue_len(&h.queue).await, 0);
    assert_eq!(h.transport.attempts(), 2);

    // The identity is not held after dead-lettering.
    h.transport.heal_model("p1");
    h.adapter.write(person("p1", "Ada again")).await.unwrap();
    wait_until("later publish", || h.transport.publish_count() == 1).await;
    h.engine.stop().await;
}

#[tokio::test]
async fn undecodable_record_is_rejected_and_kept() {
    let h = harness(SyncConfig::default());
    let corrupt = MutationRecord {
        mutation_id: Uuid::new_v4(),
        model_id: "p1".into(),
        model_type: "Person".into(),
        kind: MutationKind::Update,
        payload: vec![0xff, 0x00],
        origin: Origin::Local,
    };
    h.queue.store().put(&corrupt).unwrap();

    let mut events = h.engine.events();
    h.engine.start().await.unwrap();
    h.adapter.write(post("t1", "p2", "Hello")).await.unwrap();

    let event =
        wait_for_event(&mut events, |e| matches!(e, SyncEvent::RecordRejected { .. })).await;
    assert!(matches!(
        event,
        SyncEvent::RecordRejected { mutation_id, .. } if mutation_id == corrupt.mutation_id
    ));

    wait_until("healthy record published", || h.transport.publish_count() == 1).await;
    assert_eq!(h.transport.published()[0].model_type, "Post");
    assert!(h.queue.store().contains(corrupt.mutation_id).unwrap());
    assert_eq!(h.engine.stats().rejected, 1);
    h.engine.stop().await;
}

#[tokio::test]
async fn storage_failure_fails_the_engine() {
    let h = harness(SyncConfig::default());
    let mut events = h.engine.events();
    h.engine.start().await.unwrap();

    h.adapter.set_unavailable(Some("disk detached".into()));
    let event = wait_for_event(&mut events, |e| matches!(e, SyncEvent::Failed { .. })).await;
    assert!(matches!(event, SyncEvent::Failed { reason } if reason.contains("disk detached")));
    assert_eq!(h.engine.state(), EngineState::Failed);

    h.adapter.set_unavailable(None);
    h.engine.start().await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Running);

    h.adapter.write(person("p1", "Ada")).await.unwrap();
    wait_until("publish after recovery", || h.transport.publish_count() == 1).await;
    h.engine.stop().await;
    assert_eq!(h.engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn stop_after_failure_settles_in_stopped() {
    let h = harness(SyncConfig::default());
    h.engine.start().await.unwrap();
    h.adapter.set_unavailable(Some("gone".into()));

    let mut states = h.engine.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == EngineState::Failed),
    )
    .await
    .unwrap()
    .unwrap();

    h.engine.stop().await;
    assert_eq!(h.engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn unregistered_model_counts_as_enqueue_failure() {
    let h = harness(SyncConfig::default());
    let mut events = h.engine.events();
    h.engine.start().await.unwrap();

    h.adapter
        .write(mutsync_testkit::Unregistered { id: "u1".into() })
        .await
        .unwrap();
    let event =
        wait_for_event(&mut events, |e| matches!(e, SyncEvent::EnqueueFailed { .. })).await;
    assert!(matches!(event, SyncEvent::EnqueueFailed { model_id, .. } if model_id == "u1"));
    assert_eq!(h.engine.stats().enqueue_failures, 1);
    assert_eq!(h.engine.state(), EngineState::Running);
    h.engine.stop().await;
}

#[tokio::test]
async fn file_outbox_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox.log");

    {
        let queue = Arc::new(OutgoingMutationQueue::open_file(&path, test_codec()).unwrap());
        let h = harness_with_queue(
            SyncConfig::default().with_retry(RetryConfig::no_retry()),
            queue,
        );
        h.transport.fail_model("p1", None, true);
        h.engine.start().await.unwrap();
        h.adapter.write(person("p1", "offline edit")).await.unwrap();
        wait_until("failure", || h.engine.stats().publish_failures == 1).await;
        h.engine.stop().await;
    }

    let queue = Arc::new(OutgoingMutationQueue::open_file(&path, test_codec()).unwrap());
    assert_eq!(queue_len(&queue).await, 1);

    let h = harness_with_queue(SyncConfig::default(), queue);
    h.engine.start().await.unwrap();
    wait_until("publish after restart", || h.transport.publish_count() == 1).await;
    wait_until("removal", || h.engine.stats().published == 1).await;
    assert_eq!(queue_len(&h.queue).await, 0);
    h.engine.stop().await;
}
