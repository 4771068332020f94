//! Pipeline integration tests.
//!
//! topic → queue → generator → keyed store → change log → watcher, wired
//! through [`crate::pipeline::Pipeline`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use aic_core::{GenerationRequest, ManualClock, RecordStatus, RequestId};

use crate::config::PipelineConfig;
use crate::cursor_store::ChangeCursorStore;
use crate::keyed_store::{ChangeLog, KeyedStore};
use crate::pipeline::Pipeline;
use crate::queue::DurableQueue;
use crate::workers::{
    FnGenerator, GenerationError, LivenessProbe, MemorySink, ParameterEchoGenerator,
    ProcessOutcome, StatusNotifier,
};

fn request(id: &str) -> GenerationRequest {
    GenerationRequest::new(
        RequestId::parse(id).unwrap(),
        serde_json::json!({"topic": "geometry", "difficulty": 2}),
        Utc::now(),
    )
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        generator_poll_interval: Duration::from_millis(5),
        watcher_poll_interval: Duration::from_millis(5),
        ..PipelineConfig::default()
    }
}

#[test]
fn forced_redeliveries_converge_to_one_record() {
    let clock = ManualClock::starting_now();
    let pipeline = Pipeline::with_clock(PipelineConfig::default(), clock.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let generator = pipeline.generator(FnGenerator::new(move |req| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({"question": format!("exercise for {}", req.request_id)}))
    }));

    let req = request("converge");
    pipeline.submit(req.clone()).unwrap();

    // Receivers crash k times before acking.
    let k = 3;
    for _ in 0..k {
        assert!(pipeline.queue().receive().unwrap().is_some());
        clock.advance(Duration::from_secs(30));
    }

    // The next holder writes the record but stalls past its window, so its
    // ack is rejected and the message goes out once more.
    let stalled = pipeline.queue().receive().unwrap().unwrap();
    clock.advance(Duration::from_secs(30));
    let current = pipeline.queue().receive().unwrap().unwrap();
    assert!(matches!(
        generator.process_delivery(stalled).unwrap(),
        ProcessOutcome::Completed { .. }
    ));
    assert!(matches!(
        generator.process_delivery(current).unwrap(),
        ProcessOutcome::AlreadyComplete { .. }
    ));

    // Same request published again by a retrying client.
    pipeline.submit(req.clone()).unwrap();
    while let Some(outcome) = generator.process_next().unwrap() {
        assert!(matches!(outcome, ProcessOutcome::AlreadyComplete { .. }));
    }

    let key = req.store_key();
    assert_eq!(pipeline.store().query_partition(&key.pk).unwrap().len(), 1);
    assert_eq!(pipeline.store().read_after(&key.pk, 0, 100).unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        pipeline.store().get(&key).unwrap().unwrap().status,
        RecordStatus::Complete
    );
}

#[test]
fn redelivery_waits_for_visibility_timeout() {
    let clock = ManualClock::starting_now();
    let pipeline = Pipeline::with_clock(PipelineConfig::default(), clock.clone());
    pipeline.submit(request("timing")).unwrap();

    let first = pipeline.queue().receive().unwrap().unwrap();
    clock.advance(Duration::from_millis(29_999));
    assert!(pipeline.queue().receive().unwrap().is_none());

    clock.advance(Duration::from_millis(1));
    let again = pipeline.queue().receive().unwrap().unwrap();
    assert_eq!(again.message_id, first.message_id);
}

#[test]
fn watcher_skips_backlog_written_before_first_start() {
    let clock = ManualClock::starting_now();
    let pipeline = Pipeline::with_clock(PipelineConfig::default(), clock.clone());
    let generator = pipeline.generator(ParameterEchoGenerator);

    pipeline.submit(request("before-1")).unwrap();
    pipeline.submit(request("before-2")).unwrap();
    while generator.process_next().unwrap().is_some() {}

    let notifier = Arc::new(StatusNotifier::new(MemorySink::new()));
    let watcher = pipeline.watcher(notifier.clone());
    assert!(watcher.initialize().unwrap());
    assert_eq!(watcher.poll_once().unwrap().applied, 0);

    pipeline.submit(request("after")).unwrap();
    while generator.process_next().unwrap().is_some() {}
    watcher.poll_once().unwrap();

    let sent = notifier.sink().notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].request_id, Some(RequestId::parse("after").unwrap()));

    // A second watcher instance for the same consumer does not skip again.
    assert!(!pipeline.watcher(notifier.clone()).initialize().unwrap());
    assert!(pipeline.cursors().is_initialized("watcher").unwrap());
}

#[test]
fn restarted_watcher_does_not_renotify_checkpointed_events() {
    let clock = ManualClock::starting_now();
    let pipeline = Pipeline::with_clock(PipelineConfig::default(), clock.clone());
    let generator = pipeline.generator(ParameterEchoGenerator);
    let sink = Arc::new(MemorySink::new());

    let first = pipeline.watcher(StatusNotifier::new(sink.clone()));
    first.initialize().unwrap();
    pipeline.submit(request("once")).unwrap();
    while generator.process_next().unwrap().is_some() {}
    first.poll_once().unwrap();
    assert_eq!(sink.notifications().len(), 1);
    drop(first);

    let second = pipeline.watcher(StatusNotifier::new(sink.clone()));
    assert!(!second.initialize().unwrap());
    let report = second.poll_once().unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(sink.notifications().len(), 1);

    pipeline.submit(request("twice")).unwrap();
    while generator.process_next().unwrap().is_some() {}
    second.poll_once().unwrap();
    let ids: Vec<_> = sink
        .notifications()
        .into_iter()
        .filter_map(|n| n.request_id)
        .collect();
    assert_eq!(
        ids,
        vec![RequestId::parse("once").unwrap(), RequestId::parse("twice").unwrap()]
    );
}

#[test]
fn failed_generation_is_visible_to_watcher() {
    let clock = ManualClock::starting_now();
    let config = PipelineConfig {
        max_receive_count: 2,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::with_clock(config, clock.clone());
    let notifier = Arc::new(StatusNotifier::new(MemorySink::new()));
    let watcher = pipeline.watcher(notifier.clone());
    watcher.initialize().unwrap();

    let generator = pipeline.generator(FnGenerator::new(|_req| {
        Err(GenerationError::Transient("model unavailable".into()))
    }));
    pipeline.submit(request("never")).unwrap();

    assert!(matches!(
        generator.process_next().unwrap(),
        Some(ProcessOutcome::Retrying { .. })
    ));
    clock.advance(Duration::from_secs(30));
    assert!(matches!(
        generator.process_next().unwrap(),
        Some(ProcessOutcome::Failed { attempts: 2, .. })
    ));

    watcher.poll_once().unwrap();
    let sent = notifier.sink().notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, RecordStatus::Failed);
    assert_eq!(pipeline.queue().dead_letters(10).unwrap().len(), 1);
}

#[test]
fn health_tracks_watcher_liveness_across_restart() {
    let config = PipelineConfig {
        liveness_window: Duration::from_millis(200),
        ..fast_config()
    };
    let pipeline = Pipeline::new(config);
    let heartbeat = pipeline.heartbeat().clone();
    assert!(!heartbeat.check().is_healthy());

    let handle = pipeline
        .watcher(StatusNotifier::new(MemorySink::new()))
        .spawn()
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || heartbeat.check().is_healthy()));

    handle.shutdown();
    assert!(wait_until(Duration::from_secs(5), || !heartbeat.check().is_healthy()));

    let restarted = pipeline
        .watcher(StatusNotifier::new(MemorySink::new()))
        .spawn()
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || heartbeat.check().is_healthy()));
    restarted.shutdown();
}

#[test]
fn end_to_end_publish_to_notification() {
    let pipeline = Pipeline::new(fast_config());
    let notifier = Arc::new(StatusNotifier::new(MemorySink::new()));
    let running = pipeline
        .start(ParameterEchoGenerator, notifier.clone())
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.cursors().is_initialized("watcher").unwrap_or(false)
    }));

    let ids: Vec<String> = (0..10).map(|i| format!("e2e-{i}")).collect();
    for id in &ids {
        let receipt = pipeline.submit(request(id)).unwrap();
        assert_eq!(receipt.delivered, 1);
    }

    assert!(wait_until(Duration::from_secs(10), || {
        notifier.sink().notifications().len() == ids.len()
    }));
    for id in &ids {
        let key = request(id).store_key();
        let rec = pipeline.store().get(&key).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Complete);
        assert_eq!(rec.content["requestId"], id.as_str());
    }
    assert!(wait_until(Duration::from_secs(5), || {
        running.generator_stats().completed == ids.len() as u64
    }));

    running.shutdown();
    let stats = pipeline.queue().stats().unwrap();
    assert_eq!(stats.visible + stats.in_flight, 0);
}
