use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use aic_core::{ExerciseRecord, GenerationRequest, RecordStatus, RequestId, StoreKey};
use aic_infra::keyed_store::{ChangeLog, InMemoryKeyedStore, KeyedStore};
use aic_infra::queue::{DurableQueue, InMemoryQueue, QueueConfig};
use aic_infra::workers::{GeneratorConfig, GeneratorWorker, ParameterEchoGenerator};
use chrono::Utc;
use std::sync::Arc;

fn request_body(i: usize) -> serde_json::Value {
    let req = GenerationRequest::new(
        RequestId::parse(format!("bench-{i}")).unwrap(),
        serde_json::json!({"topic": "arithmetic", "level": i % 5}),
        Utc::now(),
    );
    serde_json::to_value(req).unwrap()
}

fn bench_queue_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue_receive_ack");
    for size in [100usize, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = InMemoryQueue::new(QueueConfig::default());
                for i in 0..size {
                    queue.enqueue(request_body(i)).unwrap();
                }
                while let Some(d) = queue.receive().unwrap() {
                    queue.ack(black_box(d.receipt)).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_store_put_and_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_store_put");
    for partitions in [1usize, 64] {
        group.throughput(Throughput::Elements(1_000));
        group.bench_with_input(
            BenchmarkId::new("partitions", partitions),
            &partitions,
            |b, &partitions| {
                b.iter(|| {
                    let store = InMemoryKeyedStore::new();
                    for i in 0..1_000 {
                        store
                            .put(ExerciseRecord {
                                key: StoreKey::new(format!("REQUEST#{}", i % partitions), "EXERCISE"),
                                content: serde_json::json!({ "i": i }),
                                status: RecordStatus::Complete,
                                updated_at: Utc::now(),
                            })
                            .unwrap();
                    }
                    black_box(store.heads().unwrap());
                });
            },
        );
    }
    group.finish();
}

fn bench_generator_drain(c: &mut Criterion) {
    c.bench_function("generator_process_1000", |b| {
        b.iter(|| {
            let queue = Arc::new(InMemoryQueue::new(QueueConfig::default()));
            let store = Arc::new(InMemoryKeyedStore::new());
            for i in 0..1_000 {
                queue.enqueue(request_body(i)).unwrap();
            }
            let worker = GeneratorWorker::new(
                GeneratorConfig::default(),
                queue.clone(),
                store.clone(),
                ParameterEchoGenerator,
            );
            while worker.process_next().unwrap().is_some() {}
            black_box(store.len());
        });
    });
}

criterion_group!(
    benches,
    bench_queue_round_trip,
    bench_store_put_and_log,
    bench_generator_drain
);
criterion_main!(benches);
