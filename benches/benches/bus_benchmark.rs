use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use graphbus::{backend::Subscription, topic_path, Broker, Envelope};
use serde_json::json;

fn bench_subscribe(c: &mut Criterion) {
    let broker = Broker::default();
    c.bench_function("broker_subscribe", |b| {
        b.iter(|| {
            let _sub = black_box(broker.subscribe_topic("/chan"));
        })
    });
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("broker_publish");
    for subscribers in [0usize, 1, 10, 100] {
        let broker = Broker::default();
        let mut subs: Vec<Subscription> = (0..subscribers)
            .map(|_| broker.subscribe_topic("/chan"))
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    broker.publish_payload("/chan", black_box(Bytes::from_static(b"x")));
                    // приёмники не должны отставать
                    for sub in subs.iter_mut() {
                        let _ = sub.try_next();
                    }
                })
            },
        );
    }
    group.finish();
}

fn bench_envelope_codec(c: &mut Criterion) {
    let envelope = Envelope::new(
        "geometry/Pose",
        "robot",
        "5f0c2a54-pub",
        json!({"x": 1.5, "y": -2.25, "theta": 0.785}),
    );
    let encoded = envelope.encode().unwrap();

    c.bench_function("envelope_encode", |b| {
        b.iter(|| black_box(envelope.encode().unwrap()))
    });
    c.bench_function("envelope_decode", |b| {
        b.iter(|| black_box(Envelope::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_topic_path(c: &mut Criterion) {
    c.bench_function("topic_path", |b| {
        b.iter(|| black_box(topic_path(black_box(["/robot/", "arm//", "joint_states"]))))
    });
}

criterion_group!(
    benches,
    bench_subscribe,
    bench_publish,
    bench_envelope_codec,
    bench_topic_path
);
criterion_main!(benches);
