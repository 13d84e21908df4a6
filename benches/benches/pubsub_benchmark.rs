use std::{
    hint::black_box,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use graphbus::{Backend, Endpoint, Node, NodeOptions, SubscriberCallback};
use graphbus_error::GraphBusResult;

fn node(
    backend: &Backend,
    node_ref: &str,
) -> GraphBusResult<Arc<Node>> {
    Node::new(
        backend.clone(),
        NodeOptions::default()
            .node_ref(node_ref)
            .spin_period(Duration::from_millis(1)),
    )
}

/// Публикация и приём одного сообщения через общий backend.
fn bench_publish_receive(c: &mut Criterion) {
    let backend = Backend::in_memory();
    let talker = node(&backend, "talker").unwrap();
    let listener = node(&backend, "listener").unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let subscriber = listener
        .create_subscription(
            "/bench",
            "u64",
            SubscriberCallback::typed(move |_: u64| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            None,
            None,
        )
        .unwrap();
    let publisher = talker.create_publisher("/bench", "u64", None, None).unwrap();

    let mut group = c.benchmark_group("pubsub");
    group.throughput(Throughput::Elements(1));
    group.bench_function("instant_publish_then_spin", |b| {
        let mut seq = 0u64;
        b.iter(|| {
            publisher.publish(&seq, true).unwrap();
            subscriber.spin().unwrap();
            seq += 1;
        })
    });
    group.bench_function("cached_publish_flush", |b| {
        b.iter(|| {
            for i in 0..16u64 {
                publisher.publish(black_box(&i), false).unwrap();
            }
            publisher.spin().unwrap();
            for _ in 0..16 {
                subscriber.spin().unwrap();
            }
        })
    });
    group.finish();

    black_box(received.load(Ordering::Relaxed));
    talker.destroy().unwrap();
    listener.destroy().unwrap();
}

fn bench_shared_variable(c: &mut Criterion) {
    let backend = Backend::in_memory();
    let n = node(&backend, "sv").unwrap();
    let variable = n
        .declare_shared_variable(graphbus::SharedVariableDecl::new("counter", 0), None)
        .unwrap();

    c.bench_function("shared_variable_instant_set", |b| {
        let mut value = 0i64;
        b.iter(|| {
            value += 1;
            black_box(variable.set_value(value, true).unwrap());
        })
    });
    c.bench_function("shared_variable_get_spin", |b| {
        b.iter(|| black_box(variable.get_value(true).unwrap()))
    });
    n.destroy().unwrap();
}

criterion_group!(benches, bench_publish_receive, bench_shared_variable);
criterion_main!(benches);
