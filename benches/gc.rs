use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use parking_lot::Mutex;
use tracegc::{collect, process_events, Collectable, Edge, Root};

#[allow(dead_code)]
struct Blob(u64);
impl Collectable for Blob {}

struct Node {
    next: Mutex<Edge<Node>>,
}
impl Collectable for Node {}

fn chain(len: usize) -> Root<Node> {
    let head = Root::new_with(|owner| Node {
        next: Mutex::new(Edge::new(owner)),
    });
    let mut tail = head.clone();
    for _ in 1..len {
        let next = Root::new_with(|owner| Node {
            next: Mutex::new(Edge::new(owner)),
        });
        tail.next.lock().set(&next);
        tail = next;
    }
    head
}

fn bench_intake(c: &mut Criterion) {
    tracegc::init();
    c.bench_function("root_churn_100", |b| {
        b.iter(|| {
            for i in 0..100u64 {
                black_box(Root::new(Blob(i)));
            }
            // Drain and reclaim so the registry stays flat across iterations.
            process_events();
            collect();
        });
    });
}

fn bench_collect(c: &mut Criterion) {
    tracegc::init();
    c.bench_function("collect_chain_100", |b| {
        b.iter_batched(
            || chain(100),
            |head| {
                drop(head);
                collect();
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_intake, bench_collect);
criterion_main!(benches);
