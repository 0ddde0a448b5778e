use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mocktree_core::{EventKind, Reference, TreeConfig};
use serde_json::{json, Map, Value};

const SIZES: &[usize] = &[10, 100, 1_000];

fn wide_object(count: usize) -> Value {
    Value::Object(
        (0..count)
            .map(|i| (format!("k{i:05}"), json!({ "n": i, "tag": "x" })))
            .collect::<Map<_, _>>(),
    )
}

fn listened_tree() -> Reference {
    let root = Reference::new(&TreeConfig::default());
    for kind in EventKind::ALL {
        root.on(kind, |snapshot, _| {
            black_box(snapshot.exists());
        });
    }
    root
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate.set");
    for &count in SIZES {
        let data = wide_object(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("fresh", count), &data, |b, data| {
            b.iter(|| {
                let root = listened_tree();
                root.set(data.clone()).ok();
                root.flush().ok();
                black_box(root.get_ordered_child_keys().len())
            })
        });
        group.bench_with_input(BenchmarkId::new("idempotent", count), &data, |b, data| {
            let root = listened_tree();
            root.set(data.clone()).ok();
            root.flush().ok();
            b.iter(|| {
                root.set(data.clone()).ok();
                root.flush().ok();
            })
        });
    }
    group.finish();
}

fn bench_leaf_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate.leaf");
    for &count in SIZES {
        let root = Reference::with_data(&TreeConfig::default(), wide_object(count))
            .unwrap_or_else(|_| Reference::new(&TreeConfig::default()));
        let leaf = root.child("k00000/n").unwrap_or_else(|_| root.clone());
        let mut n = 0u64;
        group.bench_function(BenchmarkId::new("set", count), |b| {
            b.iter(|| {
                n += 1;
                leaf.set(json!(n)).ok();
                root.flush().ok();
            })
        });
    }
    group.finish();
}

fn bench_reprioritize(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate.priority");
    for &count in SIZES {
        let root = Reference::with_data(&TreeConfig::default(), wide_object(count))
            .unwrap_or_else(|_| Reference::new(&TreeConfig::default()));
        let keys = root.get_ordered_child_keys();
        let mut round = 0.0;
        group.bench_function(BenchmarkId::new("move_first_to_last", count), |b| {
            b.iter(|| {
                round += 1.0;
                if let Ok(child) = root.child(&keys[0]) {
                    child.set_priority(round);
                }
                root.flush().ok();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_set, bench_leaf_write, bench_reprioritize);
criterion_main!(benches);
