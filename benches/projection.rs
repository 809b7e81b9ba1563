//! Benchmark: Filtered Projection
//!
//! Measures full recompute and incremental updates on wide and deep graphs.
//! Run: cargo bench --bench projection

use arbor::{Arbor, Node, Priority};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// `width` roots, each with a chain of `depth` descendants
fn build(width: usize, depth: usize) -> Arbor<u32> {
    let arbor = Arbor::new();
    arbor
        .register_filter_fn("even", |n| n.data() % 2 == 0)
        .unwrap();
    for w in 0..width {
        let mut parent: Option<String> = None;
        for d in 0..depth {
            let id = format!("n{}_{}", w, d);
            arbor
                .add_node(Node::new(&id, (w + d) as u32), parent.as_deref(), Priority::Low)
                .unwrap();
            parent = Some(id);
        }
    }
    arbor
}

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("refresh");

    for (width, depth) in [(100, 1), (20, 5), (5, 20)] {
        let arbor = build(width, depth);
        let view = arbor.view(None, true);
        view.apply_filter("even", None, false, true).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, depth)),
            &view,
            |b, view| {
                b.iter(|| {
                    view.refilter().unwrap();
                    black_box(view.child_count(None, false))
                });
            },
        );
    }

    group.finish();
}

fn bench_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental");

    let arbor = build(20, 5);
    let view = arbor.view(None, true);
    view.apply_filter("even", None, false, true).unwrap();

    group.bench_function("toggle_visibility", |b| {
        b.iter(|| {
            arbor.modify_node_with("n3_2", |v| *v += 1).unwrap();
            black_box(view.is_displayed("n3_2"))
        });
    });

    group.bench_function("add_remove_leaf", |b| {
        b.iter(|| {
            arbor
                .add_node(Node::new("leaf", 2), Some("n4_4"), Priority::Low)
                .unwrap();
            arbor.remove_node("leaf", false).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_refresh, bench_incremental);
criterion_main!(benches);
