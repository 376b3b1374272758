// Benchmark traversal queries: impact, shortest path and cycle search at varying graph sizes.

use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use layermap_core::graph::Graph;
use layermap_core::hash;
use layermap_core::query::{CycleLimits, Direction, EdgeFilter, find_cycles, impact, shortest_path};
use layermap_core::store::GraphStore;
use layermap_core::types::{Edge, GraphDiff, Node, NodeId};
use layermap_extract::{EdgeKind, LineRange, NodeKind};

fn method_id(i: usize) -> NodeId {
    hash::node_id(NodeKind::ServiceMethod, &format!("com.acme.S{}.m{i}/0", i / 10))
}

/// Build a synthetic call graph published through the store.
///
/// Edges connect method `i` to `(i * prime + 1) % node_count` for several
/// primes, giving a sparse graph with plenty of cycles.
fn build_synthetic_graph(node_count: usize, edge_factor: usize) -> Arc<Graph> {
    let path = "bench/Synthetic.java";
    let mut diff = GraphDiff::new(hash::file_key(path, &node_count.to_string()), path);
    for i in 0..node_count {
        let signature = format!("com.acme.S{}.m{i}/0", i / 10);
        diff.nodes.push(Node {
            id: method_id(i),
            kind: NodeKind::ServiceMethod,
            source_file: Some(path.into()),
            line_range: LineRange::line(1),
            name: format!("m{i}"),
            signature,
            attributes: BTreeMap::new(),
        });
    }

    let primes = [7, 13, 31, 61, 127, 251];
    for &prime in &primes[..edge_factor.min(primes.len())] {
        for i in 0..node_count {
            let target = (i.wrapping_mul(prime).wrapping_add(1)) % node_count;
            if target != i {
                let confidence = if target % 3 == 0 { 0.8 } else { 1.0 };
                diff.edges.push(Edge::new(
                    method_id(i),
                    method_id(target),
                    EdgeKind::Invokes,
                    confidence,
                ));
            }
        }
    }

    let store = GraphStore::new();
    store.apply_diff(diff).unwrap()
}

fn bench_impact(c: &mut Criterion) {
    let mut group = c.benchmark_group("impact");

    for node_count in [1_000, 10_000] {
        let graph = build_synthetic_graph(node_count, 3);
        let origin = method_id(0);

        group.bench_with_input(BenchmarkId::new("unbounded", node_count), &graph, |b, g| {
            b.iter(|| impact(g, origin, Direction::Forward, &EdgeFilter::default()).unwrap());
        });
        let bounded = EdgeFilter::default().with_max_depth(4);
        group.bench_with_input(BenchmarkId::new("depth_4", node_count), &graph, |b, g| {
            b.iter(|| impact(g, origin, Direction::Forward, &bounded).unwrap());
        });
    }

    group.finish();
}

fn bench_shortest_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("shortest_path");

    for node_count in [1_000, 10_000] {
        let graph = build_synthetic_graph(node_count, 3);
        let (from, to) = (method_id(0), method_id(node_count / 2));

        group.bench_with_input(BenchmarkId::new("nodes", node_count), &graph, |b, g| {
            b.iter(|| shortest_path(g, from, to, &EdgeFilter::default()).ok());
        });
    }

    group.finish();
}

fn bench_cycles(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycles");
    // Enumeration is exponential in the worst case, so keep sizes smaller
    group.sample_size(10);

    for node_count in [100, 1_000] {
        let graph = build_synthetic_graph(node_count, 2);
        let limits = CycleLimits {
            max_length: 6,
            max_cycles: 1_000,
        };

        group.bench_with_input(BenchmarkId::new("nodes", node_count), &graph, |b, g| {
            b.iter(|| find_cycles(g, &EdgeFilter::default(), limits));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_impact, bench_shortest_path, bench_cycles);
criterion_main!(benches);
