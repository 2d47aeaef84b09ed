// Benchmark snapshot save/diff on the filesystem store and agent-output normalization.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use cartograph_core::normalize::normalize;
use cartograph_core::store::{FsGraphStore, GraphSnapshot, GraphStore};
use cartograph_graph::{KnowledgeGraph, KnowledgeGraphNode, NodeType};

/// Synthetic module graph: node `i` depends on a few earlier nodes.
fn build_graph(node_count: usize, salt: usize) -> KnowledgeGraph {
    let nodes = (0..node_count)
        .map(|i| {
            let deps: Vec<String> = [1, 7, 31]
                .iter()
                .filter(|&&step| i >= step)
                .map(|step| format!("mod_{}", i - step))
                .collect();
            let mut node = KnowledgeGraphNode::new(format!("mod_{i}"), NodeType::Module)
                .with_dependencies(deps);
            if i % 10 == salt % 10 {
                node.name = format!("mod_{i}_v{salt}");
            }
            node
        })
        .collect();
    KnowledgeGraph::from_nodes(nodes)
}

fn bench_save(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("store_save");
    group.sample_size(20);

    for node_count in [100, 1_000, 5_000] {
        let snapshot = GraphSnapshot::from_graph(build_graph(node_count, 0));
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsGraphStore::new(dir.path());

        group.bench_with_input(BenchmarkId::new("nodes", node_count), &snapshot, |b, s| {
            b.iter(|| rt.block_on(store.save(s)).expect("save"));
        });
    }

    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("store_diff");

    for node_count in [100, 1_000, 5_000] {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsGraphStore::new(dir.path());
        let a = rt
            .block_on(store.save(&GraphSnapshot::from_graph(build_graph(node_count, 1))))
            .expect("save a");
        let b_version = rt
            .block_on(store.save(&GraphSnapshot::from_graph(build_graph(node_count, 2))))
            .expect("save b");

        group.bench_function(BenchmarkId::new("nodes", node_count), |b| {
            b.iter(|| rt.block_on(store.diff(a, b_version)).expect("diff"));
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    let payload = serde_json::json!({
        "nodes": (0..200)
            .map(|i| serde_json::json!({"id": format!("mod_{i}"), "type": "module"}))
            .collect::<Vec<_>>()
    })
    .to_string();
    let envelope = serde_json::json!({"type": "result", "result": payload}).to_string();
    let stream = format!(
        "{}\n{}\n{}",
        serde_json::json!({"type": "system", "subtype": "init"}),
        serde_json::json!({"type": "assistant", "message": {"content": "working"}}),
        envelope
    );
    let fenced = format!("Here is the graph:\n```json\n{payload}\n```\nDone.");

    group.bench_function("envelope_stream", |b| b.iter(|| normalize(&stream)));
    group.bench_function("fenced_text", |b| b.iter(|| normalize(&fenced)));
    group.bench_function("plain_text", |b| {
        b.iter(|| normalize("The change looks low risk; no structured output."));
    });

    group.finish();
}

criterion_group!(benches, bench_save, bench_diff, bench_normalize);
criterion_main!(benches);
