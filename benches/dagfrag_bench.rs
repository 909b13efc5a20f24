//! Benchmarks for committing, frag building and the frag transport form.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dagcore::{
    Audit, ContentId, DagFrag, DagNum, DagStore, Dagnode, MemoryDagStore, ReferenceKind, Repo,
    RepoConfig,
};

/// Links a history of `len` nodes where every fourth node also links an older ancestor.
fn build_history(len: usize) -> (MemoryDagStore, ContentId) {
    let store = MemoryDagStore::new();
    let mut main: Option<Dagnode> = None;
    let mut side: Option<Dagnode> = None;

    for i in 0..len {
        let id = ContentId::of_bytes(format!("bench-{}", i).as_bytes());
        let mut parents: Vec<&Dagnode> = main.iter().collect();
        if i % 4 == 3 {
            parents.extend(side.iter());
        }
        let generation = parents.iter().map(|p| p.generation()).max().unwrap_or(0) + 1;
        let node = Dagnode::new(id, generation, parents.iter().map(|p| *p.id())).unwrap();

        let mut tx = store.begin_dag_tx().unwrap();
        store
            .append_node(&mut tx, DagNum::VERSION_CONTROL, &node)
            .unwrap();
        store.commit_dag_tx(tx).unwrap();

        if i % 4 == 1 {
            side = main.replace(node);
        } else {
            main = Some(node);
        }
    }

    let leaf = *main.unwrap().id();
    (store, leaf)
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for size in [64usize, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("single_blob", size), &size, |b, &size| {
            let repo = Repo::in_memory(RepoConfig::new("bench", "admin")).unwrap();
            let mut counter = 0u64;
            b.iter(|| {
                counter += 1;
                let mut content = vec![0u8; size];
                content[..8].copy_from_slice(&counter.to_le_bytes());

                let mut commit = repo
                    .begin_commit(DagNum::VERSION_CONTROL, Audit::new("bench", counter))
                    .unwrap();
                let blob = commit.add_bytes(black_box(&content), false).unwrap();
                commit.add_reference(ReferenceKind::File, blob).unwrap();
                commit.set_tree_root(Some(blob)).unwrap();
                commit.end().unwrap()
            })
        });
    }

    group.finish();
}

fn bench_frag_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("frag_build");
    let (store, leaf) = build_history(2000);

    for generations in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("load_ancestors", generations),
            &generations,
            |b, &generations| {
                b.iter(|| {
                    let mut frag =
                        DagFrag::new("bench", "admin", DagNum::VERSION_CONTROL).unwrap();
                    frag.load_ancestors(&store, black_box(&leaf), generations)
                        .unwrap();
                    frag
                })
            },
        );
    }

    group.finish();
}

fn bench_frag_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("frag_wire");
    let (store, leaf) = build_history(1000);
    let mut frag = DagFrag::new("bench", "admin", DagNum::VERSION_CONTROL).unwrap();
    frag.load_ancestors(&store, &leaf, 500).unwrap();
    let doc = frag.serialize().unwrap();

    group.bench_function("serialize_500_generations", |b| {
        b.iter(|| black_box(&frag).serialize().unwrap())
    });
    group.bench_function("deserialize_500_generations", |b| {
        b.iter(|| DagFrag::deserialize(black_box(&doc)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_commit, bench_frag_build, bench_frag_wire);
criterion_main!(benches);
