//! End-to-end tests for committing and DAG fragments.
//!
//! These tests drive complete workflows through the public API: commits on
//! shared stores, stage-2 failures with injected faults, concurrent
//! committers racing on identical content, and the fringe handshake between
//! two repositories.

use dagcore::storage::{AuditLog, AuditRecord, DagTx};
use dagcore::{
    Audit, Changeset, ContentId, DagError, DagNum, DagStore, Dagnode, DagnodeFetch,
    EntryKind, FragNode, MemberState, MemoryBlobStore, MemoryDagStore, ReferenceKind, Repo,
    RepoConfig, Result, TreeNode,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> RepoConfig {
    RepoConfig::new("repo-e2e", "admin-e2e")
}

/// Commits a one-file tree snapshot on the version-control DAG.
fn commit_snapshot(
    repo: &Repo,
    who: &str,
    parents: &[ContentId],
    file_content: &[u8],
) -> Result<(Changeset, Dagnode)> {
    let mut commit = repo.begin_commit(DagNum::VERSION_CONTROL, Audit::now(who))?;
    for parent in parents {
        commit.add_parent(*parent)?;
    }
    let file = commit.add_bytes(file_content, false)?;
    commit.add_reference(ReferenceKind::File, file)?;

    let mut tree = TreeNode::new();
    tree.insert("README", EntryKind::File, file)?;
    let root = commit.add_structural_object(&tree)?;
    commit.set_tree_root(Some(root))?;
    commit.end()
}

// =============================================================================
// Commit and Frag Workflow
// =============================================================================

/// Two commits, then frags of depth 1 and 0 from the leaf.
#[test]
fn test_commit_then_frag_workflow() {
    init_tracing();
    let repo = Repo::in_memory(config()).unwrap();

    let (a, node_a) = commit_snapshot(&repo, "alice", &[], b"T1").unwrap();
    let a_id = *a.id().unwrap();
    let (b, node_b) = commit_snapshot(&repo, "alice", &[a_id], b"T2").unwrap();
    let b_id = *b.id().unwrap();

    assert_eq!(node_a.generation(), 1);
    assert_eq!(node_b.generation(), 2);
    assert_eq!(a.generation(&repo).unwrap(), 1);
    assert_eq!(b.generation(&repo).unwrap(), 2);
    assert_eq!(b.parents(), &BTreeSet::from([a_id]));
    assert_ne!(a.tree_root(), b.tree_root());

    // One generation back from B reaches the root; nothing is excluded.
    let frag = repo.build_frag(DagNum::VERSION_CONTROL, 1).unwrap();
    assert_eq!(frag.len(), 2);
    assert!(matches!(
        frag.query(&b_id),
        Some(FragNode::Member { state: MemberState::Start, .. })
    ));
    assert!(matches!(
        frag.query(&a_id),
        Some(FragNode::Member { state: MemberState::Interior, .. })
    ));
    assert_eq!(frag.fringe_len(), 0);

    // Zero generations: only B, with A on the fringe.
    let frag = repo.build_frag(DagNum::VERSION_CONTROL, 0).unwrap();
    assert_eq!(frag.len(), 1);
    assert_eq!(frag.query(&a_id), Some(FragNode::Fringe { generation: 1 }));
    assert!(frag.query(&a_id).unwrap().dagnode().is_none());

    // Loading a stored changeset gives back exactly what was committed.
    let loaded = repo.load_changeset(&b_id).unwrap();
    assert_eq!(loaded, b);
}

/// A db DAG carries db roots and records instead of trees.
#[test]
fn test_db_dag_commit() {
    let repo = Repo::in_memory(config()).unwrap();
    let mut commit = repo
        .begin_commit(DagNum::WORK_ITEMS, Audit::now("carol"))
        .unwrap();

    let template = commit.add_bytes(br#"{"fields":["title"]}"#, false).unwrap();
    commit
        .add_reference(ReferenceKind::DbTemplate, template)
        .unwrap();
    let record = dagcore::DbRecord::new(template).with_field("title", "Login fails");
    let record_id = commit.add_structural_object(&record).unwrap();
    assert!(commit.set_tree_root(None).is_err());
    commit
        .set_db_state(dagcore::DbState {
            delta_root: Some(record_id),
            template: Some(template),
        })
        .unwrap();

    let (changeset, node) = commit.end().unwrap();
    assert!(node.is_root());
    assert_eq!(changeset.db_state().unwrap().template, Some(template));
    assert!(repo.leaves(DagNum::VERSION_CONTROL).unwrap().is_empty());
    assert_eq!(repo.leaves(DagNum::WORK_ITEMS).unwrap().len(), 1);
}

// =============================================================================
// Fault Injection
// =============================================================================

/// DAG store that can be told to fail linking.
struct FlakyDagStore {
    inner: MemoryDagStore,
    fail_append: AtomicBool,
    fail_commit: AtomicBool,
}

impl FlakyDagStore {
    fn new() -> Self {
        Self {
            inner: MemoryDagStore::new(),
            fail_append: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
        }
    }
}

impl DagnodeFetch for FlakyDagStore {
    fn fetch_node(&self, dag_num: DagNum, id: &ContentId) -> Result<Dagnode> {
        self.inner.fetch_node(dag_num, id)
    }
}

impl AuditLog for FlakyDagStore {
    fn audits_for(&self, dag_num: DagNum, changeset_id: &ContentId) -> Result<Vec<AuditRecord>> {
        self.inner.audits_for(dag_num, changeset_id)
    }
}

impl DagStore for FlakyDagStore {
    fn begin_dag_tx(&self) -> Result<DagTx> {
        self.inner.begin_dag_tx()
    }

    fn append_node(&self, tx: &mut DagTx, dag_num: DagNum, node: &Dagnode) -> Result<()> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(DagError::storage("injected append failure"));
        }
        self.inner.append_node(tx, dag_num, node)
    }

    fn fetch_leaves(&self, dag_num: DagNum) -> Result<BTreeSet<ContentId>> {
        self.inner.fetch_leaves(dag_num)
    }

    fn contains(&self, dag_num: DagNum, id: &ContentId) -> Result<bool> {
        self.inner.contains(dag_num, id)
    }

    fn commit_dag_tx(&self, tx: DagTx) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            self.inner.abort_dag_tx(tx)?;
            return Err(DagError::storage("injected commit failure"));
        }
        self.inner.commit_dag_tx(tx)
    }

    fn abort_dag_tx(&self, tx: DagTx) -> Result<()> {
        self.inner.abort_dag_tx(tx)
    }
}

/// A failed stage 2 leaves a loadable changeset that no traversal reaches.
#[test]
fn test_stage_two_failure_leaves_unlinked_changeset() {
    init_tracing();
    let dags = Arc::new(FlakyDagStore::new());
    let repo = Repo::open(config(), Arc::new(MemoryBlobStore::new()), dags.clone()).unwrap();

    let (root, _) = commit_snapshot(&repo, "alice", &[], b"base").unwrap();
    let root_id = *root.id().unwrap();

    for flag in [&dags.fail_append, &dags.fail_commit] {
        flag.store(true, Ordering::SeqCst);
        let err = commit_snapshot(&repo, "alice", &[root_id], b"interrupted").unwrap_err();
        flag.store(false, Ordering::SeqCst);

        let orphan = *err
            .changeset_persisted()
            .expect("stage 2 failure must name the persisted changeset");
        assert!(matches!(err, DagError::ChangesetUnlinked { .. }));

        let leaves = repo.leaves(DagNum::VERSION_CONTROL).unwrap();
        assert_eq!(leaves, BTreeSet::from([root_id]));
        assert!(!leaves.contains(&orphan));

        let loaded = Changeset::load(repo.blobs(), &orphan, true).unwrap();
        assert_eq!(loaded.parents(), &BTreeSet::from([root_id]));
        assert!(dags
            .audits_for(DagNum::VERSION_CONTROL, &orphan)
            .unwrap()
            .is_empty());
    }

    // Retrying the same commit links the already-persisted changeset.
    let (retried, node) = commit_snapshot(&repo, "alice", &[root_id], b"interrupted").unwrap();
    assert_eq!(node.generation(), 2);
    assert_eq!(
        repo.leaves(DagNum::VERSION_CONTROL).unwrap(),
        BTreeSet::from([*retried.id().unwrap()])
    );
}

/// Stage 1 failures are plain errors: nothing was persisted.
#[test]
fn test_stage_one_failure_is_not_unlinked() {
    let repo = Repo::in_memory(config()).unwrap();
    let commit = repo
        .begin_commit(DagNum::VERSION_CONTROL, Audit::now("alice"))
        .unwrap();
    let err = commit.end().unwrap_err();
    assert!(err.changeset_persisted().is_none());
    assert!(matches!(err, DagError::IncompleteChangeset(_)));
}

// =============================================================================
// Concurrency
// =============================================================================

/// Two committers produce byte-identical changesets at the same time.
#[test]
fn test_concurrent_identical_commits_link_once() {
    init_tracing();
    let blobs = Arc::new(MemoryBlobStore::new());
    let dags = Arc::new(MemoryDagStore::new());

    for _ in 0..20 {
        let barrier = Barrier::new(2);
        let results: Vec<(ContentId, i32)> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["alice", "bob"]
                .into_iter()
                .map(|who| {
                    let repo = Repo::open(config(), blobs.clone(), dags.clone()).unwrap();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let mut commit = repo
                            .begin_commit(DagNum::VERSION_CONTROL, Audit::now(who))
                            .unwrap();
                        let file = commit.add_bytes(b"same content", false).unwrap();
                        commit.add_reference(ReferenceKind::File, file).unwrap();
                        commit.set_tree_root(None).unwrap();
                        barrier.wait();
                        let (changeset, node) = commit.end().expect("both committers succeed");
                        (*changeset.id().unwrap(), node.generation())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].1, 1);
        assert_eq!(dags.node_count(DagNum::VERSION_CONTROL), 1);
        assert_eq!(
            dags.fetch_leaves(DagNum::VERSION_CONTROL).unwrap(),
            BTreeSet::from([results[0].0])
        );
    }
}

// =============================================================================
// Sync Handshake
// =============================================================================

/// The receiver deepens the frag until it knows every fringe id, then
/// grafts the members in order.
#[test]
fn test_fringe_handshake_between_repositories() {
    init_tracing();
    let sender = Repo::in_memory(config()).unwrap();
    let receiver_dags = MemoryDagStore::new();

    let mut parent: Option<ContentId> = None;
    let mut ids = Vec::new();
    for n in 0..6u8 {
        let parents: Vec<ContentId> = parent.into_iter().collect();
        let (cs, node) = commit_snapshot(&sender, "alice", &parents, &[n]).unwrap();
        // The receiver already has the first three.
        if n < 3 {
            let mut tx = receiver_dags.begin_dag_tx().unwrap();
            receiver_dags
                .append_node(&mut tx, DagNum::VERSION_CONTROL, &node)
                .unwrap();
            receiver_dags.commit_dag_tx(tx).unwrap();
        }
        parent = cs.id().copied();
        ids.push(*cs.id().unwrap());
    }

    let shallow = sender.build_frag(DagNum::VERSION_CONTROL, 1).unwrap();
    let doc = shallow.serialize().unwrap();
    let received = dagcore::DagFrag::deserialize(&doc).unwrap();
    assert_eq!(received.unknown_fringe(&receiver_dags).unwrap(), vec![ids[3]]);

    let deeper = sender.build_frag(DagNum::VERSION_CONTROL, 2).unwrap();
    let received = dagcore::DagFrag::deserialize(&deeper.serialize().unwrap()).unwrap();
    assert!(received.unknown_fringe(&receiver_dags).unwrap().is_empty());

    let mut tx = receiver_dags.begin_dag_tx().unwrap();
    for (node, _) in received.members() {
        receiver_dags
            .append_node(&mut tx, DagNum::VERSION_CONTROL, node)
            .unwrap();
    }
    receiver_dags.commit_dag_tx(tx).unwrap();
    assert_eq!(
        receiver_dags.fetch_leaves(DagNum::VERSION_CONTROL).unwrap(),
        BTreeSet::from([ids[5]])
    );
}

// =============================================================================
// RocksDB
// =============================================================================

#[cfg(feature = "rocksdb")]
#[test]
fn test_rocksdb_repository_survives_reopen() {
    use dagcore::storage::RocksDbConfig;

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("repo");

    let leaf = {
        let repo = Repo::open_rocksdb(config(), &path, &RocksDbConfig::default()).unwrap();
        let (a, _) = commit_snapshot(&repo, "alice", &[], b"one").unwrap();
        let (b, _) = commit_snapshot(&repo, "alice", &[*a.id().unwrap()], b"two").unwrap();
        *b.id().unwrap()
    };

    let repo = Repo::open_rocksdb(config(), &path, &RocksDbConfig::default()).unwrap();
    assert_eq!(
        repo.leaves(DagNum::VERSION_CONTROL).unwrap(),
        BTreeSet::from([leaf])
    );
    let loaded = repo.load_changeset(&leaf).unwrap();
    assert_eq!(loaded.generation(&repo).unwrap(), 2);
    assert_eq!(repo.build_frag(DagNum::VERSION_CONTROL, 5).unwrap().len(), 2);
}
