//! In-memory blob and DAG stores.
//!
//! Both stores are thread-safe and can be shared between concurrent
//! committers through an `Arc`. Blob transactions buffer their writes until
//! commit; DAG transactions stage nodes and audit records the same way.

use crate::dag::{ContentId, DagNodeOps, DagNum, Dagnode};
use crate::error::{DagError, Result};
use crate::storage::{
    check_node_links, AuditLog, AuditRecord, BlobHint, BlobStore, BlobTx, DagStore, DagTx,
    DagnodeFetch,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| DagError::storage("In-memory store lock poisoned"))
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| DagError::storage("In-memory store lock poisoned"))
}

// =============================================================================
// Blobs
// =============================================================================

#[derive(Debug)]
struct StoredBlob {
    bytes: Vec<u8>,
    hint: BlobHint,
}

/// In-memory content-addressed blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentId, StoredBlob>>,
    next_tx: AtomicU64,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed blobs.
    pub fn len(&self) -> usize {
        read_lock(&self.blobs).map(|b| b.len()).unwrap_or(0)
    }

    /// Returns true if no blob is committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the hint a committed blob was stored with.
    pub fn hint_of(&self, id: &ContentId) -> Result<BlobHint> {
        read_lock(&self.blobs)?
            .get(id)
            .map(|b| b.hint)
            .ok_or(DagError::BlobNotFound(*id))
    }
}

impl BlobStore for MemoryBlobStore {
    fn begin_tx(&self) -> Result<BlobTx> {
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(tx = id, "blob_begin_tx");
        Ok(BlobTx::new(id))
    }

    fn store_bytes(&self, tx: &mut BlobTx, bytes: &[u8], hint: BlobHint) -> Result<ContentId> {
        let id = ContentId::of_bytes(bytes);

        if read_lock(&self.blobs)?.contains_key(&id) || tx.is_staged(&id) {
            trace!(tx = tx.id(), blob = %id.short(), "blob_store: content already present");
            return Ok(id);
        }

        trace!(
            tx = tx.id(),
            blob = %id.short(),
            bytes = bytes.len(),
            "blob_store: staging blob"
        );
        tx.stage(id, bytes.to_vec(), hint);
        Ok(id)
    }

    fn fetch(&self, id: &ContentId) -> Result<Vec<u8>> {
        read_lock(&self.blobs)?
            .get(id)
            .map(|b| b.bytes.clone())
            .ok_or(DagError::BlobNotFound(*id))
    }

    fn exists(&self, id: &ContentId) -> Result<bool> {
        Ok(read_lock(&self.blobs)?.contains_key(id))
    }

    fn commit_tx(&self, mut tx: BlobTx) -> Result<()> {
        let staged = tx.take_staged();
        let mut blobs = write_lock(&self.blobs)?;
        let mut written = 0usize;
        for (id, (bytes, hint)) in staged {
            // Another transaction may have committed identical content meanwhile.
            if let std::collections::hash_map::Entry::Vacant(slot) = blobs.entry(id) {
                slot.insert(StoredBlob { bytes, hint });
                written += 1;
            }
        }
        debug!(tx = tx.id(), blobs_written = written, "blob_commit_tx");
        Ok(())
    }

    fn abort_tx(&self, mut tx: BlobTx) -> Result<()> {
        let dropped = tx.take_staged().len();
        debug!(tx = tx.id(), blobs_dropped = dropped, "blob_abort_tx");
        Ok(())
    }
}

// =============================================================================
// DAG
// =============================================================================

/// State of a single DAG.
#[derive(Debug, Default)]
struct DagState {
    /// All linked nodes, keyed by changeset id.
    nodes: HashMap<ContentId, Dagnode>,
    /// Current leaves (nodes with no children).
    leaves: BTreeSet<ContentId>,
}

impl DagState {
    /// Links a node.
    ///
    /// Returns true if the node was new, false if it already existed.
    fn add_node(&mut self, node: Dagnode) -> bool {
        let id = *node.id();

        if self.nodes.contains_key(&id) {
            return false;
        }

        for parent_id in node.parent_ids() {
            self.leaves.remove(&parent_id);
        }
        self.leaves.insert(id);

        self.nodes.insert(id, node);
        true
    }
}

/// In-memory DAG store and audit log.
#[derive(Debug, Default)]
pub struct MemoryDagStore {
    dags: RwLock<HashMap<DagNum, DagState>>,
    audits: RwLock<Vec<AuditRecord>>,
    next_tx: AtomicU64,
}

impl MemoryDagStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked nodes in one DAG.
    pub fn node_count(&self, dag_num: DagNum) -> usize {
        read_lock(&self.dags)
            .map(|dags| dags.get(&dag_num).map(|d| d.nodes.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl DagnodeFetch for MemoryDagStore {
    fn fetch_node(&self, dag_num: DagNum, id: &ContentId) -> Result<Dagnode> {
        read_lock(&self.dags)?
            .get(&dag_num)
            .and_then(|d| d.nodes.get(id))
            .cloned()
            .ok_or(DagError::NodeNotFound(*id))
    }
}

impl AuditLog for MemoryDagStore {
    fn audits_for(&self, dag_num: DagNum, changeset_id: &ContentId) -> Result<Vec<AuditRecord>> {
        Ok(read_lock(&self.audits)?
            .iter()
            .filter(|a| a.dag_num == dag_num && a.changeset_id == *changeset_id)
            .cloned()
            .collect())
    }
}

impl DagStore for MemoryDagStore {
    fn begin_dag_tx(&self) -> Result<DagTx> {
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(tx = id, "dag_begin_tx");
        Ok(DagTx::new(id))
    }

    fn append_node(&self, tx: &mut DagTx, dag_num: DagNum, node: &Dagnode) -> Result<()> {
        if self.contains(dag_num, node.id())? || tx.staged_node(dag_num, node.id()).is_some() {
            return Err(DagError::NodeAlreadyExists(*node.id()));
        }
        check_node_links(self, tx, dag_num, node)?;

        trace!(
            tx = tx.id(),
            dag = %dag_num,
            node = %node.id().short(),
            generation = node.generation(),
            "dag_append_node: staged"
        );
        tx.stage_node(dag_num, node.clone());
        Ok(())
    }

    fn fetch_leaves(&self, dag_num: DagNum) -> Result<BTreeSet<ContentId>> {
        Ok(read_lock(&self.dags)?
            .get(&dag_num)
            .map(|d| d.leaves.clone())
            .unwrap_or_default())
    }

    fn contains(&self, dag_num: DagNum, id: &ContentId) -> Result<bool> {
        Ok(read_lock(&self.dags)?
            .get(&dag_num)
            .map(|d| d.nodes.contains_key(id))
            .unwrap_or(false))
    }

    fn commit_dag_tx(&self, mut tx: DagTx) -> Result<()> {
        let (nodes, audits) = tx.take_staged();
        {
            let mut dags = write_lock(&self.dags)?;
            for (dag_num, node) in nodes {
                let id = *node.id();
                if !dags.entry(dag_num).or_default().add_node(node) {
                    debug!(
                        tx = tx.id(),
                        node = %id.short(),
                        "dag_commit_tx: node linked concurrently, skipping"
                    );
                }
            }
        }
        write_lock(&self.audits)?.extend(audits);
        debug!(tx = tx.id(), "dag_commit_tx");
        Ok(())
    }

    fn abort_dag_tx(&self, mut tx: DagTx) -> Result<()> {
        let (nodes, audits) = tx.take_staged();
        debug!(
            tx = tx.id(),
            nodes_dropped = nodes.len(),
            audits_dropped = audits.len(),
            "dag_abort_tx"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ContentId {
        ContentId::of_bytes(&[n])
    }

    fn link(store: &MemoryDagStore, node: &Dagnode) -> Result<()> {
        let mut tx = store.begin_dag_tx()?;
        store.append_node(&mut tx, DagNum::VERSION_CONTROL, node)?;
        store.commit_dag_tx(tx)
    }

    #[test]
    fn test_blob_dedup_and_commit() {
        let store = MemoryBlobStore::new();
        let mut tx = store.begin_tx().unwrap();
        let a = store.store_bytes(&mut tx, b"abc", BlobHint::Default).unwrap();
        let b = store.store_bytes(&mut tx, b"abc", BlobHint::Raw).unwrap();
        assert_eq!(a, b);
        assert!(!store.exists(&a).unwrap(), "not visible before commit");

        store.commit_tx(tx).unwrap();
        assert_eq!(store.fetch(&a).unwrap(), b"abc");
        assert_eq!(store.hint_of(&a).unwrap(), BlobHint::Default);
        assert_eq!(store.len(), 1);

        // Re-adding committed content is silent.
        let mut tx = store.begin_tx().unwrap();
        assert_eq!(
            store.store_bytes(&mut tx, b"abc", BlobHint::Default).unwrap(),
            a
        );
        assert_eq!(tx.staged_len(), 0);
        store.abort_tx(tx).unwrap();
    }

    #[test]
    fn test_blob_abort_discards() {
        let store = MemoryBlobStore::new();
        let mut tx = store.begin_tx().unwrap();
        let id = store.store_bytes(&mut tx, b"gone", BlobHint::Default).unwrap();
        store.abort_tx(tx).unwrap();

        assert!(matches!(store.fetch(&id), Err(DagError::BlobNotFound(_))));
    }

    #[test]
    fn test_stream_stores_whole_content() {
        let store = MemoryBlobStore::new();
        let mut tx = store.begin_tx().unwrap();
        let mut stream = store.store_stream_begin(&mut tx, BlobHint::Raw).unwrap();
        store.store_stream_chunk(&mut tx, &mut stream, b"part1").unwrap();
        store.store_stream_chunk(&mut tx, &mut stream, b"part2").unwrap();
        let sid = store.store_stream_end(&mut tx, stream).unwrap();
        store.commit_tx(tx).unwrap();

        assert_eq!(sid, ContentId::of_bytes(b"part1part2"));
        assert_eq!(store.hint_of(&sid).unwrap(), BlobHint::Raw);
    }

    #[test]
    fn test_leaves_follow_links() {
        let store = MemoryDagStore::new();
        let a = Dagnode::new(id(1), 1, []).unwrap();
        let b = Dagnode::new(id(2), 2, [id(1)]).unwrap();
        let c = Dagnode::new(id(3), 2, [id(1)]).unwrap();

        link(&store, &a).unwrap();
        assert_eq!(
            store.fetch_leaves(DagNum::VERSION_CONTROL).unwrap(),
            BTreeSet::from([id(1)])
        );

        link(&store, &b).unwrap();
        link(&store, &c).unwrap();
        assert_eq!(
            store.fetch_leaves(DagNum::VERSION_CONTROL).unwrap(),
            BTreeSet::from([id(2), id(3)])
        );
        assert!(store.fetch_leaves(DagNum::USERS).unwrap().is_empty());
    }

    #[test]
    fn test_append_rejects_duplicates_and_missing_parents() {
        let store = MemoryDagStore::new();
        let a = Dagnode::new(id(1), 1, []).unwrap();
        link(&store, &a).unwrap();

        assert!(matches!(
            link(&store, &a),
            Err(DagError::NodeAlreadyExists(_))
        ));

        let orphan = Dagnode::new(id(5), 2, [id(4)]).unwrap();
        assert!(matches!(
            link(&store, &orphan),
            Err(DagError::MissingParent { .. })
        ));

        let bad_gen = Dagnode::new(id(6), 3, [id(1)]).unwrap();
        assert!(matches!(
            link(&store, &bad_gen),
            Err(DagError::Validation(_))
        ));
    }

    #[test]
    fn test_parent_staged_in_same_tx() {
        let store = MemoryDagStore::new();
        let a = Dagnode::new(id(1), 1, []).unwrap();
        let b = Dagnode::new(id(2), 2, [id(1)]).unwrap();

        let mut tx = store.begin_dag_tx().unwrap();
        store.append_node(&mut tx, DagNum::VERSION_CONTROL, &a).unwrap();
        store.append_node(&mut tx, DagNum::VERSION_CONTROL, &b).unwrap();
        store.commit_dag_tx(tx).unwrap();

        assert_eq!(store.node_count(DagNum::VERSION_CONTROL), 2);
    }

    #[test]
    fn test_racing_commits_link_once() {
        let store = MemoryDagStore::new();
        let a = Dagnode::new(id(1), 1, []).unwrap();

        let mut tx1 = store.begin_dag_tx().unwrap();
        let mut tx2 = store.begin_dag_tx().unwrap();
        store.append_node(&mut tx1, DagNum::VERSION_CONTROL, &a).unwrap();
        store.append_node(&mut tx2, DagNum::VERSION_CONTROL, &a).unwrap();
        store.commit_dag_tx(tx1).unwrap();
        store.commit_dag_tx(tx2).unwrap();

        assert_eq!(store.node_count(DagNum::VERSION_CONTROL), 1);
    }

    #[test]
    fn test_audits_visible_after_commit_only() {
        let store = MemoryDagStore::new();
        let record = AuditRecord {
            dag_num: DagNum::VERSION_CONTROL,
            changeset_id: id(1),
            who: "alice".to_string(),
            when: 1_700_000_000_000,
        };

        let mut tx = store.begin_dag_tx().unwrap();
        store.record(&mut tx, record.clone()).unwrap();
        assert!(store
            .audits_for(DagNum::VERSION_CONTROL, &id(1))
            .unwrap()
            .is_empty());
        store.commit_dag_tx(tx).unwrap();

        assert_eq!(
            store.audits_for(DagNum::VERSION_CONTROL, &id(1)).unwrap(),
            vec![record]
        );
    }
}
