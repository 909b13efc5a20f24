//! Storage collaborators.
//!
//! The core never touches bytes on disk directly. It talks to three
//! capabilities:
//!
//! - [`BlobStore`]: content-addressed byte storage with transactions
//! - [`DagStore`]: persisted dagnodes and leaves per DAG, with its own transactions
//! - [`AuditLog`]: who/when records keyed by changeset id, written in a DAG transaction
//!
//! ## Modules
//!
//! - `memory`: thread-safe in-memory stores
//! - `rocksdb`: generic RocksDB utilities (feature `rocksdb`)
//! - `rocks_store`: RocksDB-backed blob, DAG and audit store (feature `rocksdb`)
//!
//! Neither store kind offers atomicity across the two transactions. Duplicate
//! blob content and duplicate dagnode links are expected under concurrency
//! and must be absorbed, not reported as corruption.

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks_store;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;

pub use memory::{MemoryBlobStore, MemoryDagStore};
#[cfg(feature = "rocksdb")]
pub use rocks_store::RocksRepoStore;
#[cfg(feature = "rocksdb")]
pub use rocksdb::{composite_key, ColumnFamilySpec, RocksDbConfig, RocksDbHandle};

use crate::dag::{ContentId, DagNum, Dagnode};
use crate::error::{DagError, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Blob Storage
// =============================================================================

/// How the store should treat a blob's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlobHint {
    /// Let the store choose an encoding.
    #[default]
    Default,
    /// Store the bytes as-is; don't bother trying to compress them.
    Raw,
}

/// An open blob-store transaction.
///
/// Stores that write through ignore the staging area; stores that buffer keep
/// pending blobs here until [`BlobStore::commit_tx`].
#[derive(Debug)]
pub struct BlobTx {
    id: u64,
    staged: BTreeMap<ContentId, (Vec<u8>, BlobHint)>,
}

impl BlobTx {
    /// Creates an empty transaction handle.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            staged: BTreeMap::new(),
        }
    }

    /// Returns the store-assigned transaction id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stages a blob. Returns false if it was already staged.
    pub fn stage(&mut self, id: ContentId, bytes: Vec<u8>, hint: BlobHint) -> bool {
        if self.staged.contains_key(&id) {
            return false;
        }
        self.staged.insert(id, (bytes, hint));
        true
    }

    /// Returns true if a blob with this id is staged.
    pub fn is_staged(&self, id: &ContentId) -> bool {
        self.staged.contains_key(id)
    }

    /// Number of staged blobs.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Removes and returns all staged blobs.
    pub fn take_staged(&mut self) -> BTreeMap<ContentId, (Vec<u8>, BlobHint)> {
        std::mem::take(&mut self.staged)
    }
}

/// Incremental state of a streamed blob.
pub struct BlobStream {
    hasher: Sha3_256,
    buffer: Vec<u8>,
    hint: BlobHint,
}

impl std::fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream")
            .field("len", &self.buffer.len())
            .field("hint", &self.hint)
            .finish()
    }
}

impl BlobStream {
    /// Starts an empty stream.
    pub fn new(hint: BlobHint) -> Self {
        Self {
            hasher: Sha3_256::new(),
            buffer: Vec::new(),
            hint,
        }
    }

    /// Appends a chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes received so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes were pushed.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Finishes the stream, returning its id, bytes and hint.
    pub fn finish(self) -> (ContentId, Vec<u8>, BlobHint) {
        let id = ContentId::from_bytes(self.hasher.finalize().into());
        (id, self.buffer, self.hint)
    }
}

/// Content-addressed byte storage.
///
/// `store_bytes` must be idempotent: storing content that already exists
/// (committed, staged, or written by another process) returns its id.
pub trait BlobStore: Send + Sync {
    /// Opens a transaction.
    fn begin_tx(&self) -> Result<BlobTx>;

    /// Stores bytes and returns their content id.
    fn store_bytes(&self, tx: &mut BlobTx, bytes: &[u8], hint: BlobHint) -> Result<ContentId>;

    /// Starts streaming a large blob.
    fn store_stream_begin(&self, _tx: &mut BlobTx, hint: BlobHint) -> Result<BlobStream> {
        Ok(BlobStream::new(hint))
    }

    /// Appends a chunk to a streamed blob.
    fn store_stream_chunk(
        &self,
        _tx: &mut BlobTx,
        stream: &mut BlobStream,
        chunk: &[u8],
    ) -> Result<()> {
        stream.push(chunk);
        Ok(())
    }

    /// Finishes a streamed blob and stores it.
    fn store_stream_end(&self, tx: &mut BlobTx, stream: BlobStream) -> Result<ContentId> {
        let (expected, bytes, hint) = stream.finish();
        let id = self.store_bytes(tx, &bytes, hint)?;
        if id != expected {
            return Err(DagError::HashMismatch {
                expected,
                actual: id,
            });
        }
        Ok(id)
    }

    /// Fetches the committed bytes of a blob.
    fn fetch(&self, id: &ContentId) -> Result<Vec<u8>>;

    /// Returns true if a committed blob exists.
    fn exists(&self, id: &ContentId) -> Result<bool>;

    /// Commits a transaction.
    fn commit_tx(&self, tx: BlobTx) -> Result<()>;

    /// Aborts a transaction. Blobs already written through stay on disk.
    fn abort_tx(&self, tx: BlobTx) -> Result<()>;
}

// =============================================================================
// DAG Storage
// =============================================================================

/// Who created a changeset, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// DAG the changeset was linked into.
    pub dag_num: DagNum,
    /// The changeset.
    pub changeset_id: ContentId,
    /// User identity.
    pub who: String,
    /// Milliseconds since the Unix epoch.
    pub when: u64,
}

/// An open DAG-store transaction.
#[derive(Debug)]
pub struct DagTx {
    id: u64,
    nodes: Vec<(DagNum, Dagnode)>,
    audits: Vec<AuditRecord>,
}

impl DagTx {
    /// Creates an empty transaction handle.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            audits: Vec::new(),
        }
    }

    /// Returns the store-assigned transaction id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stages a node for linking.
    pub fn stage_node(&mut self, dag_num: DagNum, node: Dagnode) {
        self.nodes.push((dag_num, node));
    }

    /// Finds a node staged in this transaction.
    pub fn staged_node(&self, dag_num: DagNum, id: &ContentId) -> Option<&Dagnode> {
        self.nodes
            .iter()
            .find(|(d, n)| *d == dag_num && n.id() == id)
            .map(|(_, n)| n)
    }

    /// Stages an audit record.
    pub fn stage_audit(&mut self, record: AuditRecord) {
        self.audits.push(record);
    }

    /// Removes and returns everything staged, in staging order.
    pub fn take_staged(&mut self) -> (Vec<(DagNum, Dagnode)>, Vec<AuditRecord>) {
        (
            std::mem::take(&mut self.nodes),
            std::mem::take(&mut self.audits),
        )
    }
}

/// Fetches persisted dagnodes.
pub trait DagnodeFetch {
    /// Fetches a linked node, failing with `NodeNotFound`.
    fn fetch_node(&self, dag_num: DagNum, id: &ContentId) -> Result<Dagnode>;
}

/// History audit records.
pub trait AuditLog {
    /// Stages a record in a DAG transaction; it becomes visible on commit.
    fn record(&self, tx: &mut DagTx, record: AuditRecord) -> Result<()> {
        tx.stage_audit(record);
        Ok(())
    }

    /// Returns the committed records for a changeset.
    fn audits_for(&self, dag_num: DagNum, changeset_id: &ContentId) -> Result<Vec<AuditRecord>>;
}

/// Persisted DAG of dagnodes, one per dag number.
///
/// Implementations must treat two processes linking the same node as
/// success: `append_node` reports `NodeAlreadyExists` for nodes that are
/// already committed, and `commit_dag_tx` silently skips staged nodes that a
/// concurrent transaction committed first.
pub trait DagStore: DagnodeFetch + AuditLog + Send + Sync {
    /// Opens a transaction.
    fn begin_dag_tx(&self) -> Result<DagTx>;

    /// Stages a node after checking its parents are linked and its generation is right.
    fn append_node(&self, tx: &mut DagTx, dag_num: DagNum, node: &Dagnode) -> Result<()>;

    /// Returns the nodes that have no children.
    fn fetch_leaves(&self, dag_num: DagNum) -> Result<BTreeSet<ContentId>>;

    /// Returns true if a node is committed.
    fn contains(&self, dag_num: DagNum, id: &ContentId) -> Result<bool>;

    /// Commits staged nodes and audit records.
    fn commit_dag_tx(&self, tx: DagTx) -> Result<()>;

    /// Discards staged nodes and audit records.
    fn abort_dag_tx(&self, tx: DagTx) -> Result<()>;
}

/// Checks that `node` can be linked: its parents are committed (or staged in
/// `tx`) and its generation follows from theirs.
pub fn check_node_links<S>(store: &S, tx: &DagTx, dag_num: DagNum, node: &Dagnode) -> Result<()>
where
    S: DagnodeFetch + ?Sized,
{
    let mut parents = Vec::with_capacity(node.parents().len());
    for parent_id in node.parents() {
        let parent = match tx.staged_node(dag_num, parent_id) {
            Some(staged) => staged.clone(),
            None => store.fetch_node(dag_num, parent_id).map_err(|e| match e {
                DagError::NodeNotFound(_) => DagError::MissingParent {
                    parent: *parent_id,
                    child: *node.id(),
                },
                other => other,
            })?,
        };
        parents.push(parent);
    }
    let refs: Vec<&Dagnode> = parents.iter().collect();
    node.check_parents(&refs)
}
