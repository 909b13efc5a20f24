//! RocksDB-backed repository store.
//!
//! One database holds blobs, dagnodes, leaves and audit records:
//!
//! | Column family | Key                     | Value                    |
//! |---------------|-------------------------|--------------------------|
//! | `blobs`       | content id              | blob bytes (LZ4)         |
//! | `blobs_raw`   | content id              | blob bytes (uncompressed)|
//! | `dagnodes`    | dag_num `:` changeset id| bincode `Dagnode`        |
//! | `leaves`      | dag_num `:` changeset id| empty                    |
//! | `audits`      | dag_num `:` changeset id `:` record id | bincode `AuditRecord` |
//!
//! Blobs are written through as soon as they are stored; aborting a blob
//! transaction leaves them on disk. A DAG transaction is applied as one
//! atomic write batch.

use crate::dag::{ContentId, DagNodeOps, DagNum, Dagnode};
use crate::error::{DagError, Result};
use crate::storage::rocksdb::{composite_key, ColumnFamilySpec, RocksDbConfig, RocksDbHandle};
use crate::storage::{
    check_node_links, AuditLog, AuditRecord, BlobHint, BlobStore, BlobTx, DagStore, DagTx,
    DagnodeFetch,
};
use rocksdb::WriteBatch;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, trace};

const CF_BLOBS: &str = "blobs";
const CF_BLOBS_RAW: &str = "blobs_raw";
const CF_DAGNODES: &str = "dagnodes";
const CF_LEAVES: &str = "leaves";
const CF_AUDITS: &str = "audits";

const COLUMN_FAMILIES: &[ColumnFamilySpec] = &[
    ColumnFamilySpec::compressed(CF_BLOBS),
    ColumnFamilySpec::raw(CF_BLOBS_RAW),
    ColumnFamilySpec::compressed(CF_DAGNODES),
    ColumnFamilySpec::raw(CF_LEAVES),
    ColumnFamilySpec::compressed(CF_AUDITS),
];

fn dag_prefix(dag_num: DagNum) -> [u8; 8] {
    dag_num.as_u64().to_be_bytes()
}

fn node_key(dag_num: DagNum, id: &ContentId) -> Vec<u8> {
    composite_key(&dag_prefix(dag_num), id.as_bytes())
}

/// Persistent blob, DAG and audit store.
#[derive(Debug)]
pub struct RocksRepoStore {
    db: RocksDbHandle,
    commit_lock: Mutex<()>,
    next_tx: AtomicU64,
}

impl RocksRepoStore {
    /// Opens (or creates) a store at `path`.
    pub fn open(path: impl AsRef<Path>, config: &RocksDbConfig) -> Result<Self> {
        let db = RocksDbHandle::open(path.as_ref(), config, COLUMN_FAMILIES)?;
        info!(path = %path.as_ref().display(), "Repository store opened");
        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
            next_tx: AtomicU64::new(0),
        })
    }

    fn next_tx_id(&self) -> u64 {
        self.next_tx.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the hint a blob was stored with.
    pub fn hint_of(&self, id: &ContentId) -> Result<BlobHint> {
        if self.db.exists(CF_BLOBS, id.as_bytes())? {
            Ok(BlobHint::Default)
        } else if self.db.exists(CF_BLOBS_RAW, id.as_bytes())? {
            Ok(BlobHint::Raw)
        } else {
            Err(DagError::BlobNotFound(*id))
        }
    }
}

impl BlobStore for RocksRepoStore {
    fn begin_tx(&self) -> Result<BlobTx> {
        Ok(BlobTx::new(self.next_tx_id()))
    }

    fn store_bytes(&self, tx: &mut BlobTx, bytes: &[u8], hint: BlobHint) -> Result<ContentId> {
        let id = ContentId::of_bytes(bytes);
        if self.exists(&id)? {
            trace!(tx = tx.id(), blob = %id.short(), "blob_store: content already present");
            return Ok(id);
        }

        let cf = match hint {
            BlobHint::Default => CF_BLOBS,
            BlobHint::Raw => CF_BLOBS_RAW,
        };
        self.db.put(cf, id.as_bytes(), bytes)?;
        trace!(
            tx = tx.id(),
            blob = %id.short(),
            bytes = bytes.len(),
            cf,
            "blob_store: written through"
        );
        Ok(id)
    }

    fn fetch(&self, id: &ContentId) -> Result<Vec<u8>> {
        if let Some(bytes) = self.db.get(CF_BLOBS, id.as_bytes())? {
            return Ok(bytes);
        }
        self.db
            .get(CF_BLOBS_RAW, id.as_bytes())?
            .ok_or(DagError::BlobNotFound(*id))
    }

    fn exists(&self, id: &ContentId) -> Result<bool> {
        Ok(self.db.exists(CF_BLOBS, id.as_bytes())?
            || self.db.exists(CF_BLOBS_RAW, id.as_bytes())?)
    }

    fn commit_tx(&self, tx: BlobTx) -> Result<()> {
        debug!(tx = tx.id(), "blob_commit_tx");
        Ok(())
    }

    fn abort_tx(&self, tx: BlobTx) -> Result<()> {
        debug!(tx = tx.id(), "blob_abort_tx: written blobs stay on disk");
        Ok(())
    }
}

impl DagnodeFetch for RocksRepoStore {
    fn fetch_node(&self, dag_num: DagNum, id: &ContentId) -> Result<Dagnode> {
        match self.db.get(CF_DAGNODES, &node_key(dag_num, id))? {
            Some(bytes) => Dagnode::from_bytes(&bytes),
            None => Err(DagError::NodeNotFound(*id)),
        }
    }
}

impl AuditLog for RocksRepoStore {
    fn audits_for(&self, dag_num: DagNum, changeset_id: &ContentId) -> Result<Vec<AuditRecord>> {
        let mut prefix = node_key(dag_num, changeset_id);
        prefix.push(b':');

        let mut records = Vec::new();
        self.db.scan_prefix(CF_AUDITS, &prefix, |_, value| {
            let record: AuditRecord = bincode::deserialize(value).map_err(|e| {
                DagError::serialization(format!("Failed to deserialize audit record: {}", e))
            })?;
            records.push(record);
            Ok(true)
        })?;

        records.sort_by_key(|r| r.when);
        Ok(records)
    }
}

impl DagStore for RocksRepoStore {
    fn begin_dag_tx(&self) -> Result<DagTx> {
        Ok(DagTx::new(self.next_tx_id()))
    }

    fn append_node(&self, tx: &mut DagTx, dag_num: DagNum, node: &Dagnode) -> Result<()> {
        if self.contains(dag_num, node.id())? || tx.staged_node(dag_num, node.id()).is_some() {
            return Err(DagError::NodeAlreadyExists(*node.id()));
        }
        check_node_links(self, tx, dag_num, node)?;
        tx.stage_node(dag_num, node.clone());
        Ok(())
    }

    fn fetch_leaves(&self, dag_num: DagNum) -> Result<BTreeSet<ContentId>> {
        let prefix = composite_key(&dag_prefix(dag_num), &[]);
        let mut leaves = BTreeSet::new();
        self.db.scan_prefix(CF_LEAVES, &prefix, |key, _| {
            leaves.insert(ContentId::from_slice(&key[prefix.len()..])?);
            Ok(true)
        })?;
        Ok(leaves)
    }

    fn contains(&self, dag_num: DagNum, id: &ContentId) -> Result<bool> {
        self.db.exists(CF_DAGNODES, &node_key(dag_num, id))
    }

    fn commit_dag_tx(&self, mut tx: DagTx) -> Result<()> {
        let (nodes, audits) = tx.take_staged();
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| DagError::storage("Commit lock poisoned"))?;

        let mut batch = WriteBatch::default();
        let mut linked = HashSet::new();
        for (dag_num, node) in &nodes {
            if self.contains(*dag_num, node.id())? || !linked.insert((*dag_num, *node.id())) {
                debug!(
                    tx = tx.id(),
                    node = %node.id().short(),
                    "dag_commit_tx: node linked concurrently, skipping"
                );
                continue;
            }
            self.db.batch_put(
                &mut batch,
                CF_DAGNODES,
                &node_key(*dag_num, node.id()),
                &node.to_bytes()?,
            )?;
            for parent in node.parent_ids() {
                self.db
                    .batch_delete(&mut batch, CF_LEAVES, &node_key(*dag_num, &parent))?;
            }
            self.db
                .batch_put(&mut batch, CF_LEAVES, &node_key(*dag_num, node.id()), &[])?;
        }

        for record in &audits {
            let bytes = bincode::serialize(record).map_err(|e| {
                DagError::serialization(format!("Failed to serialize audit record: {}", e))
            })?;
            let record_id = ContentId::of_bytes(&bytes);
            let key = composite_key(
                &node_key(record.dag_num, &record.changeset_id),
                record_id.as_bytes(),
            );
            self.db.batch_put(&mut batch, CF_AUDITS, &key, &bytes)?;
        }

        self.db.write(batch)?;
        debug!(
            tx = tx.id(),
            nodes = linked.len(),
            audits = audits.len(),
            "dag_commit_tx"
        );
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
