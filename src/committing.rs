//! The commit transaction coordinator.
//!
//! A [`Committing`] creates exactly one changeset and links it into its DAG
//! in two stages:
//!
//! 1. **Persist.** The changeset is frozen and saved, and the blob
//!    transaction (holding every blob added through this handle) commits.
//! 2. **Link.** A dagnode is derived from the frozen changeset and appended
//!    to the DAG store, together with the audit record, in one DAG-store
//!    transaction.
//!
//! The two transactions are independent. A failure in stage 2 returns
//! [`DagError::ChangesetUnlinked`]: the changeset is durable and loadable
//! but not part of history, and nothing is rolled back. A dagnode that is
//! already linked (another committer produced identical content) counts as
//! success.
//!
//! ```text
//! Open --end: stage 1--> ChangesetPersisted --end: stage 2--> Linked
//!   \--abort / drop--> Aborted
//! ```

use crate::changeset::{
    Changeset, DbState, ReferenceKind, SchemaVersion, StructuralObject,
};
use crate::constants::STREAM_CHUNK_SIZE;
use crate::dag::{current_timestamp_millis, ContentId, DagNum, Dagnode};
use crate::error::{DagError, Result};
use crate::repo::Repo;
use crate::storage::{AuditRecord, BlobHint, BlobStore, BlobTx};
use std::io::{ErrorKind, Read};
use tracing::{debug, warn};

/// Who made a commit, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audit {
    /// User identity.
    pub who: String,
    /// Milliseconds since the Unix epoch.
    pub when: u64,
}

impl Audit {
    /// Creates an audit stamp.
    pub fn new(who: impl Into<String>, when: u64) -> Self {
        Self {
            who: who.into(),
            when,
        }
    }

    /// Stamps `who` with the current time.
    pub fn now(who: impl Into<String>) -> Self {
        Self::new(who, current_timestamp_millis())
    }
}

/// Open blob transaction; aborted if dropped before being committed.
struct BlobTxGuard<'r> {
    blobs: &'r dyn BlobStore,
    tx: Option<BlobTx>,
}

impl BlobTxGuard<'_> {
    fn tx_mut(&mut self) -> Result<&mut BlobTx> {
        self.tx
            .as_mut()
            .ok_or_else(|| DagError::storage("blob transaction already closed"))
    }

    fn take(&mut self) -> Result<BlobTx> {
        self.tx
            .take()
            .ok_or_else(|| DagError::storage("blob transaction already closed"))
    }

    fn abort(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => self.blobs.abort_tx(tx),
            None => Ok(()),
        }
    }
}

impl Drop for BlobTxGuard<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let id = tx.id();
            if let Err(e) = self.blobs.abort_tx(tx) {
                warn!(tx = id, error = %e, "commit dropped: blob abort failed");
            } else {
                debug!(tx = id, "commit dropped: blob transaction aborted");
            }
        }
    }
}

/// An open commit on one DAG of a repository.
pub struct Committing<'r> {
    repo: &'r Repo,
    dag_num: DagNum,
    audit: Audit,
    changeset: Changeset,
    guard: BlobTxGuard<'r>,
}

impl std::fmt::Debug for Committing<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committing")
            .field("dag_num", &self.dag_num)
            .field("who", &self.audit.who)
            .field("parents", &self.changeset.parents().len())
            .field("open", &self.guard.tx.is_some())
            .finish()
    }
}

impl<'r> Committing<'r> {
    /// Opens a commit: checks the DAG number, begins a blob transaction and
    /// allocates an empty changeset tagged with `version`.
    ///
    /// `audit` is written to the audit log when the changeset is linked; it
    /// is not part of the changeset's content.
    pub fn begin(
        repo: &'r Repo,
        dag_num: DagNum,
        audit: Audit,
        version: SchemaVersion,
    ) -> Result<Self> {
        repo.check_dag_num(dag_num)?;
        let changeset = Changeset::with_version(dag_num, version)?;
        let blobs = repo.blobs();
        let tx = blobs.begin_tx()?;

        debug!(dag = %dag_num, tx = tx.id(), who = %audit.who, "commit_begin");
        Ok(Self {
            repo,
            dag_num,
            audit,
            changeset,
            guard: BlobTxGuard {
                blobs,
                tx: Some(tx),
            },
        })
    }

    /// Returns the DAG being committed to.
    pub fn dag_num(&self) -> DagNum {
        self.dag_num
    }

    /// Returns the in-progress changeset.
    pub fn changeset(&self) -> &Changeset {
        &self.changeset
    }

    /// Adds a parent, enforcing the repository's parent limit.
    pub fn add_parent(&mut self, parent: ContentId) -> Result<()> {
        let max = self.repo.config().max_parents;
        if !self.changeset.parents().contains(&parent) && self.changeset.parents().len() >= max {
            return Err(DagError::invalid_argument(format!(
                "changeset cannot have more than {} parents",
                max
            )));
        }
        self.changeset.add_parent(parent)
    }

    /// Stores a blob and returns its id. Existing content is not an error.
    ///
    /// `dont_bother` stores the bytes as-is without attempting compression.
    /// The blob is not referenced by the changeset unless the caller also
    /// calls [`Committing::add_reference`].
    pub fn add_bytes(&mut self, bytes: &[u8], dont_bother: bool) -> Result<ContentId> {
        let blobs = self.guard.blobs;
        let tx = self.guard.tx_mut()?;
        blobs.store_bytes(tx, bytes, hint_for(dont_bother))
    }

    /// Streams a blob from `reader` in fixed-size chunks and returns its id.
    pub fn add_stream<R: Read>(&mut self, mut reader: R, dont_bother: bool) -> Result<ContentId> {
        let blobs = self.guard.blobs;
        let tx = self.guard.tx_mut()?;
        let mut stream = blobs.store_stream_begin(tx, hint_for(dont_bother))?;

        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            blobs.store_stream_chunk(tx, &mut stream, &buf[..n])?;
        }

        blobs.store_stream_end(tx, stream)
    }

    /// Validates and stores a structural object, referencing it from the
    /// changeset under its kind.
    pub fn add_structural_object<O>(&mut self, object: &O) -> Result<ContentId>
    where
        O: StructuralObject + ?Sized,
    {
        let kind = object.reference_kind();
        self.changeset.check_reference_kind(kind)?;
        object.validate()?;

        let bytes = object.canonical_bytes()?;
        let id = self.add_bytes(&bytes, false)?;
        self.changeset.add_reference(kind, id)?;
        Ok(id)
    }

    /// References an already-stored blob from the changeset.
    pub fn add_reference(&mut self, kind: ReferenceKind, id: ContentId) -> Result<()> {
        self.changeset.add_reference(kind, id)
    }

    /// Declares the tree root; `None` declares an empty snapshot.
    pub fn set_tree_root(&mut self, root: Option<ContentId>) -> Result<()> {
        self.changeset.set_tree_root(root)
    }

    /// Declares the db roots.
    pub fn set_db_state(&mut self, state: DbState) -> Result<()> {
        self.changeset.set_db_state(state)
    }

    /// Persists the changeset, then links it into the DAG.
    ///
    /// # Errors
    ///
    /// - Stage 1 errors (incomplete changeset, blob store failure) are
    ///   returned as-is; nothing was linked.
    /// - Any stage 2 failure is wrapped in [`DagError::ChangesetUnlinked`].
    pub fn end(self) -> Result<(Changeset, Dagnode)> {
        let Committing {
            repo,
            dag_num,
            audit,
            mut changeset,
            mut guard,
        } = self;

        // Stage 1: freeze, save, commit the blob transaction.
        let id = {
            let blobs = guard.blobs;
            let tx = guard.tx_mut()?;
            changeset.save(blobs, tx)?
        };
        let tx = guard.take()?;
        let tx_id = tx.id();
        guard.blobs.commit_tx(tx)?;
        debug!(dag = %dag_num, changeset = %id.short(), tx = tx_id, "commit_end: changeset persisted");

        // Stage 2: link.
        match link(repo, dag_num, &changeset, &audit) {
            Ok(node) => {
                debug!(
                    dag = %dag_num,
                    changeset = %id.short(),
                    generation = node.generation(),
                    "commit_end: linked"
                );
                Ok((changeset, node))
            }
            Err(e) => {
                warn!(
                    dag = %dag_num,
                    changeset = %id.short(),
                    error = %e,
                    "commit_end: changeset persisted but not linked"
                );
                Err(DagError::unlinked(id, e))
            }
        }
    }

    /// Aborts the blob transaction without touching the DAG.
    ///
    /// Blobs a write-through store already wrote stay behind.
    pub fn abort(self) -> Result<()> {
        let mut guard = self.guard;
        debug!(dag = %self.dag_num, "commit_abort");
        guard.abort()
    }
}

fn hint_for(dont_bother: bool) -> BlobHint {
    if dont_bother {
        BlobHint::Raw
    } else {
        BlobHint::Default
    }
}

/// Derives the dagnode and appends it with its audit record.
fn link(repo: &Repo, dag_num: DagNum, changeset: &Changeset, audit: &Audit) -> Result<Dagnode> {
    let node = Dagnode::from_changeset(changeset, repo)?;
    let dags = repo.dags();
    let mut tx = dags.begin_dag_tx()?;

    let staged = match dags.append_node(&mut tx, dag_num, &node) {
        Ok(()) => Ok(()),
        Err(e) if e.is_benign_race() => {
            debug!(
                dag = %dag_num,
                node = %node.id().short(),
                "commit_end: dagnode already linked by another committer"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
    .and_then(|()| {
        dags.record(
            &mut tx,
            AuditRecord {
                dag_num,
                changeset_id: *node.id(),
                who: audit.who.clone(),
                when: audit.when,
            },
        )
    });

    if let Err(e) = staged {
        if let Err(abort_err) = dags.abort_dag_tx(tx) {
            warn!(error = %abort_err, "commit_end: dag abort failed");
        }
        return Err(e);
    }

    dags.commit_dag_tx(tx)?;
    repo.cache().insert(dag_num, node.clone());
    Ok(node)
}
