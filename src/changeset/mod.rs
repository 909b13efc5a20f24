//! Changesets: immutable, content-addressed snapshot records.
//!
//! A changeset names its parents, declares its root state (a tree root for
//! tree DAGs, delta/template roots for db DAGs) and lists the blobs it
//! introduces. It is built in memory, then frozen by [`Changeset::save`],
//! which assigns its id: the SHA3-256 of its canonical bincode form.
//!
//! ## Freeze discipline
//!
//! ```text
//! Unfrozen (settable) --save--> Frozen (read-only, id defined)
//! ```
//!
//! Every mutator on a frozen changeset fails with
//! [`DagError::AlreadyFrozen`] and leaves it unchanged. [`Changeset::load`]
//! always returns a frozen value.
//!
//! Reference lists hold only blobs new relative to the parents, and may
//! over-include blobs a sparse parent already had. Treat them as a
//! conservative superset, never as a complete closure.

pub mod objects;
mod types;

pub use objects::{DbRecord, EntryKind, StructuralObject, TreeEntry, TreeNode};
pub use types::{DbState, ReferenceKind, RootState, SchemaVersion};

use crate::dag::{ContentId, DagKind, DagNum};
use crate::error::{DagError, Result};
use crate::storage::{BlobHint, BlobStore, BlobTx, DagnodeFetch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// The hashed portion of a changeset.
///
/// Field order and collection types fix the canonical byte form; sets and
/// maps are ordered so equal values always encode identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ChangesetContent {
    version: SchemaVersion,
    dag_num: DagNum,
    parents: BTreeSet<ContentId>,
    root: RootState,
    references: BTreeMap<ReferenceKind, BTreeSet<ContentId>>,
}

/// One snapshot in a history DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    version: SchemaVersion,
    dag_num: DagNum,
    parents: BTreeSet<ContentId>,
    root: Option<RootState>,
    references: BTreeMap<ReferenceKind, BTreeSet<ContentId>>,
    id: Option<ContentId>,
}

impl Changeset {
    /// Creates an empty, unfrozen changeset in the current schema version.
    pub fn new(dag_num: DagNum) -> Result<Self> {
        Self::with_version(dag_num, SchemaVersion::default())
    }

    /// Creates an empty, unfrozen changeset tagged with `version`.
    pub fn with_version(dag_num: DagNum, version: SchemaVersion) -> Result<Self> {
        dag_num.validate()?;
        Ok(Self {
            version,
            dag_num,
            parents: BTreeSet::new(),
            root: None,
            references: BTreeMap::new(),
            id: None,
        })
    }

    fn ensure_unfrozen(&self) -> Result<()> {
        if self.id.is_some() {
            return Err(DagError::AlreadyFrozen);
        }
        Ok(())
    }

    fn kind(&self) -> Result<DagKind> {
        self.dag_num.kind()
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    /// Adds a parent. Adding the same parent twice is a no-op.
    pub fn add_parent(&mut self, parent: ContentId) -> Result<()> {
        self.ensure_unfrozen()?;
        self.parents.insert(parent);
        Ok(())
    }

    /// Declares the tree root; `None` declares an empty snapshot.
    ///
    /// A later call replaces the earlier value.
    pub fn set_tree_root(&mut self, root: Option<ContentId>) -> Result<()> {
        self.ensure_unfrozen()?;
        if self.kind()? != DagKind::Tree {
            return Err(DagError::invalid_argument(format!(
                "dag {} is not a tree DAG; it has no tree root",
                self.dag_num
            )));
        }
        self.root = Some(RootState::Tree(root));
        Ok(())
    }

    /// Declares the db roots. A later call replaces the earlier value.
    pub fn set_db_state(&mut self, state: DbState) -> Result<()> {
        self.ensure_unfrozen()?;
        if self.kind()? != DagKind::Db {
            return Err(DagError::invalid_argument(format!(
                "dag {} is not a db DAG; it has no db state",
                self.dag_num
            )));
        }
        self.root = Some(RootState::Db(state));
        Ok(())
    }

    /// Checks that this changeset's DAG kind accepts references of `kind`.
    pub fn check_reference_kind(&self, kind: ReferenceKind) -> Result<()> {
        let allowed = match self.kind()? {
            DagKind::Tree => kind.allowed_in_tree(),
            DagKind::Db => kind.allowed_in_db(),
        };
        if !allowed {
            return Err(DagError::invalid_argument(format!(
                "{} references are not allowed in dag {}",
                kind, self.dag_num
            )));
        }
        Ok(())
    }

    /// Records a blob this changeset introduces.
    pub fn add_reference(&mut self, kind: ReferenceKind, id: ContentId) -> Result<()> {
        self.ensure_unfrozen()?;
        self.check_reference_kind(kind)?;
        self.references.entry(kind).or_default().insert(id);
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn content(&self) -> Result<ChangesetContent> {
        let root = self.root.ok_or_else(|| {
            DagError::incomplete(format!(
                "root state of changeset in dag {} was never set",
                self.dag_num
            ))
        })?;
        Ok(ChangesetContent {
            version: self.version,
            dag_num: self.dag_num,
            parents: self.parents.clone(),
            root,
            references: self.references.clone(),
        })
    }

    /// Returns the canonical bytes and the id they hash to.
    ///
    /// Does not freeze; fails with `IncompleteChangeset` if the root state is
    /// unset.
    pub fn canonical_bytes(&self) -> Result<(ContentId, Vec<u8>)> {
        let bytes = bincode::serialize(&self.content()?).map_err(|e| {
            DagError::serialization(format!("Failed to serialize changeset: {}", e))
        })?;
        Ok((ContentId::of_bytes(&bytes), bytes))
    }

    /// Validates, serializes and stores this changeset, then freezes it.
    ///
    /// Content that already exists in the store (a concurrent writer saved
    /// the same changeset) is not an error.
    pub fn save<B>(&mut self, blobs: &B, tx: &mut BlobTx) -> Result<ContentId>
    where
        B: BlobStore + ?Sized,
    {
        self.ensure_unfrozen()?;
        let (id, bytes) = self.canonical_bytes()?;

        if self.parents.contains(&id) {
            return Err(DagError::validation(format!(
                "changeset {} lists itself as a parent",
                id.short()
            )));
        }

        let stored = blobs.store_bytes(tx, &bytes, BlobHint::Default)?;
        if stored != id {
            return Err(DagError::HashMismatch {
                expected: id,
                actual: stored,
            });
        }

        self.id = Some(id);
        debug!(
            changeset = %id.short(),
            dag = %self.dag_num,
            parents = self.parents.len(),
            bytes = bytes.len(),
            "changeset_save: frozen"
        );
        Ok(id)
    }

    /// Loads a stored changeset.
    ///
    /// With `verify`, the fetched bytes must hash to `id`; otherwise the
    /// load fails with `HashMismatch`. The result is always frozen.
    pub fn load<B>(blobs: &B, id: &ContentId, verify: bool) -> Result<Self>
    where
        B: BlobStore + ?Sized,
    {
        let bytes = blobs.fetch(id)?;

        if verify {
            let actual = ContentId::of_bytes(&bytes);
            if actual != *id {
                return Err(DagError::HashMismatch {
                    expected: *id,
                    actual,
                });
            }
        }

        let content: ChangesetContent = bincode::deserialize(&bytes).map_err(|e| {
            DagError::serialization(format!("Failed to deserialize changeset {}: {}", id, e))
        })?;

        let kind = content.dag_num.kind()?;
        let root_matches = matches!(
            (kind, &content.root),
            (DagKind::Tree, RootState::Tree(_)) | (DagKind::Db, RootState::Db(_))
        );
        if !root_matches {
            return Err(DagError::validation(format!(
                "changeset {} carries a root state that does not fit dag {}",
                id.short(),
                content.dag_num
            )));
        }

        trace!(changeset = %id.short(), verify, "changeset_load");
        Ok(Self {
            version: content.version,
            dag_num: content.dag_num,
            parents: content.parents,
            root: Some(content.root),
            references: content.references,
            id: Some(*id),
        })
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Returns the DAG this changeset belongs to.
    pub fn dag_num(&self) -> DagNum {
        self.dag_num
    }

    /// Returns the schema version.
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Returns the parent ids.
    pub fn parents(&self) -> &BTreeSet<ContentId> {
        &self.parents
    }

    /// Returns the declared root state, if set.
    pub fn root(&self) -> Option<&RootState> {
        self.root.as_ref()
    }

    /// Returns the tree root. `None` if unset, declared empty, or a db changeset.
    pub fn tree_root(&self) -> Option<ContentId> {
        match self.root {
            Some(RootState::Tree(root)) => root,
            _ => None,
        }
    }

    /// Returns the db roots, if this is a db changeset with its state set.
    pub fn db_state(&self) -> Option<&DbState> {
        match &self.root {
            Some(RootState::Db(state)) => Some(state),
            _ => None,
        }
    }

    /// Returns the blobs of one kind this changeset introduces.
    pub fn references(&self, kind: ReferenceKind) -> impl Iterator<Item = &ContentId> + '_ {
        self.references.get(&kind).into_iter().flatten()
    }

    /// Returns all introduced blobs by kind.
    pub fn all_references(&self) -> &BTreeMap<ReferenceKind, BTreeSet<ContentId>> {
        &self.references
    }

    /// Returns every blob id this changeset introduces, across kinds.
    ///
    /// This is a superset of what is new to the repository: blobs a parent
    /// already introduced may be listed again.
    pub fn referenced_blobs(&self) -> BTreeSet<ContentId> {
        self.references.values().flatten().copied().collect()
    }

    /// Returns true once saved or loaded.
    pub fn is_frozen(&self) -> bool {
        self.id.is_some()
    }

    /// Returns the id, defined only once frozen.
    pub fn id(&self) -> Option<&ContentId> {
        self.id.as_ref()
    }

    /// Returns the generation of this changeset's linked dagnode.
    pub fn generation<F>(&self, fetch: &F) -> Result<i32>
    where
        F: DagnodeFetch + ?Sized,
    {
        let id = self.id.as_ref().ok_or(DagError::NotFrozen)?;
        Ok(fetch.fetch_node(self.dag_num, id)?.generation())
    }
}
