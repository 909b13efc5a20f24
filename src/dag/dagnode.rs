//! Dagnodes: the graph-structural projection of a changeset.
//!
//! A `Dagnode` carries only what DAG algorithms need: the changeset id, its
//! parent ids and its generation number. It is derived from a frozen
//! changeset and never edited afterwards.

use crate::changeset::Changeset;
use crate::dag::ops::{expected_generation, DagNodeOps};
use crate::dag::ContentId;
use crate::error::{DagError, Result};
use crate::storage::DagnodeFetch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One node of a history DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dagnode {
    id: ContentId,
    generation: i32,
    parents: BTreeSet<ContentId>,
}

impl Dagnode {
    /// Creates a dagnode, checking the shape of the generation law.
    ///
    /// The parents themselves are not consulted here; use
    /// [`Dagnode::check_parents`] when their generations are known.
    pub fn new<I>(id: ContentId, generation: i32, parents: I) -> Result<Self>
    where
        I: IntoIterator<Item = ContentId>,
    {
        let parents: BTreeSet<ContentId> = parents.into_iter().collect();

        if parents.contains(&id) {
            return Err(DagError::validation(format!(
                "Dagnode {} lists itself as a parent",
                id.short()
            )));
        }
        if generation < 1 {
            return Err(DagError::validation(format!(
                "Dagnode {} has generation {} (must be >= 1)",
                id.short(),
                generation
            )));
        }
        if parents.is_empty() != (generation == 1) {
            return Err(DagError::validation(format!(
                "Dagnode {} has generation {} with {} parents",
                id.short(),
                generation,
                parents.len()
            )));
        }

        Ok(Self {
            id,
            generation,
            parents,
        })
    }

    /// Derives the dagnode for a frozen changeset.
    ///
    /// Every parent must already be linked into the changeset's DAG; the
    /// generation is one more than the highest parent generation.
    pub fn from_changeset<F>(changeset: &Changeset, fetch: &F) -> Result<Self>
    where
        F: DagnodeFetch + ?Sized,
    {
        let id = *changeset.id().ok_or(DagError::NotFrozen)?;

        let mut parent_generations = Vec::with_capacity(changeset.parents().len());
        for parent in changeset.parents() {
            let node = fetch
                .fetch_node(changeset.dag_num(), parent)
                .map_err(|e| match e {
                    DagError::NodeNotFound(_) => DagError::MissingParent {
                        parent: *parent,
                        child: id,
                    },
                    other => other,
                })?;
            parent_generations.push(node.generation());
        }

        let generation = expected_generation(parent_generations).ok_or_else(|| {
            DagError::validation(format!(
                "Dagnode {} has a parent at the maximum generation",
                id.short()
            ))
        })?;
        Self::new(id, generation, changeset.parents().iter().copied())
    }

    /// Returns the changeset id this node stands for.
    pub fn id(&self) -> &ContentId {
        &self.id
    }

    /// Returns the generation number.
    pub fn generation(&self) -> i32 {
        self.generation
    }

    /// Returns the parent ids.
    pub fn parents(&self) -> &BTreeSet<ContentId> {
        &self.parents
    }

    /// Returns true if this is the initial node of a DAG.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Checks the generation law against the actual parent nodes.
    pub fn check_parents(&self, parents: &[&Dagnode]) -> Result<()> {
        for parent in parents {
            if !self.parents.contains(parent.id()) {
                return Err(DagError::validation(format!(
                    "{} is not a parent of {}",
                    parent.id().short(),
                    self.id.short()
                )));
            }
        }
        if parents.len() != self.parents.len() {
            return Err(DagError::validation(format!(
                "Dagnode {} expects {} parents, got {}",
                self.id.short(),
                self.parents.len(),
                parents.len()
            )));
        }

        let expected = expected_generation(parents.iter().map(|p| p.generation()))
            .ok_or_else(|| {
                DagError::validation(format!(
                    "Dagnode {} has a parent at the maximum generation",
                    self.id.short()
                ))
            })?;
        if expected != self.generation {
            return Err(DagError::validation(format!(
                "Dagnode {} has generation {}, parents require {}",
                self.id.short(),
                self.generation,
                expected
            )));
        }
        Ok(())
    }

    /// Serializes this node to bytes using bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| DagError::serialization(format!("Failed to serialize Dagnode: {}", e)))
    }

    /// Deserializes a node from bytes, re-checking its shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let node: Dagnode = bincode::deserialize(bytes).map_err(|e| {
            DagError::serialization(format!("Failed to deserialize Dagnode: {}", e))
        })?;
        Self::new(node.id, node.generation, node.parents)
    }
}

impl DagNodeOps for Dagnode {
    fn id(&self) -> &ContentId {
        &self.id
    }

    fn parent_ids(&self) -> Vec<ContentId> {
        self.parents.iter().copied().collect()
    }

    fn generation(&self) -> i32 {
        self.generation
    }
}
