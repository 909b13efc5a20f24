//! Transport form of a [`DagFrag`].
//!
//! A frag travels as a self-describing JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "repo_id": "...",
//!   "admin_id": "...",
//!   "dag_num": 4294967297,
//!   "members": [{"id": "<hex>", "generation": 2, "state": "start", "parents": ["<hex>"]}],
//!   "fringe": [{"id": "<hex>", "generation": 1}]
//! }
//! ```
//!
//! Members are written in ascending generation order and fringe entries in
//! id order, but readers must not depend on either. A document is never
//! hashed; only the frag rebuilt from it is meaningful. Deserialization
//! checks everything the frag relies on and reports `MalformedFrag`.

use super::{DagFrag, FragIdentity, Member, MemberState};
use crate::constants::FRAG_DOC_VERSION;
use crate::dag::{expected_generation, ContentId, DagNum, Dagnode};
use crate::error::{DagError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct FragDoc {
    version: u32,
    repo_id: String,
    admin_id: String,
    dag_num: DagNum,
    members: Vec<MemberDoc>,
    fringe: Vec<FringeDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemberDoc {
    id: ContentId,
    generation: i32,
    state: MemberState,
    parents: Vec<ContentId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FringeDoc {
    id: ContentId,
    generation: i32,
}

impl DagFrag {
    /// Serializes a signed frag to its transport document.
    ///
    /// Transient frags are local-only and fail with `InvalidArgument`.
    pub fn serialize(&self) -> Result<Value> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            DagError::invalid_argument("transient frags cannot be serialized")
        })?;

        let members = self
            .members()
            .map(|(node, state)| MemberDoc {
                id: *node.id(),
                generation: node.generation(),
                state,
                parents: node.parents().iter().copied().collect(),
            })
            .collect();

        let mut fringe: Vec<FringeDoc> = self
            .fringe()
            .map(|(id, generation)| FringeDoc {
                id: *id,
                generation,
            })
            .collect();
        fringe.sort_by(|a, b| a.id.cmp(&b.id));

        let doc = FragDoc {
            version: FRAG_DOC_VERSION,
            repo_id: identity.repo_id.clone(),
            admin_id: identity.admin_id.clone(),
            dag_num: self.dag_num,
            members,
            fringe,
        };
        serde_json::to_value(&doc)
            .map_err(|e| DagError::serialization(format!("Failed to serialize frag: {}", e)))
    }

    /// Rebuilds a frag from a transport document.
    pub fn deserialize(doc: &Value) -> Result<DagFrag> {
        let doc: FragDoc = serde_json::from_value(doc.clone())
            .map_err(|e| DagError::malformed_frag(format!("unreadable document: {}", e)))?;

        if doc.version != FRAG_DOC_VERSION {
            return Err(DagError::malformed_frag(format!(
                "unsupported version {} (expected {})",
                doc.version, FRAG_DOC_VERSION
            )));
        }
        doc.dag_num
            .validate()
            .map_err(|e| DagError::malformed_frag(e.to_string()))?;
        if doc.repo_id.is_empty() || doc.admin_id.is_empty() {
            return Err(DagError::malformed_frag("missing repository identity"));
        }

        let mut fringe: HashMap<ContentId, i32> = HashMap::with_capacity(doc.fringe.len());
        for entry in &doc.fringe {
            // A fringe node is always the parent of some member.
            if entry.generation < 1 || entry.generation == i32::MAX {
                return Err(DagError::malformed_frag(format!(
                    "fringe {} has generation {}",
                    entry.id.short(),
                    entry.generation
                )));
            }
            if fringe.insert(entry.id, entry.generation).is_some() {
                return Err(DagError::malformed_frag(format!(
                    "fringe {} listed twice",
                    entry.id.short()
                )));
            }
        }

        let mut members: HashMap<ContentId, Member> = HashMap::with_capacity(doc.members.len());
        for entry in doc.members {
            if fringe.contains_key(&entry.id) {
                return Err(DagError::malformed_frag(format!(
                    "{} is both member and fringe",
                    entry.id.short()
                )));
            }
            let id = entry.id;
            let node = Dagnode::new(id, entry.generation, entry.parents)
                .map_err(|e| DagError::malformed_frag(e.to_string()))?;
            let member = Member {
                node,
                state: entry.state,
            };
            if members.insert(id, member).is_some() {
                return Err(DagError::malformed_frag(format!(
                    "member {} listed twice",
                    id.short()
                )));
            }
        }

        check_links(&members, &fringe)?;

        debug!(
            dag = %doc.dag_num,
            members = members.len(),
            fringe = fringe.len(),
            "frag_deserialize"
        );
        Ok(DagFrag {
            dag_num: doc.dag_num,
            identity: Some(FragIdentity {
                repo_id: doc.repo_id,
                admin_id: doc.admin_id,
            }),
            members,
            fringe,
        })
    }
}

/// Every member parent must be a member or fringe node, with generations
/// consistent with the member's own, and every fringe node must be
/// referenced by some member.
fn check_links(members: &HashMap<ContentId, Member>, fringe: &HashMap<ContentId, i32>) -> Result<()> {
    let mut referenced: HashSet<&ContentId> = HashSet::new();

    for member in members.values() {
        let node = &member.node;
        let mut parent_generations = Vec::with_capacity(node.parents().len());
        for parent in node.parents() {
            let generation = match (members.get(parent), fringe.get(parent)) {
                (Some(m), _) => m.node.generation(),
                (None, Some(g)) => *g,
                (None, None) => {
                    return Err(DagError::malformed_frag(format!(
                        "parent {} of {} is neither member nor fringe",
                        parent.short(),
                        node.id().short()
                    )))
                }
            };
            referenced.insert(parent);
            parent_generations.push(generation);
        }

        let expected = expected_generation(parent_generations).ok_or_else(|| {
            DagError::malformed_frag(format!(
                "{} has a parent at the maximum generation",
                node.id().short()
            ))
        })?;
        if expected != node.generation() {
            return Err(DagError::malformed_frag(format!(
                "{} has generation {}, parents require {}",
                node.id().short(),
                node.generation(),
                expected
            )));
        }
    }

    if let Some(orphan) = fringe.keys().find(|id| !referenced.contains(id)) {
        return Err(DagError::malformed_frag(format!(
            "fringe {} is not a parent of any member",
            orphan.short()
        )));
    }
    Ok(())
}
