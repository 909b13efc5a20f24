//! DAG fragments for history exchange.
//!
//! A [`DagFrag`] is a partial, transient view of one DAG: a set of member
//! dagnodes plus the *fringe*, the parents of members that were left out.
//! A sender builds a frag from its leaves going back some number of
//! generations; the receiver checks that it already knows every fringe id.
//! If it does, the members can be grafted without breaking connectivity.
//! If not, the sender is asked for a deeper frag.
//!
//! Depth is a difference of generation numbers, not an edge count: loading
//! `n` generations from a start node at generation `g` admits every
//! ancestor with generation `>= g - n`, however many edges away it is.
//!
//! Frags are never hashed or stored; see [`wire`] for the transport form.

pub mod wire;

use crate::dag::{sort_by_generation, ContentId, DagNodeOps, DagNum, Dagnode};
use crate::error::{DagError, Result};
use crate::storage::DagnodeFetch;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, trace};

/// How a member got into the frag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// A node a load started from.
    Start,
    /// An ancestor inside a load's generation window.
    Interior,
}

/// Identity of the repository a frag describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragIdentity {
    /// Repository id.
    pub repo_id: String,
    /// Administrative id.
    pub admin_id: String,
}

#[derive(Debug, Clone)]
struct Member {
    node: Dagnode,
    state: MemberState,
}

impl DagNodeOps for Member {
    fn id(&self) -> &ContentId {
        self.node.id()
    }

    fn parent_ids(&self) -> Vec<ContentId> {
        self.node.parent_ids()
    }

    fn generation(&self) -> i32 {
        self.node.generation()
    }
}

/// What a frag knows about one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragNode<'a> {
    /// A member, with its dagnode.
    Member {
        /// Start or interior.
        state: MemberState,
        /// The member's dagnode.
        node: &'a Dagnode,
    },
    /// Referenced by a member but excluded.
    Fringe {
        /// Generation of the excluded node.
        generation: i32,
    },
}

impl<'a> FragNode<'a> {
    /// Returns the node's generation.
    pub fn generation(&self) -> i32 {
        match self {
            FragNode::Member { node, .. } => node.generation(),
            FragNode::Fringe { generation } => *generation,
        }
    }

    /// Returns the dagnode of a member. Fringe nodes never expose one.
    pub fn dagnode(&self) -> Option<&'a Dagnode> {
        match self {
            FragNode::Member { node, .. } => Some(*node),
            FragNode::Fringe { .. } => None,
        }
    }

    /// Returns true for fringe nodes.
    pub fn is_fringe(&self) -> bool {
        matches!(self, FragNode::Fringe { .. })
    }
}

/// A partial view of one DAG.
#[derive(Clone)]
pub struct DagFrag {
    dag_num: DagNum,
    identity: Option<FragIdentity>,
    members: HashMap<ContentId, Member>,
    fringe: HashMap<ContentId, i32>,
}

impl fmt::Debug for DagFrag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagFrag")
            .field("dag_num", &self.dag_num)
            .field("identity", &self.identity)
            .field("members", &self.members.len())
            .field("fringe", &self.fringe.len())
            .finish()
    }
}

impl DagFrag {
    /// Creates an empty frag signed with a repository identity.
    pub fn new(
        repo_id: impl Into<String>,
        admin_id: impl Into<String>,
        dag_num: DagNum,
    ) -> Result<Self> {
        let repo_id = repo_id.into();
        let admin_id = admin_id.into();
        if repo_id.is_empty() || admin_id.is_empty() {
            return Err(DagError::invalid_argument(
                "frag repo_id and admin_id cannot be empty",
            ));
        }
        Self::build(
            dag_num,
            Some(FragIdentity {
                repo_id,
                admin_id,
            }),
        )
    }

    /// Creates an empty unsigned frag for local ancestry questions.
    ///
    /// Transient frags cannot be serialized or merged with signed ones.
    pub fn new_transient(dag_num: DagNum) -> Result<Self> {
        Self::build(dag_num, None)
    }

    fn build(dag_num: DagNum, identity: Option<FragIdentity>) -> Result<Self> {
        dag_num.validate()?;
        Ok(Self {
            dag_num,
            identity,
            members: HashMap::new(),
            fringe: HashMap::new(),
        })
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Adds a member, taking ownership of its node.
    ///
    /// A fringe entry for the same id is promoted; an existing interior
    /// member is upgraded to start, never the other way round.
    fn absorb(&mut self, node: Dagnode, state: MemberState) {
        let id = *node.id();
        self.fringe.remove(&id);
        match self.members.get_mut(&id) {
            Some(existing) => {
                if state == MemberState::Start {
                    existing.state = MemberState::Start;
                }
            }
            None => {
                self.members.insert(id, Member { node, state });
            }
        }
    }

    /// Marks `start_id` as a start member and loads its ancestors within
    /// `generations` generations of it.
    ///
    /// Ancestors are visited highest generation first. Excluded parents of
    /// the window become fringe entries. Repeated calls accumulate.
    pub fn load_ancestors<F>(
        &mut self,
        fetch: &F,
        start_id: &ContentId,
        generations: i32,
    ) -> Result<()>
    where
        F: DagnodeFetch + ?Sized,
    {
        if generations < 0 {
            return Err(DagError::invalid_argument(format!(
                "generations must be non-negative, got {}",
                generations
            )));
        }

        let start = match self.members.get(start_id) {
            Some(member) => member.node.clone(),
            None => fetch.fetch_node(self.dag_num, start_id)?,
        };
        let gen_limit = start.generation().saturating_sub(generations);
        let members_before = self.members.len();

        let mut visited: HashSet<ContentId> = HashSet::new();
        let mut queue: BinaryHeap<(i32, ContentId)> = BinaryHeap::new();
        visited.insert(*start_id);
        queue.push((start.generation(), *start_id));
        self.absorb(start, MemberState::Start);

        while let Some((_, id)) = queue.pop() {
            let parents = match self.members.get(&id) {
                Some(member) => member.node.parent_ids(),
                None => continue,
            };

            for parent_id in parents {
                if !visited.insert(parent_id) {
                    continue;
                }

                // A known fringe generation below the window needs no fetch.
                if let Some(&generation) = self.fringe.get(&parent_id) {
                    if generation < gen_limit {
                        continue;
                    }
                }

                let parent = match self.members.get(&parent_id) {
                    Some(member) => member.node.clone(),
                    None => fetch.fetch_node(self.dag_num, &parent_id)?,
                };

                if parent.generation() >= gen_limit {
                    queue.push((parent.generation(), parent_id));
                    self.absorb(parent, MemberState::Interior);
                } else if !self.members.contains_key(&parent_id) {
                    trace!(node = %parent_id.short(), generation = parent.generation(), "frag: fringe");
                    self.fringe.insert(parent_id, parent.generation());
                }
            }
        }

        debug!(
            dag = %self.dag_num,
            start = %start_id.short(),
            generations,
            added = self.members.len() - members_before,
            members = self.members.len(),
            fringe = self.fringe.len(),
            "frag_load_ancestors"
        );
        Ok(())
    }

    /// Loads ancestors from every id in `leaves`.
    pub fn load_leaves<F, I>(&mut self, fetch: &F, leaves: I, generations: i32) -> Result<()>
    where
        F: DagnodeFetch + ?Sized,
        I: IntoIterator<Item = ContentId>,
    {
        for leaf in leaves {
            self.load_ancestors(fetch, &leaf, generations)?;
        }
        Ok(())
    }

    fn generation_range(&self) -> Option<(i32, i32)> {
        let max = self.members.values().map(|m| m.node.generation()).max()?;
        let min = self
            .members
            .values()
            .map(|m| m.node.generation())
            .chain(self.fringe.values().copied())
            .min()?;
        Some((min, max))
    }

    /// Merges `other` into this frag, consuming it.
    ///
    /// Both frags must carry the same dag number and identity, and their
    /// generation ranges (fringe included) must overlap or touch. On error
    /// this frag is unchanged.
    pub fn merge(&mut self, other: DagFrag) -> Result<()> {
        if self.dag_num != other.dag_num {
            return Err(DagError::incompatible_frags(format!(
                "dag {} vs dag {}",
                self.dag_num, other.dag_num
            )));
        }
        if self.identity != other.identity {
            return Err(DagError::incompatible_frags(match (&self.identity, &other.identity) {
                (None, _) | (_, None) => "transient and signed frags cannot be merged".to_string(),
                (Some(a), Some(b)) => format!(
                    "repository {}/{} vs {}/{}",
                    a.repo_id, a.admin_id, b.repo_id, b.admin_id
                ),
            }));
        }

        if let (Some((a_min, a_max)), Some((b_min, b_max))) =
            (self.generation_range(), other.generation_range())
        {
            if a_max.saturating_add(1) < b_min || b_max.saturating_add(1) < a_min {
                return Err(DagError::FragGap(format!(
                    "generations {}..={} and {}..={}",
                    a_min, a_max, b_min, b_max
                )));
            }
        }

        let DagFrag {
            members, fringe, ..
        } = other;
        for member in members.into_values() {
            self.absorb(member.node, member.state);
        }
        for (id, generation) in fringe {
            if !self.members.contains_key(&id) {
                self.fringe.insert(id, generation);
            }
        }

        debug!(
            dag = %self.dag_num,
            members = self.members.len(),
            fringe = self.fringe.len(),
            "frag_merge"
        );
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns what the frag knows about `id`, or `None` if it is absent.
    pub fn query(&self, id: &ContentId) -> Option<FragNode<'_>> {
        if let Some(member) = self.members.get(id) {
            return Some(FragNode::Member {
                state: member.state,
                node: &member.node,
            });
        }
        self.fringe
            .get(id)
            .map(|&generation| FragNode::Fringe { generation })
    }

    /// Iterates members in ascending generation order (ties by id), so
    /// ancestors come before descendants.
    pub fn members(&self) -> impl Iterator<Item = (&Dagnode, MemberState)> + '_ {
        let mut ordered: Vec<&Member> = self.members.values().collect();
        sort_by_generation(&mut ordered);
        ordered.into_iter().map(|m| (&m.node, m.state))
    }

    /// Iterates fringe ids with their generations, in no particular order.
    pub fn fringe(&self) -> impl Iterator<Item = (&ContentId, i32)> + '_ {
        self.fringe.iter().map(|(id, generation)| (id, *generation))
    }

    /// Returns the fringe ids `receiver` does not know, sorted.
    ///
    /// An empty result means the members can be applied on the receiver
    /// without breaking connectivity.
    pub fn unknown_fringe<F>(&self, receiver: &F) -> Result<Vec<ContentId>>
    where
        F: DagnodeFetch + ?Sized,
    {
        let mut unknown = Vec::new();
        for id in self.fringe.keys() {
            match receiver.fetch_node(self.dag_num, id) {
                Ok(_) => {}
                Err(DagError::NodeNotFound(_)) => unknown.push(*id),
                Err(e) => return Err(e),
            }
        }
        unknown.sort();
        Ok(unknown)
    }

    /// Returns true if `id` is a member or fringe node.
    pub fn contains(&self, id: &ContentId) -> bool {
        self.members.contains_key(id) || self.fringe.contains_key(id)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the frag has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of fringe nodes.
    pub fn fringe_len(&self) -> usize {
        self.fringe.len()
    }

    /// Returns the DAG this frag describes.
    pub fn dag_num(&self) -> DagNum {
        self.dag_num
    }

    /// Returns the signing identity, `None` for transient frags.
    pub fn identity(&self) -> Option<&FragIdentity> {
        self.identity.as_ref()
    }

    /// Returns the repository id of a signed frag.
    pub fn repo_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.repo_id.as_str())
    }

    /// Returns the admin id of a signed frag.
    pub fn admin_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.admin_id.as_str())
    }

    /// Returns true for unsigned frags.
    pub fn is_transient(&self) -> bool {
        self.identity.is_none()
    }
}
