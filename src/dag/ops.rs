//! Generic DAG operations.
//!
//! These algorithms work on any node type that exposes an id, parent ids and
//! a generation number, and are shared by the stores, the fragment builder and
//! the tests:
//! - Computing the generation a node must have given its parents
//! - Ordering nodes so ancestors come before descendants

use crate::dag::ContentId;

/// Trait for types that can participate in DAG operations.
pub trait DagNodeOps {
    /// Returns the content id of this node.
    fn id(&self) -> &ContentId;

    /// Returns the ids of this node's parents.
    fn parent_ids(&self) -> Vec<ContentId>;

    /// Returns the length of the longest ancestor chain back to a root (roots are 1).
    fn generation(&self) -> i32;
}

/// Returns the generation a node with the given parent generations must have.
///
/// A node with no parents is a root and has generation 1. Returns `None`
/// when the highest parent generation leaves no room for a child, which
/// only happens with generations read from untrusted input.
pub fn expected_generation<I>(parent_generations: I) -> Option<i32>
where
    I: IntoIterator<Item = i32>,
{
    match parent_generations.into_iter().max() {
        Some(max) => max.checked_add(1),
        None => Some(1),
    }
}

/// Sorts nodes so that every node comes after all of its ancestors.
///
/// Generation numbers already give a topological order: a parent's generation
/// is always strictly lower than its child's. Ties are broken by id so the
/// order is stable across runs.
pub fn sort_by_generation<N: DagNodeOps>(nodes: &mut [&N]) {
    nodes.sort_by(|a, b| {
        a.generation()
            .cmp(&b.generation())
            .then_with(|| a.id().cmp(b.id()))
    });
}
