//! Structural objects a changeset references.
//!
//! The tree and record layers are opaque to the DAG core except for one
//! thing: before a structural object is stored, its internal consistency is
//! checked, and its id is filed under the matching [`ReferenceKind`].

use crate::changeset::types::ReferenceKind;
use crate::constants::{MAX_ENTRY_NAME_SIZE, MAX_TREE_ENTRIES};
use crate::dag::ContentId;
use crate::error::{DagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An object with a typed place in a changeset.
pub trait StructuralObject {
    /// The bucket this object's id is recorded under.
    fn reference_kind(&self) -> ReferenceKind;

    /// Checks internal consistency.
    fn validate(&self) -> Result<()>;

    /// Deterministic serialized form; the object's id is its hash.
    fn canonical_bytes(&self) -> Result<Vec<u8>>;

    /// Computes the id the object will be stored under.
    fn content_id(&self) -> Result<ContentId> {
        Ok(ContentId::of_bytes(&self.canonical_bytes()?))
    }
}

// =============================================================================
// Tree nodes
// =============================================================================

/// What a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// File contents blob.
    File,
    /// Another tree node.
    Directory,
    /// Blob holding the link target.
    Symlink,
}

/// One named entry of a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry name within its directory.
    pub name: String,
    /// Entry type.
    pub kind: EntryKind,
    /// Id of the referenced blob or tree node.
    pub id: ContentId,
}

/// A directory listing: entries sorted by name.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    entries: Vec<TreeEntry>,
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("entries", &self.entries.len())
            .finish()
    }
}

fn check_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DagError::validation("Tree entry name cannot be empty"));
    }
    if name.len() > MAX_ENTRY_NAME_SIZE {
        return Err(DagError::validation(format!(
            "Tree entry name exceeds maximum size of {} bytes",
            MAX_ENTRY_NAME_SIZE
        )));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(DagError::validation(format!(
            "Invalid tree entry name: {:?}",
            name
        )));
    }
    Ok(())
}

impl TreeNode {
    /// Creates an empty tree node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree node from unordered entries.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Result<Self> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let node = Self { entries };
        node.validate()?;
        Ok(node)
    }

    /// Adds an entry, keeping names sorted. Fails on a duplicate name.
    pub fn insert(&mut self, name: impl Into<String>, kind: EntryKind, id: ContentId) -> Result<()> {
        let name = name.into();
        check_entry_name(&name)?;
        if self.entries.len() >= MAX_TREE_ENTRIES {
            return Err(DagError::validation(format!(
                "Tree node cannot have more than {} entries",
                MAX_TREE_ENTRIES
            )));
        }

        match self
            .entries
            .binary_search_by(|e| e.name.as_str().cmp(name.as_str()))
        {
            Ok(_) => Err(DagError::validation(format!(
                "Duplicate tree entry name: {:?}",
                name
            ))),
            Err(pos) => {
                self.entries.insert(pos, TreeEntry { name, kind, id });
                Ok(())
            }
        }
    }

    /// Looks an entry up by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Entries in name order.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the node has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes and validates a stored tree node.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let node: TreeNode = bincode::deserialize(bytes).map_err(|e| {
            DagError::serialization(format!("Failed to deserialize tree node: {}", e))
        })?;
        node.validate()?;
        Ok(node)
    }
}

impl StructuralObject for TreeNode {
    fn reference_kind(&self) -> ReferenceKind {
        ReferenceKind::TreeNode
    }

    fn validate(&self) -> Result<()> {
        if self.entries.len() > MAX_TREE_ENTRIES {
            return Err(DagError::validation(format!(
                "Tree node cannot have more than {} entries",
                MAX_TREE_ENTRIES
            )));
        }
        for entry in &self.entries {
            check_entry_name(&entry.name)?;
        }
        // Strictly ascending names: sorted and unique.
        for pair in self.entries.windows(2) {
            if pair[0].name >= pair[1].name {
                return Err(DagError::validation(format!(
                    "Tree entries out of order or duplicated at {:?}",
                    pair[1].name
                )));
            }
        }
        Ok(())
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| DagError::serialization(format!("Failed to serialize tree node: {}", e)))
    }
}

// =============================================================================
// Structured records
// =============================================================================

/// A structured record conforming to a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbRecord {
    /// Id of the template blob describing the record's fields.
    pub template: ContentId,
    /// Field values by name.
    pub fields: BTreeMap<String, String>,
}

impl DbRecord {
    /// Creates a record with no fields yet.
    pub fn new(template: ContentId) -> Self {
        Self {
            template,
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, returning the record for chaining.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl StructuralObject for DbRecord {
    fn reference_kind(&self) -> ReferenceKind {
        ReferenceKind::DbRecord
    }

    fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(DagError::validation("Record must have at least one field"));
        }
        if self.fields.keys().any(|k| k.is_empty()) {
            return Err(DagError::validation("Record field name cannot be empty"));
        }
        Ok(())
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| DagError::serialization(format!("Failed to serialize record: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(n: u8) -> ContentId {
        ContentId::of_bytes(&[n])
    }

    #[test]
    fn test_tree_insert_keeps_order() {
        let mut tree = TreeNode::new();
        tree.insert("zeta", EntryKind::File, blob(1)).unwrap();
        tree.insert("alpha", EntryKind::Directory, blob(2)).unwrap();
        tree.insert("mid", EntryKind::Symlink, blob(3)).unwrap();

        let names: Vec<_> = tree.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(tree.get("mid").unwrap().kind, EntryKind::Symlink);
        tree.validate().unwrap();
    }

    #[test]
    fn test_tree_rejects_bad_names() {
        let mut tree = TreeNode::new();
        tree.insert("a", EntryKind::File, blob(1)).unwrap();
        assert!(tree.insert("a", EntryKind::File, blob(2)).is_err());
        assert!(tree.insert("", EntryKind::File, blob(2)).is_err());
        assert!(tree.insert("x/y", EntryKind::File, blob(2)).is_err());
        assert!(tree.insert("..", EntryKind::Directory, blob(2)).is_err());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_tree_from_entries_detects_duplicates() {
        let entry = |name: &str| TreeEntry {
            name: name.to_string(),
            kind: EntryKind::File,
            id: blob(1),
        };
        let tree = TreeNode::from_entries(vec![entry("b"), entry("a")]).unwrap();
        assert_eq!(tree.entries()[0].name, "a");

        assert!(TreeNode::from_entries(vec![entry("a"), entry("a")]).is_err());
    }

    #[test]
    fn test_tree_id_is_order_independent() {
        let mut one = TreeNode::new();
        one.insert("a", EntryKind::File, blob(1)).unwrap();
        one.insert("b", EntryKind::File, blob(2)).unwrap();

        let mut two = TreeNode::new();
        two.insert("b", EntryKind::File, blob(2)).unwrap();
        two.insert("a", EntryKind::File, blob(1)).unwrap();

        assert_eq!(one.content_id().unwrap(), two.content_id().unwrap());
        let decoded = TreeNode::from_bytes(&one.canonical_bytes().unwrap()).unwrap();
        assert_eq!(decoded, one);
    }

    #[test]
    fn test_record_validation() {
        let empty = DbRecord::new(blob(9));
        assert!(empty.validate().is_err());

        let record = DbRecord::new(blob(9)).with_field("title", "Fix login");
        record.validate().unwrap();
        assert_eq!(record.reference_kind(), ReferenceKind::DbRecord);

        let unnamed = DbRecord::new(blob(9)).with_field("", "x");
        assert!(unnamed.validate().is_err());
    }
}
