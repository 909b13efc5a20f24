//! Value types carried by changesets.

use crate::dag::ContentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema version of the serialized changeset format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SchemaVersion {
    /// First changeset format.
    V1 = 1,
}

impl Default for SchemaVersion {
    fn default() -> Self {
        SchemaVersion::V1
    }
}

/// Which bucket of a changeset a referenced blob belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReferenceKind {
    /// A tree node (directory listing).
    TreeNode = 1,
    /// File contents.
    File = 2,
    /// A structured record.
    DbRecord = 3,
    /// A structured-record template.
    DbTemplate = 4,
    /// An attachment to a structured record.
    Attachment = 5,
}

impl ReferenceKind {
    /// Returns true if tree DAGs may reference blobs of this kind.
    pub fn allowed_in_tree(&self) -> bool {
        matches!(self, ReferenceKind::TreeNode | ReferenceKind::File)
    }

    /// Returns true if db DAGs may reference blobs of this kind.
    pub fn allowed_in_db(&self) -> bool {
        matches!(
            self,
            ReferenceKind::DbRecord | ReferenceKind::DbTemplate | ReferenceKind::Attachment
        )
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::TreeNode => write!(f, "TreeNode"),
            ReferenceKind::File => write!(f, "File"),
            ReferenceKind::DbRecord => write!(f, "DbRecord"),
            ReferenceKind::DbTemplate => write!(f, "DbTemplate"),
            ReferenceKind::Attachment => write!(f, "Attachment"),
        }
    }
}

/// Structural roots of a db changeset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbState {
    /// Root of the record delta introduced by this changeset.
    pub delta_root: Option<ContentId>,
    /// Template the records conform to.
    pub template: Option<ContentId>,
}

/// The explicitly declared root of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootState {
    /// Tree DAGs: the root tree node, or none for an empty snapshot.
    Tree(Option<ContentId>),
    /// Db DAGs: delta and template roots.
    Db(DbState),
}
