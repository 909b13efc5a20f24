//! Error types for changeset, committing and DAG fragment operations.

use crate::dag::ContentId;
use thiserror::Error;

/// Result type alias for dagcore operations.
pub type Result<T> = std::result::Result<T, DagError>;

/// Main error type for dagcore operations.
#[derive(Error, Debug)]
pub enum DagError {
    /// Caller passed a value the operation cannot accept (bad dag number, wrong root kind...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A changeset was saved before its root state was declared
    #[error("Incomplete changeset: {0}")]
    IncompleteChangeset(String),

    /// Mutation or second save of a frozen changeset
    #[error("Changeset is already frozen")]
    AlreadyFrozen,

    /// Operation requires a frozen changeset
    #[error("Changeset is not frozen")]
    NotFrozen,

    /// Fetched bytes do not hash to the requested id
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The id that was requested.
        expected: ContentId,
        /// The id recomputed from the fetched bytes.
        actual: ContentId,
    },

    /// The dagnode is already linked into the DAG
    #[error("Dagnode {0} already exists")]
    NodeAlreadyExists(ContentId),

    /// The dagnode is not part of the DAG
    #[error("Dagnode {0} not found")]
    NodeNotFound(ContentId),

    /// No blob is stored under this id
    #[error("Blob {0} not found")]
    BlobNotFound(ContentId),

    /// A parent referenced by a changeset or dagnode is not linked
    #[error("Parent {parent} of {child} is not in the DAG")]
    MissingParent {
        /// The parent that could not be found.
        parent: ContentId,
        /// The node that references it.
        child: ContentId,
    },

    /// Two frags with different identity signatures
    #[error("Incompatible frags: {0}")]
    IncompatibleFrags(String),

    /// Two frags whose generation ranges leave a gap
    #[error("Frag generation ranges do not touch: {0}")]
    FragGap(String),

    /// A deserialized frag document is structurally invalid
    #[error("Malformed frag: {0}")]
    MalformedFrag(String),

    /// Structural object or dagnode validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stage 1 of a commit succeeded but the changeset could not be linked into the DAG.
    ///
    /// The changeset blob is durable and loadable; it is simply not part of history.
    #[error("Changeset {changeset_id} was stored but not linked into the DAG: {source}")]
    ChangesetUnlinked {
        /// Id of the persisted, unlinked changeset.
        changeset_id: ContentId,
        /// The linking failure.
        #[source]
        source: Box<DagError>,
    },
}

impl DagError {
    /// Creates a new invalid argument error.
    pub fn invalid_argument<T: ToString>(msg: T) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    /// Creates a new incomplete changeset error.
    pub fn incomplete<T: ToString>(msg: T) -> Self {
        Self::IncompleteChangeset(msg.to_string())
    }

    /// Creates a new incompatible frags error.
    pub fn incompatible_frags<T: ToString>(msg: T) -> Self {
        Self::IncompatibleFrags(msg.to_string())
    }

    /// Creates a new malformed frag error.
    pub fn malformed_frag<T: ToString>(msg: T) -> Self {
        Self::MalformedFrag(msg.to_string())
    }

    /// Creates a new validation error.
    pub fn validation<T: ToString>(msg: T) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Wraps a linking failure for a changeset that is already persisted.
    pub fn unlinked(changeset_id: ContentId, source: DagError) -> Self {
        Self::ChangesetUnlinked {
            changeset_id,
            source: Box::new(source),
        }
    }

    /// Returns true for conditions that a concurrent writer of identical content produces.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, DagError::NodeAlreadyExists(_))
    }

    /// Returns the id of a changeset that was persisted but left out of history.
    pub fn changeset_persisted(&self) -> Option<&ContentId> {
        match self {
            DagError::ChangesetUnlinked { changeset_id, .. } => Some(changeset_id),
            _ => None,
        }
    }
}
