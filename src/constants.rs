//! Shared limits for changesets, streams and fragment documents.

// =============================================================================
// Changeset Limits
// =============================================================================

/// Default maximum number of parents a single changeset may declare.
pub const DEFAULT_MAX_PARENTS: usize = 16;

/// Maximum entries in one tree node.
pub const MAX_TREE_ENTRIES: usize = 100_000;

/// Maximum length of a tree entry name in bytes.
pub const MAX_ENTRY_NAME_SIZE: usize = 1024;

// =============================================================================
// Blob Streams
// =============================================================================

/// Chunk size used when streaming large content into the blob store (64 KiB).
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Caches
// =============================================================================

/// Default number of dagnodes a repository keeps cached.
pub const DEFAULT_DAGNODE_CACHE_CAPACITY: usize = 10_000;

// =============================================================================
// DAG Fragments
// =============================================================================

/// Version tag written into serialized fragment documents.
pub const FRAG_DOC_VERSION: u32 = 1;
