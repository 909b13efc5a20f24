//! # dagcore - Content-Addressed History DAG
//!
//! The object and history model of a distributed version-control engine:
//! immutable, hash-verified snapshots ("changesets") linked into per-history
//! DAGs, the two-phase transaction that creates them, and the partial-DAG
//! fragments two repositories exchange to synchronize.
//!
//! ## Components
//!
//! - [`dag`]: content ids (SHA3-256), DAG numbers, dagnodes, graph helpers
//! - [`changeset`]: the snapshot record and its freeze discipline
//! - [`committing`]: persist-then-link commit coordinator
//! - [`frag`]: DAG fragments, their fringe handshake and wire document
//! - [`storage`]: blob/DAG/audit store traits, in-memory and RocksDB stores
//! - [`repo`]: a repository handle with config and a dagnode cache
//!
//! ## Example
//!
//! ```rust
//! use dagcore::{Audit, DagNum, Repo, RepoConfig};
//! # fn main() -> dagcore::Result<()> {
//! let repo = Repo::in_memory(RepoConfig::new("repo-1", "admin-1"))?;
//!
//! let mut commit = repo.begin_commit(DagNum::VERSION_CONTROL, Audit::now("alice"))?;
//! let readme = commit.add_bytes(b"hello", false)?;
//! commit.add_reference(dagcore::ReferenceKind::File, readme)?;
//! commit.set_tree_root(None)?;
//! let (changeset, node) = commit.end()?;
//!
//! assert_eq!(node.generation(), 1);
//! let frag = repo.build_frag(DagNum::VERSION_CONTROL, 1)?;
//! assert!(frag.contains(changeset.id().unwrap()));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod changeset;
pub mod committing;
pub mod config;
pub mod constants;
pub mod dag;
pub mod error;
pub mod frag;
pub mod repo;
pub mod storage;

pub use cache::DagnodeCache;
pub use changeset::{
    Changeset, DbRecord, DbState, EntryKind, ReferenceKind, RootState, SchemaVersion,
    StructuralObject, TreeEntry, TreeNode,
};
pub use committing::{Audit, Committing};
pub use config::RepoConfig;
pub use dag::{ContentId, DagKind, DagNum, Dagnode};
pub use error::{DagError, Result};
pub use frag::{DagFrag, FragIdentity, FragNode, MemberState};
pub use repo::Repo;
pub use storage::{
    AuditLog, AuditRecord, BlobHint, BlobStore, DagStore, DagnodeFetch, MemoryBlobStore,
    MemoryDagStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
