//! Repository handle.
//!
//! A [`Repo`] ties together the configuration, the blob and DAG stores and
//! a dagnode cache scoped to this handle. Dropping the repo drops the cache.

use crate::cache::DagnodeCache;
use crate::changeset::{Changeset, SchemaVersion};
use crate::committing::{Audit, Committing};
use crate::config::RepoConfig;
use crate::dag::{ContentId, DagNum, Dagnode};
use crate::error::{DagError, Result};
use crate::frag::DagFrag;
use crate::storage::{BlobStore, DagStore, DagnodeFetch, MemoryBlobStore, MemoryDagStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// An open repository.
pub struct Repo {
    config: RepoConfig,
    blobs: Arc<dyn BlobStore>,
    dags: Arc<dyn DagStore>,
    cache: DagnodeCache,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("repo_id", &self.config.repo_id)
            .field("admin_id", &self.config.admin_id)
            .field("dags", &self.config.registered_dags.len())
            .finish()
    }
}

impl Repo {
    /// Opens a repository over existing stores.
    ///
    /// Several `Repo` handles may share the same stores.
    pub fn open(
        config: RepoConfig,
        blobs: Arc<dyn BlobStore>,
        dags: Arc<dyn DagStore>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            repo_id = %config.repo_id,
            dags = config.registered_dags.len(),
            "Repository opened"
        );
        Ok(Self {
            cache: DagnodeCache::new(config.dagnode_cache_capacity),
            config,
            blobs,
            dags,
        })
    }

    /// Opens a repository backed by fresh in-memory stores.
    pub fn in_memory(config: RepoConfig) -> Result<Self> {
        Self::open(
            config,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryDagStore::new()),
        )
    }

    /// Opens a repository stored in a RocksDB database at `path`.
    #[cfg(feature = "rocksdb")]
    pub fn open_rocksdb(
        config: RepoConfig,
        path: impl AsRef<std::path::Path>,
        rocks: &crate::storage::RocksDbConfig,
    ) -> Result<Self> {
        let store = Arc::new(crate::storage::RocksRepoStore::open(path, rocks)?);
        Self::open(config, store.clone(), store)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Returns the blob store.
    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Returns the DAG store.
    pub fn dags(&self) -> &dyn DagStore {
        self.dags.as_ref()
    }

    /// Returns the dagnode cache.
    pub fn cache(&self) -> &DagnodeCache {
        &self.cache
    }

    /// Checks that `dag_num` is well-formed and registered here.
    pub fn check_dag_num(&self, dag_num: DagNum) -> Result<()> {
        dag_num.validate()?;
        if !self.config.registered_dags.contains(&dag_num) {
            return Err(DagError::invalid_argument(format!(
                "dag {} is not registered in repository {}",
                dag_num, self.config.repo_id
            )));
        }
        Ok(())
    }

    /// Returns the current leaves of a DAG.
    pub fn leaves(&self, dag_num: DagNum) -> Result<BTreeSet<ContentId>> {
        self.check_dag_num(dag_num)?;
        self.dags.fetch_leaves(dag_num)
    }

    /// Loads a changeset, verifying its hash if the configuration says so.
    pub fn load_changeset(&self, id: &ContentId) -> Result<Changeset> {
        Changeset::load(self.blobs(), id, self.config.verify_on_load)
    }

    /// Opens a commit on `dag_num` in the current schema version.
    pub fn begin_commit(&self, dag_num: DagNum, audit: Audit) -> Result<Committing<'_>> {
        Committing::begin(self, dag_num, audit, SchemaVersion::default())
    }

    /// Creates an empty frag signed with this repository's identity.
    pub fn new_frag(&self, dag_num: DagNum) -> Result<DagFrag> {
        self.check_dag_num(dag_num)?;
        DagFrag::new(
            self.config.repo_id.clone(),
            self.config.admin_id.clone(),
            dag_num,
        )
    }

    /// Builds a signed frag from every leaf of `dag_num`.
    pub fn build_frag(&self, dag_num: DagNum, generations: i32) -> Result<DagFrag> {
        let leaves = self.leaves(dag_num)?;
        let mut frag = self.new_frag(dag_num)?;
        frag.load_leaves(self, leaves, generations)?;
        debug!(
            dag = %dag_num,
            generations,
            members = frag.len(),
            fringe = frag.fringe_len(),
            "build_frag"
        );
        Ok(frag)
    }
}

impl DagnodeFetch for Repo {
    fn fetch_node(&self, dag_num: DagNum, id: &ContentId) -> Result<Dagnode> {
        self.cache.get_or_fetch(self.dags.as_ref(), dag_num, id)
    }
}
