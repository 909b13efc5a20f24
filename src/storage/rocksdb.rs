//! RocksDB plumbing shared by the persistent stores.
//!
//! Tuning presets, composite keys and a thin handle over a multi-threaded
//! database. Values are plain bytes; callers choose their own encoding.

use crate::error::{DagError, Result};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    MultiThreaded, Options, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace};

const MIB: usize = 1024 * 1024;

// =============================================================================
// RocksDB Configuration
// =============================================================================

/// Tuning for a RocksDB-backed repository store.
///
/// Missing fields in a config file fall back to [`RocksDbConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    /// Open file handle limit.
    pub max_open_files: i32,
    /// Info log files kept on disk.
    pub keep_log_file_num: usize,
    /// WAL size that triggers a flush, in bytes.
    pub max_wal_size: u64,
    /// Memtable size in bytes.
    pub write_buffer_size: usize,
    /// Memtables kept before stalling writes.
    pub max_write_buffer_number: i32,
    /// SST target size in bytes.
    pub target_file_size_base: u64,
    /// fsync the WAL when a DAG transaction commits.
    pub sync_dag_writes: bool,
}

impl Default for RocksDbConfig {
    /// Sized for a single developer checkout.
    fn default() -> Self {
        Self {
            max_open_files: 128,
            keep_log_file_num: 2,
            max_wal_size: (32 * MIB) as u64,
            write_buffer_size: 32 * MIB,
            max_write_buffer_number: 2,
            target_file_size_base: (32 * MIB) as u64,
            sync_dag_writes: false,
        }
    }
}

impl RocksDbConfig {
    /// Preset for a shared repository many clients push to.
    pub fn for_server() -> Self {
        Self {
            max_open_files: 256,
            keep_log_file_num: 3,
            max_wal_size: (64 * MIB) as u64,
            write_buffer_size: 64 * MIB,
            max_write_buffer_number: 3,
            target_file_size_base: (64 * MIB) as u64,
            sync_dag_writes: true,
        }
    }

    fn db_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(self.keep_log_file_num);
        opts.set_max_total_wal_size(self.max_wal_size);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_target_file_size_base(self.target_file_size_base);
        opts
    }
}

/// A column family to open, and whether its values get compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnFamilySpec {
    /// Column family name.
    pub name: &'static str,
    /// Compress values with LZ4.
    pub compressed: bool,
}

impl ColumnFamilySpec {
    /// A column family with LZ4-compressed values.
    pub const fn compressed(name: &'static str) -> Self {
        Self {
            name,
            compressed: true,
        }
    }

    /// A column family stored as-is.
    pub const fn raw(name: &'static str) -> Self {
        Self {
            name,
            compressed: false,
        }
    }

    fn descriptor(&self) -> ColumnFamilyDescriptor {
        let mut opts = Options::default();
        opts.set_compression_type(if self.compressed {
            DBCompressionType::Lz4
        } else {
            DBCompressionType::None
        });
        ColumnFamilyDescriptor::new(self.name, opts)
    }
}

/// Joins key parts with `:`.
///
/// Callers that scan by the first part must give it a fixed length, or a
/// prefix scan may run into a longer sibling.
pub fn composite_key(head: &[u8], tail: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(head.len() + 1 + tail.len());
    key.extend_from_slice(head);
    key.push(b':');
    key.extend_from_slice(tail);
    key
}

// =============================================================================
// Database Handle
// =============================================================================

/// A multi-threaded RocksDB database with named column families.
pub struct RocksDbHandle {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksDbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbHandle")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksDbHandle {
    /// Opens (or creates) a database with exactly these column families.
    pub fn open(
        path: impl AsRef<Path>,
        config: &RocksDbConfig,
        column_families: &[ColumnFamilySpec],
    ) -> Result<Self> {
        let path = path.as_ref();
        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &config.db_options(),
            path,
            column_families.iter().map(ColumnFamilySpec::descriptor),
        )
        .map_err(|e| DagError::storage(format!("Failed to open RocksDB: {}", e)))?;

        info!(
            path = %path.display(),
            column_families = column_families.len(),
            sync = config.sync_dag_writes,
            "RocksDB opened"
        );
        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.sync_dag_writes,
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| DagError::storage(format!("Column family '{}' not found", name)))
    }

    /// Writes one value outside any batch.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| DagError::storage(format!("Failed to write to {}: {}", cf_name, e)))?;
        trace!(cf = cf_name, bytes = value.len(), "db_put");
        Ok(())
    }

    /// Reads one value.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        let value = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| DagError::storage(format!("Failed to read from {}: {}", cf_name, e)))?;
        trace!(cf = cf_name, found = value.is_some(), "db_get");
        Ok(value)
    }

    /// Returns true if `key` is present, without copying its value.
    pub fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_pinned_cf(&cf, key)
            .map(|v| v.is_some())
            .map_err(|e| DagError::storage(format!("Failed to read from {}: {}", cf_name, e)))
    }

    /// Visits every entry whose key starts with `prefix`, in key order.
    ///
    /// The visitor returns `Ok(false)` to stop early; its errors end the scan
    /// and are returned.
    pub fn scan_prefix<F>(&self, cf_name: &str, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let cf = self.cf(cf_name)?;
        let mut visited: usize = 0;

        for item in self.db.prefix_iterator_cf(&cf, prefix) {
            let (key, value) = item
                .map_err(|e| DagError::storage(format!("Failed to scan {}: {}", cf_name, e)))?;
            if !key.starts_with(prefix) {
                break;
            }
            visited += 1;
            if !visit(&key, &value)? {
                break;
            }
        }

        debug!(cf = cf_name, prefix_len = prefix.len(), visited, "db_scan_prefix");
        Ok(())
    }

    /// Queues a put in `batch`.
    pub fn batch_put(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        batch.put_cf(&self.cf(cf_name)?, key, value);
        Ok(())
    }

    /// Queues a delete in `batch`.
    pub fn batch_delete(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8]) -> Result<()> {
        batch.delete_cf(&self.cf(cf_name)?, key);
        Ok(())
    }

    /// Applies `batch` atomically, syncing the WAL if configured to.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        let ops = batch.len();
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| DagError::storage(format!("Failed to write batch: {}", e)))?;
        trace!(ops, sync = self.sync_writes, "db_write");
        Ok(())
    }
}
