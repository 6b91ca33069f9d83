//! # RocksDB Blob Store
//!
//! Durable implementation of `BlobStore`.
//!
//! ## Column Families
//!
//! - `blobs` - raw payloads, written once at enqueue
//! - `metadata` - bincode `BlobMetadata`, rewritten on every status change
//! - `status_index` - empty values under `status/ || submitted_at || key`,
//!   moved in the same write batch as the metadata
//!
//! `get_by_status` walks one status prefix of the index, so finalized and
//! failed blobs cost nothing once they leave the active statuses.
//!
//! A store-wide write lock serializes read-modify-write cycles, which is
//! what turns `update_status` into a compare-and-swap.

use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB,
};
use shared_types::{
    Blob, BlobKey, BlobMetadata, BlobStatus, BlobSubmission, StatusUpdate, StoreError,
};
use std::path::Path;

use super::unix_millis;
use crate::ports::BlobStore;

/// Column family names
pub const CF_BLOBS: &str = "blobs";
pub const CF_METADATA: &str = "metadata";
pub const CF_STATUS_INDEX: &str = "status_index";

/// All column families used by the store
pub const COLUMN_FAMILIES: &[&str] = &[CF_BLOBS, CF_METADATA, CF_STATUS_INDEX];

/// RocksDB-backed blob store
pub struct RocksDbBlobStore {
    db: DB,
    write_lock: Mutex<()>,
    sync_writes: bool,
}

impl RocksDbBlobStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(path, true)
    }

    /// Open without fsync on write (for testing)
    pub fn open_for_testing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(path, false)
    }

    fn open_with(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            sync_writes,
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {name}")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        write_opts
    }

    fn read_metadata(&self, key: &BlobKey) -> Result<Option<BlobMetadata>, StoreError> {
        let raw = self
            .db
            .get_cf(self.cf(CF_METADATA)?, key.as_bytes())
            .map_err(|e| StoreError::Backend(format!("RocksDB get failed: {}", e)))?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    fn write_metadata(&self, metadata: &BlobMetadata) -> Result<(), StoreError> {
        let bytes = encode(metadata)?;
        self.db
            .put_cf_opt(
                self.cf(CF_METADATA)?,
                metadata.key.as_bytes(),
                bytes,
                &self.write_options(),
            )
            .map_err(|e| StoreError::Backend(format!("RocksDB put failed: {}", e)))
    }

    /// Metadata rewrite plus index move, applied atomically.
    fn write_transition(
        &self,
        previous: BlobStatus,
        metadata: &BlobMetadata,
    ) -> Result<(), StoreError> {
        let index = self.cf(CF_STATUS_INDEX)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_METADATA)?, metadata.key.as_bytes(), encode(metadata)?);
        if previous != metadata.status {
            batch.delete_cf(index, index_key(previous, metadata));
            batch.put_cf(index, index_key(metadata.status, metadata), b"");
        }
        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| StoreError::Backend(format!("RocksDB batch write failed: {}", e)))
    }

    /// Keys under `status`, oldest submission first, at most `limit`.
    fn indexed_keys(&self, status: BlobStatus, limit: usize) -> Result<Vec<BlobKey>, StoreError> {
        let prefix = index_prefix(status);
        let iter = self.db.iterator_cf(
            self.cf(CF_STATUS_INDEX)?,
            IteratorMode::From(prefix.as_slice(), Direction::Forward),
        );

        let mut keys = Vec::new();
        for item in iter {
            if keys.len() >= limit {
                break;
            }
            let (index_key, _) =
                item.map_err(|e| StoreError::Backend(format!("RocksDB scan failed: {}", e)))?;
            let Some(rest) = index_key.strip_prefix(prefix.as_slice()) else {
                break;
            };
            let raw: [u8; 32] = rest
                .get(8..)
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| StoreError::Codec("malformed status index key".into()))?;
            keys.push(BlobKey(raw));
        }
        Ok(keys)
    }

    fn get_blob(&self, key: &BlobKey) -> Result<Blob, StoreError> {
        let metadata = self.read_metadata(key)?.ok_or(StoreError::NotFound(*key))?;
        let data = self.read_data(key)?;
        Ok(Blob { data, metadata })
    }

    fn read_data(&self, key: &BlobKey) -> Result<Vec<u8>, StoreError> {
        self.db
            .get_cf(self.cf(CF_BLOBS)?, key.as_bytes())
            .map_err(|e| StoreError::Backend(format!("RocksDB get failed: {}", e)))?
            .ok_or(StoreError::NotFound(*key))
    }
}

fn index_prefix(status: BlobStatus) -> Vec<u8> {
    let mut prefix = status.as_str().as_bytes().to_vec();
    prefix.push(b'/');
    prefix
}

fn index_key(status: BlobStatus, metadata: &BlobMetadata) -> Vec<u8> {
    let mut key = index_prefix(status);
    key.extend_from_slice(&metadata.submitted_at_ms.to_be_bytes());
    key.extend_from_slice(metadata.key.as_bytes());
    key
}

fn encode(metadata: &BlobMetadata) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(metadata).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<BlobMetadata, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

#[async_trait]
impl BlobStore for RocksDbBlobStore {
    async fn enqueue(&self, submission: BlobSubmission) -> Result<BlobKey, StoreError> {
        submission.validate()?;
        let key = submission.key();

        let _guard = self.write_lock.lock();
        if self.read_metadata(&key)?.is_some() {
            return Ok(key);
        }

        let metadata = BlobMetadata::new(key, &submission, unix_millis());
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_BLOBS)?, key.as_bytes(), &submission.data);
        batch.put_cf(self.cf(CF_METADATA)?, key.as_bytes(), encode(&metadata)?);
        batch.put_cf(
            self.cf(CF_STATUS_INDEX)?,
            index_key(metadata.status, &metadata),
            b"",
        );
        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| StoreError::Backend(format!("RocksDB batch write failed: {}", e)))?;
        Ok(key)
    }

    async fn get_by_status(
        &self,
        status: BlobStatus,
        limit: usize,
    ) -> Result<Vec<Blob>, StoreError> {
        self.indexed_keys(status, limit)?
            .into_iter()
            .map(|key| self.get_blob(&key))
            .collect()
    }

    async fn update_status(
        &self,
        key: &BlobKey,
        expected: BlobStatus,
        update: StatusUpdate,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut metadata = self.read_metadata(key)?.ok_or(StoreError::NotFound(*key))?;
        let previous = metadata.status;
        if !metadata.apply(expected, &update) {
            return Ok(false);
        }
        self.write_transition(previous, &metadata)?;
        Ok(true)
    }

    async fn increment_retry(&self, key: &BlobKey) -> Result<u32, StoreError> {
        let _guard = self.write_lock.lock();
        let mut metadata = self.read_metadata(key)?.ok_or(StoreError::NotFound(*key))?;
        metadata.num_retries = metadata.num_retries.saturating_add(1);
        self.write_metadata(&metadata)?;
        Ok(metadata.num_retries)
    }

    async fn get(&self, key: &BlobKey) -> Result<Blob, StoreError> {
        self.get_blob(key)
    }
}
