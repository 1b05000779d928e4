use crate::error::{MetadataError, Result, StoreError};
use crate::shard::ShardSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// One entry of a file's hashlist: the block hash and the shard holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: String,
    pub shard: u32,
}

impl BlockRef {
    pub fn new(hash: impl Into<String>, shard: u32) -> Self {
        Self {
            hash: hash.into(),
            shard,
        }
    }
}

/// What readers see of a file. Version 0 means the file never existed; an
/// empty hashlist with a non-zero version means it is tombstoned (or empty).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub version: u64,
    pub hashlist: Vec<BlockRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub filename: String,
    pub version: u64,
    pub block_count: usize,
    pub tombstoned: bool,
    pub updated_at: DateTime<Utc>,
}

/// The three calls clients make against file metadata, served locally by
/// [`MetadataStore`] and over HTTP by [`crate::RemoteMetadataService`].
/// Mutations answer with the committed version; rejections come back as
/// [`StoreError::Rejected`].
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn read_file(&self, filename: &str) -> Result<FileSnapshot>;

    async fn modify_file(
        &self,
        filename: &str,
        version: u64,
        hashlist: Vec<BlockRef>,
    ) -> Result<u64>;

    async fn delete_file(&self, filename: &str, version: u64) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct FileRecord {
    version: u64,
    hashlist: Vec<BlockRef>,
    tombstoned: bool,
    updated_at: DateTime<Utc>,
}

impl FileRecord {
    fn new() -> Self {
        Self {
            version: 0,
            hashlist: Vec::new(),
            tombstoned: false,
            updated_at: Utc::now(),
        }
    }

    fn exists(&self) -> bool {
        self.version > 0
    }

    fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            version: self.version,
            hashlist: if self.tombstoned {
                Vec::new()
            } else {
                self.hashlist.clone()
            },
        }
    }
}

type RecordHandle = Arc<tokio::sync::Mutex<FileRecord>>;

/// In-memory filename -> record map.
///
/// Each filename owns an async lock that is held across the whole
/// check-then-commit sequence of a mutation, including the shard queries.
/// The table lock only guards handle lookup and is never held across an await.
pub struct MetadataStore {
    shards: ShardSet,
    records: Mutex<HashMap<String, RecordHandle>>,
}

impl MetadataStore {
    pub fn new(shards: ShardSet) -> Self {
        Self {
            shards,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn shards(&self) -> &ShardSet {
        &self.shards
    }

    pub async fn read_file(&self, filename: &str) -> Result<FileSnapshot> {
        let Some(handle) = self.existing_handle(filename) else {
            return Ok(FileSnapshot::default());
        };

        let record = handle.lock().await;
        Ok(record.snapshot())
    }

    pub async fn modify_file(
        &self,
        filename: &str,
        version: u64,
        hashlist: Vec<BlockRef>,
    ) -> Result<u64> {
        validate_filename(filename)?;

        let handle = self.record_handle(filename);
        let mut record = handle.lock().await;

        if version == 1 && record.exists() {
            tracing::debug!(
                "Rejecting create of existing file {} (current version {})",
                filename,
                record.version
            );
            return Err(MetadataError::FileNotFound.into());
        }

        if version != 1 && (!record.exists() || version != record.version + 1) {
            tracing::debug!(
                "Rejecting modify of {}: version {} does not follow {}",
                filename,
                version,
                record.version
            );
            return Err(MetadataError::FileNotFound.into());
        }

        let missing = self.find_missing_blocks(&hashlist).await?;
        if !missing.is_empty() {
            tracing::debug!(
                "Modify of {} v{} blocked on {} missing block(s)",
                filename,
                version,
                missing.len()
            );
            return Err(MetadataError::MissingBlocks { hashes: missing }.into());
        }

        record.version = version;
        record.hashlist = hashlist;
        record.tombstoned = false;
        record.updated_at = Utc::now();

        tracing::info!(
            "Committed {} v{} ({} blocks)",
            filename,
            version,
            record.hashlist.len()
        );
        Ok(version)
    }

    pub async fn delete_file(&self, filename: &str, version: u64) -> Result<u64> {
        let Some(handle) = self.existing_handle(filename) else {
            return Err(MetadataError::FileNotFound.into());
        };

        let mut record = handle.lock().await;

        if !record.exists() || record.tombstoned {
            return Err(MetadataError::FileNotFound.into());
        }

        if version != record.version + 1 {
            return Err(MetadataError::WrongVersion {
                current: record.version,
            }
            .into());
        }

        record.version = version;
        record.tombstoned = true;
        record.hashlist.clear();
        record.updated_at = Utc::now();

        tracing::info!("Tombstoned {} at v{}", filename, version);
        Ok(version)
    }

    /// List files with optional prefix (excluding tombstoned by default)
    pub async fn list_files(
        &self,
        prefix: &str,
        limit: usize,
        include_tombstoned: bool,
    ) -> Vec<FileSummary> {
        let mut handles: Vec<(String, RecordHandle)> = {
            let records = self.lock_records();
            records
                .iter()
                .filter(|(filename, _)| filename.starts_with(prefix))
                .map(|(filename, handle)| (filename.clone(), handle.clone()))
                .collect()
        };
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        let mut files = Vec::new();
        for (filename, handle) in handles {
            if files.len() >= limit {
                break;
            }

            let record = handle.lock().await;
            if !record.exists() || (record.tombstoned && !include_tombstoned) {
                continue;
            }

            files.push(FileSummary {
                filename,
                version: record.version,
                block_count: record.hashlist.len(),
                tombstoned: record.tombstoned,
                updated_at: record.updated_at,
            });
        }

        files
    }

    /// Hashes from `hashlist` absent from their designated shard, deduplicated
    /// and in hashlist order.
    async fn find_missing_blocks(&self, hashlist: &[BlockRef]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut checks = Vec::new();
        for block in hashlist {
            if !seen.insert((block.hash.as_str(), block.shard)) {
                continue;
            }

            let shard = self.shards.get(block.shard)?.clone();
            checks.push(async move {
                let present = shard.has_block(&block.hash).await?;
                Ok::<_, StoreError>((block.hash.as_str(), present))
            });
        }

        let results = try_join_all(checks).await?;

        let mut reported = HashSet::new();
        Ok(results
            .into_iter()
            .filter(|(_, present)| !present)
            .filter(|(hash, _)| reported.insert(*hash))
            .map(|(hash, _)| hash.to_string())
            .collect())
    }

    fn record_handle(&self, filename: &str) -> RecordHandle {
        let mut records = self.lock_records();
        records
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(FileRecord::new())))
            .clone()
    }

    fn existing_handle(&self, filename: &str) -> Option<RecordHandle> {
        self.lock_records().get(filename).cloned()
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<String, RecordHandle>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MetadataService for MetadataStore {
    async fn read_file(&self, filename: &str) -> Result<FileSnapshot> {
        MetadataStore::read_file(self, filename).await
    }

    async fn modify_file(
        &self,
        filename: &str,
        version: u64,
        hashlist: Vec<BlockRef>,
    ) -> Result<u64> {
        MetadataStore::modify_file(self, filename, version, hashlist).await
    }

    async fn delete_file(&self, filename: &str, version: u64) -> Result<u64> {
        MetadataStore::delete_file(self, filename, version).await
    }
}

/// Filenames are flat names: no separators, no dot components.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() || filename == "." || filename == ".." {
        return Err(StoreError::InvalidRequest(format!(
            "invalid filename: '{}'",
            filename
        )));
    }

    if filename.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidRequest(format!(
            "filename must not contain path separators: '{}'",
            filename
        )));
    }

    Ok(())
}
