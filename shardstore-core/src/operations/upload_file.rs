use crate::chunking::{Block, read_blocks};
use crate::placement::Placement;
use crate::{
    BlockRef, MetadataError, MetadataService, Result, RetryPolicy, ShardSet, StoreError,
    validate_filename,
};
use bytes::Bytes;
use futures_util::future::try_join_all;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct UploadFileOperation {
    metadata: Arc<dyn MetadataService>,
    shards: ShardSet,
    retry: RetryPolicy,
}

#[derive(Clone)]
pub struct UploadFileOperationRequest {
    pub filename: String,
    pub blocks: Vec<Block>,
    pub placement: Arc<dyn Placement>,
}

impl UploadFileOperationRequest {
    /// Chunk the local file at `path`; the stored name is its final component.
    pub async fn from_path(path: &Path, placement: Arc<dyn Placement>) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StoreError::InvalidRequest(format!("cannot derive a filename from {:?}", path))
            })?
            .to_string();

        Ok(Self {
            filename,
            blocks: read_blocks(path).await?,
            placement,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFileOperationResult {
    pub filename: String,
    pub version: u64,
    pub hashlist: Vec<BlockRef>,
    pub uploaded_blocks: usize,
    pub attempts: u32,
}

impl UploadFileOperation {
    pub fn new(metadata: Arc<dyn MetadataService>, shards: ShardSet, retry: RetryPolicy) -> Self {
        Self {
            metadata,
            shards,
            retry,
        }
    }

    pub async fn run(
        &self,
        request: UploadFileOperationRequest,
    ) -> Result<UploadFileOperationResult> {
        let UploadFileOperationRequest {
            filename,
            blocks,
            placement,
        } = request;

        validate_filename(&filename)?;

        let hashes: Vec<String> = blocks.iter().map(|block| block.hash.clone()).collect();
        let assigned = placement.assign(&hashes, &self.shards).await?;
        if assigned.len() != hashes.len() {
            return Err(StoreError::Internal(format!(
                "placement assigned {} shards for {} blocks",
                assigned.len(),
                hashes.len()
            )));
        }

        let hashlist: Vec<BlockRef> = hashes
            .into_iter()
            .zip(assigned)
            .map(|(hash, shard)| BlockRef { hash, shard })
            .collect();

        let contents: HashMap<&str, &Bytes> = blocks
            .iter()
            .map(|block| (block.hash.as_str(), &block.data))
            .collect();

        let mut version = self.metadata.read_file(&filename).await?.version + 1;
        let mut uploaded_blocks = 0usize;
        let mut attempts = 0u32;
        let mut conflicts = 0u32;
        let mut missing_rounds = 0u32;

        // Only version conflicts spend `max_attempts`. Missing-block rounds have
        // their own bound of the same size, each followed by a fresh commit.
        loop {
            attempts += 1;
            let rejection = match self
                .metadata
                .modify_file(&filename, version, hashlist.clone())
                .await
            {
                Ok(committed) => {
                    tracing::info!(
                        "Uploaded {} as v{} ({} blocks, {} pushed, {} attempt(s))",
                        filename,
                        committed,
                        hashlist.len(),
                        uploaded_blocks,
                        attempts
                    );
                    return Ok(UploadFileOperationResult {
                        filename,
                        version: committed,
                        hashlist,
                        uploaded_blocks,
                        attempts,
                    });
                }
                Err(StoreError::Rejected(rejection)) => rejection,
                Err(error) => return Err(error),
            };

            match rejection {
                MetadataError::MissingBlocks { hashes } => {
                    missing_rounds += 1;
                    if missing_rounds > self.retry.max_attempts {
                        break;
                    }
                    uploaded_blocks += self.push_missing(&hashes, &hashlist, &contents).await?;
                }
                MetadataError::WrongVersion { current } => {
                    tracing::debug!(
                        "Upload of {} lost v{} to a concurrent writer; current is v{}",
                        filename,
                        version,
                        current
                    );
                    conflicts += 1;
                    if conflicts >= self.retry.max_attempts {
                        break;
                    }
                    version = current + 1;
                    self.retry.wait(conflicts).await;
                }
                MetadataError::FileNotFound => {
                    conflicts += 1;
                    if conflicts >= self.retry.max_attempts {
                        break;
                    }
                    // The store answers a mis-fenced create/modify this way;
                    // re-fence from the authoritative record.
                    let latest = self.metadata.read_file(&filename).await?.version;
                    tracing::debug!(
                        "Upload of {} at v{} was fenced off; latest is v{}",
                        filename,
                        version,
                        latest
                    );
                    version = latest + 1;
                    self.retry.wait(conflicts).await;
                }
            }
        }

        tracing::warn!(
            "Upload of {} gave up after {} attempts ({} version conflict(s))",
            filename,
            attempts,
            conflicts
        );
        Err(StoreError::RetriesExhausted {
            operation: "upload",
            filename,
            attempts,
        })
    }

    /// Store each missing hash on every shard the hashlist assigns it to.
    async fn push_missing(
        &self,
        missing: &[String],
        hashlist: &[BlockRef],
        contents: &HashMap<&str, &Bytes>,
    ) -> Result<usize> {
        let mut pushes = Vec::new();
        for hash in missing {
            let data = contents.get(hash.as_str()).ok_or_else(|| {
                StoreError::Internal(format!("metadata reported unknown block {}", hash))
            })?;

            let mut targets: Vec<u32> = hashlist
                .iter()
                .filter(|block| &block.hash == hash)
                .map(|block| block.shard)
                .collect();
            targets.sort_unstable();
            targets.dedup();

            for shard_index in targets {
                let shard = self.shards.get(shard_index)?.clone();
                let data = (*data).clone();
                pushes.push(async move {
                    shard.store_block(hash, data).await?;
                    tracing::debug!("Stored block {} on shard {}", hash, shard_index);
                    Ok::<_, StoreError>(())
                });
            }
        }

        let pushed = pushes.len();
        try_join_all(pushes).await?;
        Ok(pushed)
    }
}
