use crate::{MetadataService, Result, ShardSet, StoreError, validate_filename, verify_hash};
use bytes::Bytes;
use futures_util::future::try_join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

#[derive(Clone)]
pub struct DownloadFileOperation {
    metadata: Arc<dyn MetadataService>,
    shards: ShardSet,
}

#[derive(Debug, Clone)]
pub struct DownloadFileOperationRequest {
    pub filename: String,
    pub destination_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFileOperationResult {
    pub path: PathBuf,
    pub version: u64,
    pub size_bytes: u64,
    pub block_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFileOperationOutcome {
    Downloaded(DownloadFileOperationResult),
    NotFound,
}

impl DownloadFileOperation {
    pub fn new(metadata: Arc<dyn MetadataService>, shards: ShardSet) -> Self {
        Self { metadata, shards }
    }

    pub async fn run(
        &self,
        request: DownloadFileOperationRequest,
    ) -> Result<DownloadFileOperationOutcome> {
        let DownloadFileOperationRequest {
            filename,
            destination_dir,
        } = request;

        validate_filename(&filename)?;

        let Some((version, block_count, body)) = self.read_contents(&filename).await? else {
            return Ok(DownloadFileOperationOutcome::NotFound);
        };

        let path = destination_dir.join(&filename);
        // Land the bytes next to the target and rename, so a failure never
        // leaves a partial file behind.
        let temp_path = destination_dir.join(format!(".{}.{}.tmp", filename, Ulid::new()));
        let write = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &path).await
        };
        if let Err(error) = write.await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(error.into());
        }

        tracing::info!(
            "Downloaded {} v{} ({} bytes) to {:?}",
            filename,
            version,
            body.len(),
            path
        );

        Ok(DownloadFileOperationOutcome::Downloaded(
            DownloadFileOperationResult {
                path,
                version,
                size_bytes: body.len() as u64,
                block_count,
            },
        ))
    }

    /// Fetch and concatenate the current contents of `filename`.
    /// Returns `None` when the file is absent or tombstoned.
    pub async fn read_contents(&self, filename: &str) -> Result<Option<(u64, usize, Bytes)>> {
        let snapshot = self.metadata.read_file(filename).await?;
        if snapshot.hashlist.is_empty() {
            return Ok(None);
        }

        let fetches = snapshot.hashlist.iter().map(|block| async move {
            let shard = self.shards.get(block.shard)?;
            let data = shard.get_block(&block.hash).await?;
            verify_hash(&data, &block.hash)?;
            Ok::<_, StoreError>(data)
        });
        let blocks = try_join_all(fetches).await?;

        let mut body = Vec::with_capacity(blocks.iter().map(|block| block.len()).sum());
        for block in &blocks {
            body.extend_from_slice(block);
        }

        Ok(Some((
            snapshot.version,
            snapshot.hashlist.len(),
            Bytes::from(body),
        )))
    }
}
