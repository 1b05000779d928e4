use crate::error::{Result, StoreError};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

/// BlockStore is the content-addressed storage behind one shard.
/// Blocks live in blocks/{hash[..2]}/{hash}.
pub struct BlockStore {
    base_path: PathBuf,
    label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreBlockResult {
    pub reused: bool,
}

impl BlockStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("blocks"))?;
        let label = base_path.to_string_lossy().to_string();
        Ok(Self { base_path, label })
    }

    /// Get the base path for the store
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Check if a block exists
    pub async fn has_block(&self, hash: &str) -> Result<bool> {
        let block_path = self.block_path(hash)?;
        Ok(fs::try_exists(&block_path).await?)
    }

    /// Store a block under its hash. Storing a hash that is already present
    /// leaves the existing file alone.
    pub async fn store_block(&self, hash: &str, data: Bytes) -> Result<StoreBlockResult> {
        let block_path = self.block_path(hash)?;
        verify_hash(&data, hash)?;

        if fs::try_exists(&block_path).await? {
            return Ok(StoreBlockResult { reused: true });
        }

        if let Some(parent) = block_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Concurrent writers of the same hash each get their own temp file;
        // the rename that lands last wins with identical content.
        let temp_path = block_path.with_extension(format!("{}.tmp", Ulid::new()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(error) = fs::rename(&temp_path, &block_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(error.into());
        }

        tracing::debug!("Stored block {} ({} bytes) in {}", hash, data.len(), self.label);
        Ok(StoreBlockResult { reused: false })
    }

    /// Retrieve a block by its hash
    pub async fn get_block(&self, hash: &str) -> Result<Bytes> {
        let block_path = self.block_path(hash)?;

        match fs::read(&block_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::BlockNotFound(hash.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Count stored blocks, skipping in-flight temp files
    pub async fn block_count(&self) -> Result<usize> {
        let mut count = 0usize;
        let mut prefixes = fs::read_dir(self.base_path.join("blocks")).await?;

        while let Some(prefix) = prefixes.next_entry().await? {
            if !prefix.file_type().await?.is_dir() {
                continue;
            }

            let mut entries = fs::read_dir(prefix.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let is_block = entry
                    .file_name()
                    .to_str()
                    .map(|name| !name.ends_with(".tmp"))
                    .unwrap_or(false);
                if is_block && entry.file_type().await?.is_file() {
                    count += 1;
                }
            }
        }

        Ok(count)
    }

    fn block_path(&self, hash: &str) -> Result<PathBuf> {
        validate_hash(hash)?;
        // Use first 2 chars as subdirectory to avoid too many files in one dir
        Ok(self.base_path.join("blocks").join(&hash[..2]).join(hash))
    }
}

/// Compute SHA256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that data matches the expected hash
pub fn verify_hash(data: &[u8], expected_hash: &str) -> Result<()> {
    let actual_hash = compute_hash(data);
    if actual_hash != expected_hash {
        return Err(StoreError::HashMismatch {
            expected: expected_hash.to_string(),
            actual: actual_hash,
        });
    }
    Ok(())
}

/// Block hashes are lowercase hex digests; anything else could escape the
/// shard directory.
pub fn validate_hash(hash: &str) -> Result<()> {
    if hash.len() < 2 {
        return Err(StoreError::InvalidRequest(format!(
            "block hash too short: '{}'",
            hash
        )));
    }

    if !hash
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(StoreError::InvalidRequest(format!(
            "block hash is not lowercase hex: '{}'",
            hash
        )));
    }

    Ok(())
}
