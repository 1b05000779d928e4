use crate::error::{Result, StoreError};
use crate::storage::BlockStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// One block shard as seen by the metadata store and by clients. Implemented by
/// the on-disk [`BlockStore`] and by [`crate::RemoteBlockShard`].
#[async_trait]
pub trait BlockShard: Send + Sync {
    /// Address handed to the latency probe.
    fn endpoint(&self) -> &str;

    async fn has_block(&self, hash: &str) -> Result<bool>;

    async fn store_block(&self, hash: &str, data: Bytes) -> Result<()>;

    async fn get_block(&self, hash: &str) -> Result<Bytes>;
}

#[async_trait]
impl BlockShard for BlockStore {
    fn endpoint(&self) -> &str {
        self.label()
    }

    async fn has_block(&self, hash: &str) -> Result<bool> {
        BlockStore::has_block(self, hash).await
    }

    async fn store_block(&self, hash: &str, data: Bytes) -> Result<()> {
        BlockStore::store_block(self, hash, data).await.map(|_| ())
    }

    async fn get_block(&self, hash: &str) -> Result<Bytes> {
        BlockStore::get_block(self, hash).await
    }
}

/// The fixed shard topology. A shard's index is its position in the set.
#[derive(Clone, Default)]
pub struct ShardSet {
    shards: Vec<Arc<dyn BlockShard>>,
}

impl ShardSet {
    pub fn new(shards: Vec<Arc<dyn BlockShard>>) -> Self {
        Self { shards }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn get(&self, index: u32) -> Result<&Arc<dyn BlockShard>> {
        self.shards
            .get(index as usize)
            .ok_or(StoreError::ShardOutOfRange {
                shard: index,
                shard_count: self.shards.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BlockShard>> {
        self.shards.iter()
    }
}

impl std::fmt::Debug for ShardSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.shards.iter().map(|shard| shard.endpoint()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_shard() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::new(temp_dir.path().to_path_buf()).unwrap();
        let shards = ShardSet::new(vec![Arc::new(store)]);

        assert!(shards.get(0).is_ok());
        let error = shards.get(1).err().unwrap();
        assert!(matches!(
            error,
            StoreError::ShardOutOfRange {
                shard: 1,
                shard_count: 1
            }
        ));
    }
}
