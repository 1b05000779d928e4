use crate::error::Result;
use crate::storage::compute_hash;
use bytes::Bytes;
use std::path::Path;

/// Fixed block size; the last block of a file may be shorter.
pub const BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub hash: String,
    pub data: Bytes,
}

/// Split `data` into `BLOCK_SIZE` blocks. An empty input has no blocks.
pub fn split_blocks(data: Bytes) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(data.len().div_ceil(BLOCK_SIZE));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + BLOCK_SIZE).min(data.len());
        let block = data.slice(offset..end);
        blocks.push(Block {
            hash: compute_hash(&block),
            data: block,
        });
        offset = end;
    }
    blocks
}

pub async fn read_blocks(path: &Path) -> Result<Vec<Block>> {
    let data = tokio::fs::read(path).await?;
    Ok(split_blocks(Bytes::from(data)))
}
