use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections the metadata store answers a mutation with.
///
/// These travel over the wire as a tagged JSON object so the client can adjust
/// its next attempt from the payload alone.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataError {
    #[error("file not found")]
    FileNotFound,

    #[error("wrong version: current version is {current}")]
    WrongVersion { current: u64 },

    #[error("missing {} block(s)", hashes.len())]
    MissingBlocks { hashes: Vec<String> },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("shard {shard} out of range (shard count {shard_count})")]
    ShardOutOfRange { shard: u32, shard_count: usize },

    #[error("metadata rejected request: {0}")]
    Rejected(#[from] MetadataError),

    #[error("{operation} of '{filename}' gave up after {attempts} attempt(s)")]
    RetriesExhausted {
        operation: &'static str,
        filename: String,
        attempts: u32,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        StoreError::Http(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
