//! JSON bodies exchanged between the HTTP services and their clients.

use crate::error::MetadataError;
use crate::storage::BlockRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<MetadataError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            rejection: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            rejection: None,
        }
    }

    pub fn rejected(rejection: MetadataError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(rejection.to_string()),
            rejection: Some(rejection),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyFileRequest {
    pub version: u64,
    pub hashlist: Vec<BlockRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileQuery {
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub include_tombstoned: bool,
}

fn default_limit() -> usize {
    100
}

impl Default for ListFilesQuery {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            limit: default_limit(),
            include_tombstoned: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreBlockResponse {
    pub hash: String,
    pub reused: bool,
}
