//! Shardstore Core - versioned, content-addressed file storage over block shards
//!
//! - Files are split into 4 KiB blocks addressed by their SHA256 digest
//! - Each block lives on one of several independent shards
//! - A single metadata store fences every mutation on `current version + 1`
//!   and refuses commits whose blocks are not yet stored
//! - Clients reconcile by pushing missing blocks or re-fencing, within a
//!   bounded retry policy

pub mod chunking;
pub mod error;
pub mod operations;
pub mod placement;
pub mod protocol;
pub mod remote;
pub mod retry;
pub mod shard;
pub mod storage;

pub use chunking::{BLOCK_SIZE, Block, read_blocks, split_blocks};
pub use error::{MetadataError, Result, StoreError};
pub use operations::*;
pub use placement::{
    HashPlacement, LatencyProbe, NearestPlacement, Placement, PlacementKind, TcpConnectProbe,
    shard_for_hash,
};
pub use protocol::{
    ApiResponse, BlockExistsResponse, CommitResponse, DeleteFileQuery, ListFilesQuery,
    ModifyFileRequest, StoreBlockResponse,
};
pub use remote::{RemoteBlockShard, RemoteMetadataService, build_http_client, remote_shards};
pub use retry::RetryPolicy;
pub use shard::{BlockShard, ShardSet};
pub use storage::{
    BlockRef, BlockStore, FileSnapshot, FileSummary, MetadataService, MetadataStore,
    StoreBlockResult, compute_hash, validate_filename, validate_hash, verify_hash,
};
