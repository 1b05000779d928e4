//! Storage modules for Shardstore
//!
//! Provides content-addressed block storage and the in-memory file metadata store.

pub mod block_store;
pub mod metadata_store;

pub use block_store::{BlockStore, StoreBlockResult, compute_hash, validate_hash, verify_hash};
pub use metadata_store::{
    BlockRef, FileSnapshot, FileSummary, MetadataService, MetadataStore, validate_filename,
};
