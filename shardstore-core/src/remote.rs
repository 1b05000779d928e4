use crate::error::{Result, StoreError};
use crate::protocol::{
    ApiResponse, BlockExistsResponse, CommitResponse, ListFilesQuery, ModifyFileRequest,
    StoreBlockResponse,
};
use crate::shard::{BlockShard, ShardSet};
use crate::storage::{BlockRef, FileSnapshot, FileSummary, MetadataService};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

pub fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|error| StoreError::Config(format!("failed to build HTTP client: {}", error)))
}

pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|error| {
        StoreError::Config(format!("invalid endpoint '{}': {}", endpoint, error))
    })?;
    if url.cannot_be_a_base() {
        return Err(StoreError::Config(format!(
            "endpoint cannot be used as a base URL: '{}'",
            endpoint
        )));
    }
    Ok(url)
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StoreError::Internal(format!("endpoint cannot be a base: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Decode the JSON envelope, turning metadata rejections back into
/// [`StoreError::Rejected`].
async fn decode_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let envelope: ApiResponse<T> = response.json().await.map_err(|error| {
        StoreError::Http(format!("undecodable response (status={}): {}", status, error))
    })?;

    if let Some(rejection) = envelope.rejection {
        return Err(StoreError::Rejected(rejection));
    }

    if !envelope.success || !status.is_success() {
        let message = envelope.error.unwrap_or_else(|| "unknown error".to_string());
        return Err(match status {
            StatusCode::BAD_REQUEST => StoreError::InvalidRequest(message),
            _ => StoreError::Http(format!("status={} error={}", status, message)),
        });
    }

    envelope
        .data
        .ok_or_else(|| StoreError::Http("response carried no data".to_string()))
}

/// A block shard reached over HTTP.
pub struct RemoteBlockShard {
    client: reqwest::Client,
    endpoint: String,
    base: Url,
}

impl RemoteBlockShard {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            base: parse_endpoint(endpoint)?,
        })
    }

    fn block_url(&self, hash: &str) -> Result<Url> {
        join_segments(&self.base, &["blocks", hash])
    }
}

#[async_trait]
impl BlockShard for RemoteBlockShard {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn has_block(&self, hash: &str) -> Result<bool> {
        let url = join_segments(&self.base, &["blocks", hash, "exists"])?;
        let response = self.client.get(url).send().await?;
        let payload: BlockExistsResponse = decode_envelope(response).await?;
        Ok(payload.exists)
    }

    async fn store_block(&self, hash: &str, data: Bytes) -> Result<()> {
        let response = self
            .client
            .put(self.block_url(hash)?)
            .body(data)
            .send()
            .await?;
        let payload: StoreBlockResponse = decode_envelope(response).await?;
        tracing::debug!(
            "Pushed block {} to {} (reused={})",
            payload.hash,
            self.endpoint,
            payload.reused
        );
        Ok(())
    }

    async fn get_block(&self, hash: &str) -> Result<Bytes> {
        let response = self.client.get(self.block_url(hash)?).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::BlockNotFound(hash.to_string()));
        }

        if !response.status().is_success() {
            return Err(StoreError::Http(format!(
                "block fetch failed: status={} hash={} shard={}",
                response.status(),
                hash,
                self.endpoint
            )));
        }

        Ok(response.bytes().await?)
    }
}

/// Shard handles for the given endpoints, indexed by position.
pub fn remote_shards(client: &reqwest::Client, endpoints: &[String]) -> Result<ShardSet> {
    let shards = endpoints
        .iter()
        .map(|endpoint| {
            RemoteBlockShard::new(client.clone(), endpoint)
                .map(|shard| Arc::new(shard) as Arc<dyn BlockShard>)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ShardSet::new(shards))
}

/// The metadata service reached over HTTP.
pub struct RemoteMetadataService {
    client: reqwest::Client,
    base: Url,
}

impl RemoteMetadataService {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self> {
        Ok(Self {
            client,
            base: parse_endpoint(endpoint)?,
        })
    }

    fn file_url(&self, filename: &str) -> Result<Url> {
        join_segments(&self.base, &["files", filename])
    }

    pub async fn list_files(&self, query: &ListFilesQuery) -> Result<Vec<FileSummary>> {
        let url = join_segments(&self.base, &["files"])?;
        let response = self
            .client
            .get(url)
            .query(&[
                ("prefix", query.prefix.clone()),
                ("limit", query.limit.to_string()),
                ("include_tombstoned", query.include_tombstoned.to_string()),
            ])
            .send()
            .await?;
        decode_envelope(response).await
    }
}

#[async_trait]
impl MetadataService for RemoteMetadataService {
    async fn read_file(&self, filename: &str) -> Result<FileSnapshot> {
        let response = self.client.get(self.file_url(filename)?).send().await?;
        decode_envelope(response).await
    }

    async fn modify_file(
        &self,
        filename: &str,
        version: u64,
        hashlist: Vec<BlockRef>,
    ) -> Result<u64> {
        let response = self
            .client
            .put(self.file_url(filename)?)
            .json(&ModifyFileRequest { version, hashlist })
            .send()
            .await?;
        let committed: CommitResponse = decode_envelope(response).await?;
        Ok(committed.version)
    }

    async fn delete_file(&self, filename: &str, version: u64) -> Result<u64> {
        let response = self
            .client
            .delete(self.file_url(filename)?)
            .query(&[("version", version)])
            .send()
            .await?;
        let committed: CommitResponse = decode_envelope(response).await?;
        Ok(committed.version)
    }
}
