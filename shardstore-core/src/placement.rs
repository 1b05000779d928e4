use crate::error::{Result, StoreError};
use crate::remote::parse_endpoint;
use crate::shard::ShardSet;
use crate::storage::validate_hash;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Decides which shard stores each block of one upload.
///
/// Queried once per upload; returns one shard index per hash, in order. The
/// result is recorded in the hashlist and never recomputed on download.
#[async_trait]
pub trait Placement: Send + Sync {
    async fn assign(&self, hashes: &[String], shards: &ShardSet) -> Result<Vec<u32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementKind {
    Hash,
    Nearest,
}

impl std::str::FromStr for PlacementKind {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "nearest" => Ok(Self::Nearest),
            other => Err(StoreError::InvalidRequest(format!(
                "unsupported placement '{}': expected hash | nearest",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PlacementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash => f.write_str("hash"),
            Self::Nearest => f.write_str("nearest"),
        }
    }
}

/// `int(hash, 16) mod shard_count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPlacement;

#[async_trait]
impl Placement for HashPlacement {
    async fn assign(&self, hashes: &[String], shards: &ShardSet) -> Result<Vec<u32>> {
        hashes
            .iter()
            .map(|hash| shard_for_hash(hash, shards.len()))
            .collect()
    }
}

/// Reduce a hex digest modulo `shard_count` one digit at a time, so digests of
/// any length map the same way as their big-integer value would.
pub fn shard_for_hash(hash: &str, shard_count: usize) -> Result<u32> {
    if shard_count == 0 {
        return Err(StoreError::Config("no block shards configured".to_string()));
    }

    validate_hash(hash)?;

    let modulus = shard_count as u64;
    let mut remainder = 0u64;
    for c in hash.chars() {
        let digit = c.to_digit(16).ok_or_else(|| {
            StoreError::InvalidRequest(format!("block hash is not hex: '{}'", hash))
        })?;
        remainder = (remainder * 16 + digit as u64) % modulus;
    }

    Ok(remainder as u32)
}

/// Round-trip estimate to a shard endpoint.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn measure_latency(&self, endpoint: &str) -> Result<Duration>;
}

/// Every block of the file goes to the single shard with the lowest measured
/// latency. Ties go to the lower index; shards whose probe fails are skipped.
pub struct NearestPlacement<P> {
    probe: P,
}

impl<P: LatencyProbe> NearestPlacement<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    pub async fn nearest_shard(&self, shards: &ShardSet) -> Result<u32> {
        if shards.is_empty() {
            return Err(StoreError::Config("no block shards configured".to_string()));
        }

        let mut best: Option<(u32, Duration)> = None;
        for (index, shard) in shards.iter().enumerate() {
            let latency = match self.probe.measure_latency(shard.endpoint()).await {
                Ok(latency) => latency,
                Err(error) => {
                    tracing::warn!(
                        "Latency probe failed for shard {} ({}): {}",
                        index,
                        shard.endpoint(),
                        error
                    );
                    continue;
                }
            };

            tracing::debug!("Shard {} ({}) rtt={:?}", index, shard.endpoint(), latency);
            if best.is_none_or(|(_, best_latency)| latency < best_latency) {
                best = Some((index as u32, latency));
            }
        }

        let (index, latency) = best.ok_or_else(|| {
            StoreError::Http("no block shard answered the latency probe".to_string())
        })?;
        tracing::info!("Nearest shard is {} (rtt={:?})", index, latency);
        Ok(index)
    }
}

#[async_trait]
impl<P: LatencyProbe> Placement for NearestPlacement<P> {
    async fn assign(&self, hashes: &[String], shards: &ShardSet) -> Result<Vec<u32>> {
        let shard = self.nearest_shard(shards).await?;
        Ok(vec![shard; hashes.len()])
    }
}

/// Measures TCP connect time to the endpoint's host:port, averaged over a few
/// samples.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    samples: u32,
    timeout: Duration,
}

impl TcpConnectProbe {
    pub fn new(samples: u32, timeout: Duration) -> Self {
        Self {
            samples: samples.max(1),
            timeout,
        }
    }
}

impl Default for TcpConnectProbe {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[async_trait]
impl LatencyProbe for TcpConnectProbe {
    async fn measure_latency(&self, endpoint: &str) -> Result<Duration> {
        let address = socket_address(endpoint)?;

        let mut total = Duration::ZERO;
        for _ in 0..self.samples {
            let started = Instant::now();
            let connect = tokio::net::TcpStream::connect(&address);
            let stream = tokio::time::timeout(self.timeout, connect)
                .await
                .map_err(|_| StoreError::Http(format!("probe of {} timed out", address)))??;
            total += started.elapsed();
            drop(stream);
        }

        Ok(total / self.samples)
    }
}

/// `http://host:port/...` or bare `host:port` -> `host:port`.
fn socket_address(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();

    if let Ok(url) = parse_endpoint(endpoint) {
        let host = url.host_str().filter(|host| !host.is_empty()).ok_or_else(|| {
            StoreError::Config(format!("cannot probe endpoint without host: '{}'", endpoint))
        })?;
        let port = url.port_or_known_default().ok_or_else(|| {
            StoreError::Config(format!("cannot probe endpoint without port: '{}'", endpoint))
        })?;
        return Ok(format!("{}:{}", host, port));
    }

    match endpoint.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty()
                && !endpoint.contains("://")
                && !host.contains(['/', '@'])
                && port.parse::<u16>().is_ok() =>
        {
            Ok(endpoint.to_string())
        }
        _ => Err(StoreError::Config(format!(
            "cannot probe endpoint: '{}'",
            endpoint
        ))),
    }
}
