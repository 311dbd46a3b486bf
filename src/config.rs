//! Configuration for chunkline
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::codec::Compression;
use crate::dataset::PARTITION_COLUMN;
use crate::error::{ChunkError, Result};
use crate::retry::RetryPolicy;

/// Main configuration for split and read runs
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Addressing Configuration
    // -------------------------------------------------------------------------
    /// Namespace prefix of every chunk key
    ///   {prefix}:{part=PPPPP}:batch=BBBBB
    pub prefix: String,

    /// Batches per partition (read key range, positional addressing)
    pub batches_per_partition: u32,

    /// How the splitter assigns a partition id to each source batch
    pub addressing: AddressingPolicy,

    /// Column holding partition ids
    pub partition_column: String,

    // -------------------------------------------------------------------------
    // Codec Configuration
    // -------------------------------------------------------------------------
    /// Compression applied to every chunk written
    pub compression: Compression,

    // -------------------------------------------------------------------------
    // Backend Configuration
    // -------------------------------------------------------------------------
    /// Store endpoint, `redis://[user:pass@]host:port[/db]` or `host:port`
    pub endpoint: String,

    /// Single endpoint/proxy or routing-aware cluster
    pub topology: Topology,

    /// Connections per backend node
    pub max_connections: usize,

    /// Connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Per-request timeout (milliseconds, 0 disables)
    pub io_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Write Pipeline Configuration
    // -------------------------------------------------------------------------
    /// Max concurrently outstanding chunk writes
    pub max_inflight: usize,

    /// Dispatched writes accumulated before they are awaited as a group
    pub gather_threshold: usize,

    // -------------------------------------------------------------------------
    // Read Pipeline Configuration
    // -------------------------------------------------------------------------
    /// Max keys per multi-get call
    pub pipeline_width: usize,

    /// Max concurrently outstanding fetch groups
    pub fetch_concurrency: usize,

    /// Max concurrent decode jobs
    pub decode_workers: usize,

    /// COUNT hint for each scan page
    pub scan_page_size: usize,

    // -------------------------------------------------------------------------
    // Retry Configuration
    // -------------------------------------------------------------------------
    pub retry: RetryPolicy,
}

/// Backend topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// One endpoint (standalone server or cluster proxy)
    #[default]
    Standalone,

    /// Cluster client routing by hash slot
    Cluster,
}

/// Partition assignment for source batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressingPolicy {
    /// Partition id read from the partition column; a missing column is an error
    #[default]
    Column,

    /// Partition id = source index / batches per partition
    Positional,

    /// Column when present, positional otherwise
    ColumnOrPositional,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: "demo:v1".to_string(),
            batches_per_partition: 16,
            addressing: AddressingPolicy::Column,
            partition_column: PARTITION_COLUMN.to_string(),
            compression: Compression::Zstd,
            endpoint: "redis://127.0.0.1:6379/0".to_string(),
            topology: Topology::Standalone,
            max_connections: 50,
            connect_timeout_ms: 5000,
            io_timeout_ms: 30_000,
            max_inflight: 256,
            gather_threshold: 100,
            pipeline_width: 64,
            fetch_concurrency: 256,
            decode_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            scan_page_size: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings that would stall or corrupt a run
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(ChunkError::Config("prefix must not be empty".to_string()));
        }
        if self.prefix.contains(|c| c == '{' || c == '}') {
            return Err(ChunkError::Config(format!(
                "prefix '{}' must not contain braces (they would replace the routing tag)",
                self.prefix
            )));
        }
        let positive = [
            ("batches_per_partition", self.batches_per_partition as usize),
            ("max_connections", self.max_connections),
            ("max_inflight", self.max_inflight),
            ("gather_threshold", self.gather_threshold),
            ("pipeline_width", self.pipeline_width),
            ("fetch_concurrency", self.fetch_concurrency),
            ("decode_workers", self.decode_workers),
            ("scan_page_size", self.scan_page_size),
            ("retry.max_attempts", self.retry.max_attempts as usize),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ChunkError::Config(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the key namespace prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Set the number of batches per partition
    pub fn batches_per_partition(mut self, count: u32) -> Self {
        self.config.batches_per_partition = count;
        self
    }

    /// Set the addressing policy
    pub fn addressing(mut self, policy: AddressingPolicy) -> Self {
        self.config.addressing = policy;
        self
    }

    /// Set the partition column name
    pub fn partition_column(mut self, name: impl Into<String>) -> Self {
        self.config.partition_column = name.into();
        self
    }

    /// Set the chunk compression
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set the store endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the backend topology
    pub fn topology(mut self, topology: Topology) -> Self {
        self.config.topology = topology;
        self
    }

    /// Set the connection pool size per node
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the per-request timeout (in milliseconds)
    pub fn io_timeout_ms(mut self, ms: u64) -> Self {
        self.config.io_timeout_ms = ms;
        self
    }

    /// Set the max number of in-flight writes
    pub fn max_inflight(mut self, count: usize) -> Self {
        self.config.max_inflight = count;
        self
    }

    /// Set how many dispatched writes are awaited together
    pub fn gather_threshold(mut self, count: usize) -> Self {
        self.config.gather_threshold = count;
        self
    }

    /// Set the max keys per multi-get
    pub fn pipeline_width(mut self, width: usize) -> Self {
        self.config.pipeline_width = width;
        self
    }

    /// Set the max concurrent fetch groups
    pub fn fetch_concurrency(mut self, count: usize) -> Self {
        self.config.fetch_concurrency = count;
        self
    }

    /// Set the max concurrent decode jobs
    pub fn decode_workers(mut self, count: usize) -> Self {
        self.config.decode_workers = count;
        self
    }

    /// Set the scan page size hint
    pub fn scan_page_size(mut self, count: usize) -> Self {
        self.config.scan_page_size = count;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
