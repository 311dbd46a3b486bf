//! Store Module
//!
//! Key-value backends holding chunk payloads.
//!
//! ## Backends
//! - `MemoryStore`: in-process map (tests, embedding)
//! - `RespStore`: RESP2 over TCP to one endpoint or a cluster proxy
//! - `ClusterStore`: RESP2 cluster client routing by hash slot
//!
//! ## Commands Used
//! ```text
//! SET key value            chunk write
//! MGET key [key ...]       fetch group
//! SCAN cursor MATCH p COUNT n   partition discovery
//! DEL key [key ...]        cleanup
//! PING                     health check
//! ```
//!
//! Every backend must accept concurrent calls through `&self`.

mod command;
mod endpoint;
mod reply;
mod memory;
mod resp;
mod cluster;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{Config, Topology};
use crate::error::Result;

pub use command::Command;
pub use endpoint::Endpoint;
pub use reply::SlotRange;
pub use memory::{glob_match, MemoryStore};
pub use resp::RespStore;
pub use cluster::{common_slot, key_slot, ClusterStore};

/// Position of a cursor-based scan
///
/// `node` selects the cluster primary being walked (always 0 on a single
/// endpoint); `position` is that node's own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanCursor {
    pub node: usize,
    pub position: u64,
}

impl ScanCursor {
    /// Initial cursor; a scan is complete when it is handed back
    pub const START: ScanCursor = ScanCursor { node: 0, position: 0 };

    pub fn at(node: usize, position: u64) -> Self {
        Self { node, position }
    }

    pub fn is_start(&self) -> bool {
        *self == Self::START
    }
}

/// One page of scan results
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Cursor for the next page (`START` when done)
    pub cursor: ScanCursor,

    /// Matching keys in this page (may be empty, may repeat across pages)
    pub keys: Vec<String>,
}

/// Key-value backend used by the split and read pipelines
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Health check
    async fn ping(&self) -> Result<()>;

    /// Store `value` under `key`, overwriting
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Values of `keys` in the same order; `None` for absent keys
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// One page of keys matching the glob `pattern`
    async fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Remove `keys`, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64>;
}

/// Open the backend selected by `config.topology` and verify it answers
pub async fn connect(config: &Config) -> Result<Arc<dyn KvStore>> {
    match config.topology {
        Topology::Standalone => Ok(Arc::new(RespStore::connect(config).await?)),
        Topology::Cluster => Ok(Arc::new(ClusterStore::connect(config).await?)),
    }
}
