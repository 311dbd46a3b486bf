//! Cluster client
//!
//! Routes every call to the primary owning the key's hash slot. Chunk keys
//! carry a `{part=PPPPP}` hash tag, so all keys of one partition share a slot
//! and a fetch group over one partition is served by a single node.
//!
//! ## Topology Refresh
//! The slot map is loaded with `CLUSTER SLOTS` on connect. A `MOVED` or `ASK`
//! reply triggers a reload before the error is returned, so the caller's
//! retry is routed with the new map.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use redis_protocol::redis_keyslot;
use redis_protocol::resp2::types::BytesFrame;

use crate::config::Config;
use crate::error::{ChunkError, Result};

use super::command::Command;
use super::endpoint::Endpoint;
use super::reply::{self, SlotRange};
use super::resp::RespStore;
use super::{KvStore, ScanCursor, ScanPage};

/// Hash slot of a key (honours `{...}` hash tags)
pub fn key_slot(key: &str) -> u16 {
    redis_keyslot(key.as_bytes())
}

/// Slot shared by every key, or `ChunkError::CrossSlot`
pub fn common_slot(keys: &[String]) -> Result<u16> {
    let mut iter = keys.iter();
    let first = iter
        .next()
        .ok_or_else(|| ChunkError::CrossSlot("no keys to route".to_string()))?;
    let slot = key_slot(first);

    for key in iter {
        let other = key_slot(key);
        if other != slot {
            return Err(ChunkError::CrossSlot(format!(
                "{} (slot {}) and {} (slot {})",
                first, slot, key, other
            )));
        }
    }
    Ok(slot)
}

/// Slot ranges and the node serving each
#[derive(Default)]
struct SlotMap {
    /// (start, end, node index), sorted by start
    ranges: Vec<(u16, u16, usize)>,

    /// Primaries, sorted by address so scan order is stable across reloads
    nodes: Vec<Arc<RespStore>>,
}

impl SlotMap {
    fn node_for(&self, slot: u16) -> Option<Arc<RespStore>> {
        let idx = self.ranges.partition_point(|(start, _, _)| *start <= slot);
        let (start, end, node) = *self.ranges.get(idx.checked_sub(1)?)?;
        (start <= slot && slot <= end).then(|| Arc::clone(&self.nodes[node]))
    }
}

/// Routing-aware cluster client
pub struct ClusterStore {
    /// Seed endpoint; also supplies credentials for every node
    seed: Endpoint,

    pool_size: usize,
    connect_timeout: std::time::Duration,
    io_timeout: Option<std::time::Duration>,

    map: RwLock<SlotMap>,
}

impl ClusterStore {
    /// Load the slot map through the seed endpoint and ping one primary
    pub async fn connect(config: &Config) -> Result<Self> {
        let seed: Endpoint = config.endpoint.parse()?;
        let store = Self {
            seed,
            pool_size: config.max_connections,
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
            map: RwLock::new(SlotMap::default()),
        };

        store
            .refresh()
            .await
            .map_err(|e| ChunkError::connection(store.seed.addr(), e))?;

        let first = store.map.read().nodes.first().cloned();
        match first {
            Some(node) => node.verify().await?,
            None => {
                return Err(ChunkError::connection(
                    store.seed.addr(),
                    "cluster reported no slot owners",
                ))
            }
        }

        tracing::info!(
            "Connected to cluster via {} ({} primaries)",
            store.seed,
            store.node_count()
        );
        Ok(store)
    }

    /// Number of primaries in the current map
    pub fn node_count(&self) -> usize {
        self.map.read().nodes.len()
    }

    /// Reload the slot map from any reachable node
    pub async fn refresh(&self) -> Result<()> {
        let mut candidates: Vec<Arc<RespStore>> = self.map.read().nodes.clone();
        candidates.push(Arc::new(self.node(self.seed.clone())));

        let mut last_error = None;
        for candidate in candidates {
            match candidate.call(Command::ClusterSlots).await.and_then(reply::expect_slots) {
                Ok(ranges) => {
                    self.install(ranges);
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!("CLUSTER SLOTS via {} failed: {}", candidate.endpoint(), err);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ChunkError::Backend("no cluster node reachable".to_string())))
    }

    fn node(&self, endpoint: Endpoint) -> RespStore {
        RespStore::new(endpoint, self.pool_size, self.connect_timeout, self.io_timeout)
    }

    /// Replace the slot map, keeping pooled clients of nodes that remain
    fn install(&self, ranges: Vec<SlotRange>) {
        let mut map = self.map.write();

        let mut known: BTreeMap<String, Arc<RespStore>> = map
            .nodes
            .iter()
            .map(|node| (node.endpoint().addr(), Arc::clone(node)))
            .collect();

        let mut addrs: Vec<(String, Endpoint)> = Vec::new();
        for range in &ranges {
            let endpoint = self.range_endpoint(range);
            let addr = endpoint.addr();
            if !addrs.iter().any(|(a, _)| *a == addr) {
                addrs.push((addr, endpoint));
            }
        }
        addrs.sort_by(|a, b| a.0.cmp(&b.0));

        let nodes: Vec<Arc<RespStore>> = addrs
            .iter()
            .map(|(addr, endpoint)| {
                known
                    .remove(addr)
                    .unwrap_or_else(|| Arc::new(self.node(endpoint.clone())))
            })
            .collect();

        let mut slot_ranges: Vec<(u16, u16, usize)> = ranges
            .iter()
            .filter_map(|range| {
                let addr = self.range_endpoint(range).addr();
                let node = addrs.iter().position(|(a, _)| *a == addr)?;
                Some((range.start, range.end, node))
            })
            .collect();
        slot_ranges.sort_by_key(|(start, _, _)| *start);

        tracing::debug!(
            "Installed slot map: {} ranges over {} primaries",
            slot_ranges.len(),
            nodes.len()
        );
        *map = SlotMap {
            ranges: slot_ranges,
            nodes,
        };
    }

    fn range_endpoint(&self, range: &SlotRange) -> Endpoint {
        // An empty host means "the address you reached me on"
        let host = if range.host.is_empty() {
            self.seed.host.as_str()
        } else {
            range.host.as_str()
        };
        self.seed.with_node(host, range.port)
    }

    fn route(&self, slot: u16) -> Result<Arc<RespStore>> {
        self.map
            .read()
            .node_for(slot)
            .ok_or_else(|| ChunkError::Backend(format!("slot {} is not served by any node", slot)))
    }

    /// Call the owner of `slot`, reloading the map on redirection
    async fn call_slot(&self, slot: u16, command: Command<'_>) -> Result<BytesFrame> {
        let node = self.route(slot)?;
        match node.call(command).await {
            Err(ChunkError::Backend(message))
                if message.starts_with("MOVED") || message.starts_with("ASK") =>
            {
                tracing::debug!("Redirected ({}); reloading slot map", message);
                if let Err(err) = self.refresh().await {
                    tracing::warn!("Slot map reload failed: {}", err);
                }
                Err(ChunkError::Backend(message))
            }
            other => other,
        }
    }
}

#[async_trait]
impl KvStore for ClusterStore {
    async fn ping(&self) -> Result<()> {
        let nodes = self.map.read().nodes.clone();
        for node in nodes {
            node.ping().await?;
        }
        Ok(())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let frame = self.call_slot(key_slot(key), Command::Set { key, value }).await?;
        reply::expect_ok(frame, "SET")
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let slot = common_slot(keys)?;
        let frame = self.call_slot(slot, Command::MGet { keys }).await?;
        reply::expect_values(frame, keys.len())
    }

    async fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        let nodes = self.map.read().nodes.clone();
        let Some(node) = nodes.get(cursor.node) else {
            return Ok(ScanPage {
                cursor: ScanCursor::START,
                keys: Vec::new(),
            });
        };

        let page = node.scan(ScanCursor::at(0, cursor.position), pattern, count).await?;
        let next = if !page.cursor.is_start() {
            ScanCursor::at(cursor.node, page.cursor.position)
        } else if cursor.node + 1 < nodes.len() {
            ScanCursor::at(cursor.node + 1, 0)
        } else {
            ScanCursor::START
        };

        Ok(ScanPage {
            cursor: next,
            keys: page.keys,
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut by_slot: BTreeMap<u16, Vec<String>> = BTreeMap::new();
        for key in keys {
            by_slot.entry(key_slot(key)).or_default().push(key.clone());
        }

        let mut removed = 0u64;
        for (slot, group) in by_slot {
            let frame = self.call_slot(slot, Command::Del { keys: &group }).await?;
            removed += reply::expect_integer(frame, "DEL")?.max(0) as u64;
        }
        Ok(removed)
    }
}
