//! # chunkline
//!
//! Splits a columnar Arrow dataset into independently addressable chunks,
//! stores them in a Redis-compatible key-value backend, and reads selected
//! partitions back with bounded concurrency:
//! - Sharding-friendly key scheme with a per-partition routing tag
//! - Bounded write pipeline with capped exponential backoff
//! - Grouped multi-get reads with off-thread decode and order-preserving reassembly
//! - Partition discovery by cursor scan
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐                    ┌──────────────────────────┐
//! │       Splitter       │                    │          Reader          │
//! │ address → encode →   │                    │ discover? → fetch groups │
//! │ bounded writes       │                    │ → decode → concat        │
//! └──────────┬───────────┘                    └────────────┬─────────────┘
//!            │                                             │
//!   ┌────────▼────────┐   ┌──────────────┐   ┌─────────────▼─────────────┐
//!   │ RetryingWriter  │   │  Key Scheme  │   │ map_bounded / map_blocking│
//!   │ (SET + backoff) │   │ {part=P}:B   │   │ (MGET + backoff, decode)  │
//!   └────────┬────────┘   └──────────────┘   └─────────────┬─────────────┘
//!            │                                             │
//! ┌──────────▼─────────────────────────────────────────────▼─────────────┐
//! │                         KvStore (async trait)                        │
//! │        MemoryStore  │  RespStore (RESP2/TCP)  │  ClusterStore         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod keys;
pub mod retry;
pub mod pool;
pub mod codec;
pub mod table;
pub mod dataset;
pub mod store;
pub mod writer;
pub mod split;
pub mod discovery;
pub mod read;
pub mod gen;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ChunkError, Result};
pub use config::{AddressingPolicy, Config, Topology};
pub use codec::{Compression, IpcCodec};
pub use keys::{chunk_key, parse_chunk_key, ChunkAddress};
pub use retry::RetryPolicy;
pub use store::{KvStore, MemoryStore};
pub use split::{SplitReport, Splitter};
pub use discovery::{discover_partitions, purge};
pub use read::{ReadOutcome, ReadReport, Reader};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of chunkline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
