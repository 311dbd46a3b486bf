//! Shared helpers for chunkline integration tests
//!
//! - Sample datasets whose row ids encode (partition, batch, row)
//! - Stores with injected faults, latency and in-flight tracking
//! - An in-process RESP2 server backed by `MemoryStore`

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, AsArray, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use chunkline::dataset::MemoryDataset;
use chunkline::store::{KvStore, MemoryStore, ScanCursor, ScanPage};
use chunkline::{ChunkError, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

// =============================================================================
// Sample Data
// =============================================================================

pub fn sample_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("partition", DataType::Int32, false),
        Field::new("label", DataType::Utf8, true),
    ]))
}

/// Row id encoding its origin
pub fn row_id(partition: u32, batch: u32, row: usize) -> i64 {
    partition as i64 * 1_000_000 + batch as i64 * 1_000 + row as i64
}

/// One batch of `rows` rows belonging to (`partition`, `batch`)
pub fn sample_batch(partition: u32, batch: u32, rows: usize) -> RecordBatch {
    let ids = Int64Array::from_iter_values((0..rows).map(|r| row_id(partition, batch, r)));
    let parts = Int32Array::from(vec![partition as i32; rows]);
    let labels = StringArray::from_iter(
        (0..rows).map(|r| (r % 3 != 0).then(|| format!("p{}-b{}-r{}", partition, batch, r))),
    );
    RecordBatch::try_new(
        sample_schema(),
        vec![Arc::new(ids), Arc::new(parts), Arc::new(labels)],
    )
    .unwrap()
}

/// Partition-major dataset: p0b0, p0b1, ..., p1b0, ...
pub fn ordered_dataset(partitions: u32, batches: u32, rows: usize) -> MemoryDataset {
    let mut out = Vec::new();
    for p in 0..partitions {
        for b in 0..batches {
            out.push(sample_batch(p, b, rows));
        }
    }
    MemoryDataset::new(out)
}

/// Round-robin dataset: p0b0, p1b0, ..., p0b1, p1b1, ...
pub fn interleaved_dataset(partitions: u32, batches: u32, rows: usize) -> MemoryDataset {
    let mut out = Vec::new();
    for b in 0..batches {
        for p in 0..partitions {
            out.push(sample_batch(p, b, rows));
        }
    }
    MemoryDataset::new(out)
}

/// Values of the `id` column
pub fn ids(table: &RecordBatch) -> Vec<i64> {
    table
        .column_by_name("id")
        .expect("id column")
        .as_primitive::<Int64Type>()
        .values()
        .to_vec()
}

/// Expected ids of reading `partitions` in order, `batches` each
pub fn expected_ids(partitions: &[u32], batches: u32, rows: usize) -> Vec<i64> {
    let mut out = Vec::new();
    for &p in partitions {
        for b in 0..batches {
            out.extend((0..rows).map(|r| row_id(p, b, r)));
        }
    }
    out
}

pub fn null_count(table: &RecordBatch, column: &str) -> usize {
    table.column_by_name(column).map_or(0, |c| c.null_count())
}

// =============================================================================
// Fault-injecting Store
// =============================================================================

/// Wraps `MemoryStore`; the first N calls of SET / MGET fail with a backend
/// error (`u32::MAX` fails forever).
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    set_failures: AtomicU32,
    mget_failures: AtomicU32,
    connection_down: bool,
    pub set_calls: AtomicU32,
    pub mget_calls: AtomicU32,
}

impl FlakyStore {
    pub fn failing_sets(failures: u32) -> Self {
        Self {
            set_failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn failing_mgets(failures: u32) -> Self {
        Self {
            mget_failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            connection_down: true,
            ..Self::default()
        }
    }

    fn injected(&self, budget: &AtomicU32, command: &str) -> Result<()> {
        if self.connection_down {
            return Err(ChunkError::connection("fake:6379", "connection refused"));
        }
        let spent = budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
            0 => None,
            u32::MAX => Some(u32::MAX),
            n => Some(n - 1),
        });
        match spent {
            Ok(_) => Err(ChunkError::Backend(format!("LOADING injected {} failure", command))),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.injected(&self.set_failures, "SET")?;
        self.inner.set(key, value).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.mget_calls.fetch_add(1, Ordering::SeqCst);
        self.injected(&self.mget_failures, "MGET")?;
        self.inner.mget(keys).await
    }

    async fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        self.inner.scan(cursor, pattern, count).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.inner.delete(keys).await
    }
}

// =============================================================================
// Reverse-completion Store
// =============================================================================

/// Delays each MGET so that calls complete in reverse of the given
/// submission order, recording the first key of every call as it completes.
pub struct ReverseStore {
    pub inner: MemoryStore,

    /// First key of every expected call, in submission order
    order: Vec<String>,
    step: Duration,
    pub completed: Mutex<Vec<String>>,
}

impl ReverseStore {
    pub fn new(inner: MemoryStore, order: Vec<String>, step: Duration) -> Self {
        Self {
            inner,
            order,
            step,
            completed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl KvStore for ReverseStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let position = keys
            .first()
            .and_then(|first| self.order.iter().position(|k| k == first))
            .unwrap_or(self.order.len());
        let remaining = (self.order.len() - position) as u32;
        tokio::time::sleep(self.step * remaining).await;

        let values = self.inner.mget(keys).await?;
        if let Some(first) = keys.first() {
            self.completed.lock().push(first.clone());
        }
        Ok(values)
    }

    async fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        self.inner.scan(cursor, pattern, count).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.inner.delete(keys).await
    }
}

// =============================================================================
// In-flight Tracking Store
// =============================================================================

/// Holds every SET for `delay` and records the peak number outstanding
pub struct TrackingStore {
    pub inner: MemoryStore,
    delay: Duration,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl TrackingStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for TrackingStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.set(key, value).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.inner.mget(keys).await
    }

    async fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        self.inner.scan(cursor, pattern, count).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.inner.delete(keys).await
    }
}

// =============================================================================
// In-process RESP2 Server
// =============================================================================

/// RESP2 server on an ephemeral port serving PING, AUTH, SELECT, SET, MGET,
/// SCAN and DEL from a `MemoryStore`
pub struct FakeServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,

    /// SET calls still to be answered with an error reply
    pub failing_sets: Arc<AtomicU32>,

    /// Commands served
    pub commands: Arc<AtomicUsize>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(MemoryStore::new());
        let failing_sets = Arc::new(AtomicU32::new(0));
        let commands = Arc::new(AtomicUsize::new(0));

        let state = ServerState {
            store: Arc::clone(&store),
            failing_sets: Arc::clone(&failing_sets),
            commands: Arc::clone(&commands),
        };
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = state.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, state).await;
                });
            }
        });

        Self {
            addr,
            store,
            failing_sets,
            commands,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }
}

#[derive(Clone)]
struct ServerState {
    store: Arc<MemoryStore>,
    failing_sets: Arc<AtomicU32>,
    commands: Arc<AtomicUsize>,
}

async fn serve(
    socket: TcpStream,
    state: ServerState,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(socket, Resp2::default());
    while let Some(frame) = framed.next().await {
        let reply = respond(&state, frame?).await;
        framed.send(reply).await?;
    }
    Ok(())
}

fn ok() -> BytesFrame {
    BytesFrame::SimpleString(Bytes::from_static(b"OK"))
}

fn text(raw: &Bytes) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

async fn respond(state: &ServerState, frame: BytesFrame) -> BytesFrame {
    state.commands.fetch_add(1, Ordering::SeqCst);

    let BytesFrame::Array(parts) = frame else {
        return BytesFrame::Error("ERR expected array".into());
    };
    let mut words = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            BytesFrame::BulkString(raw) | BytesFrame::SimpleString(raw) => words.push(raw),
            _ => return BytesFrame::Error("ERR expected bulk strings".into()),
        }
    }
    let Some((name, args)) = words.split_first() else {
        return BytesFrame::Error("ERR empty command".into());
    };
    let name = text(name).to_ascii_uppercase();
    let store = &state.store;

    match (name.as_str(), args) {
        ("PING", []) => BytesFrame::SimpleString(Bytes::from_static(b"PONG")),
        ("AUTH", [_]) | ("AUTH", [_, _]) | ("SELECT", [_]) => ok(),
        ("SET", [key, value]) => {
            let injected = state
                .failing_sets
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if injected {
                return BytesFrame::Error("LOADING server is loading the dataset".into());
            }
            match store.set(&text(key), value.clone()).await {
                Ok(()) => ok(),
                Err(e) => BytesFrame::Error(format!("ERR {}", e).into()),
            }
        }
        ("MGET", keys) if !keys.is_empty() => {
            let keys: Vec<String> = keys.iter().map(text).collect();
            match store.mget(&keys).await {
                Ok(values) => BytesFrame::Array(
                    values
                        .into_iter()
                        .map(|v| v.map_or(BytesFrame::Null, BytesFrame::BulkString))
                        .collect(),
                ),
                Err(e) => BytesFrame::Error(format!("ERR {}", e).into()),
            }
        }
        ("SCAN", [cursor, options @ ..]) => {
            let Ok(position) = text(cursor).parse::<u64>() else {
                return BytesFrame::Error("ERR invalid cursor".into());
            };
            let mut pattern = "*".to_string();
            let mut count = 10usize;
            for pair in options.chunks(2) {
                match (text(&pair[0]).to_ascii_uppercase().as_str(), pair.get(1)) {
                    ("MATCH", Some(value)) => pattern = text(value),
                    ("COUNT", Some(value)) => count = text(value).parse().unwrap_or(10),
                    _ => return BytesFrame::Error("ERR syntax error".into()),
                }
            }
            match store.scan(ScanCursor::at(0, position), &pattern, count).await {
                Ok(page) => BytesFrame::Array(vec![
                    BytesFrame::BulkString(Bytes::from(page.cursor.position.to_string())),
                    BytesFrame::Array(
                        page.keys
                            .into_iter()
                            .map(|k| BytesFrame::BulkString(Bytes::from(k)))
                            .collect(),
                    ),
                ]),
                Err(e) => BytesFrame::Error(format!("ERR {}", e).into()),
            }
        }
        ("DEL", keys) if !keys.is_empty() => {
            let keys: Vec<String> = keys.iter().map(text).collect();
            match store.delete(&keys).await {
                Ok(n) => BytesFrame::Integer(n as i64),
                Err(e) => BytesFrame::Error(format!("ERR {}", e).into()),
            }
        }
        _ => BytesFrame::Error(format!("ERR unknown command '{}'", name).into()),
    }
}
