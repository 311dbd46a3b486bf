//! Tests for the splitter

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chunkline::codec::decode_stream;
use chunkline::dataset::{DatasetSource, IpcFileDataset, MemoryDataset};
use chunkline::gen::{generate_dataset, GenOptions};
use chunkline::keys::{chunk_key, parse_chunk_key, ChunkAddress};
use chunkline::{AddressingPolicy, ChunkError, Config, MemoryStore, RetryPolicy, Splitter};

use tempfile::tempdir;

use common::{interleaved_dataset, sample_batch, FlakyStore, TrackingStore};

fn config(prefix: &str, batches_per_partition: u32) -> Config {
    Config::builder()
        .prefix(prefix)
        .batches_per_partition(batches_per_partition)
        .retry(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)))
        .build()
}

/// Dataset without a partition column
fn unlabelled(batches: usize) -> MemoryDataset {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    MemoryDataset::new(
        (0..batches)
            .map(|i| {
                RecordBatch::try_new(
                    schema.clone(),
                    vec![Arc::new(Int64Array::from(vec![i as i64; 4]))],
                )
                .unwrap()
            })
            .collect(),
    )
}

/// Reports many batches but cannot produce any
struct Phantom {
    count: usize,
}

impl DatasetSource for Phantom {
    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::empty())
    }

    fn batch_count(&self) -> usize {
        self.count
    }

    fn get_batch(&mut self, index: usize) -> chunkline::Result<RecordBatch> {
        panic!("batch {} read while addressing by position", index)
    }
}

#[tokio::test]
async fn test_dense_numbering_with_interleaved_partitions() {
    let store = Arc::new(MemoryStore::new());
    let mut dataset = interleaved_dataset(3, 5, 10);
    let mut splitter = Splitter::new(&config("dense", 5), store.clone()).unwrap();

    let report = splitter.split(&mut dataset).await.unwrap();

    assert_eq!(report.chunks, 15);
    assert_eq!(splitter.chunks_written(), 15);
    assert_eq!(report.partitions(), 3);
    assert!(report.partition_batches.values().all(|&n| n == 5));
    assert!(report.payload_bytes > 0);

    let mut addresses: Vec<ChunkAddress> = store
        .keys()
        .iter()
        .map(|k| parse_chunk_key("dense", k).unwrap())
        .collect();
    addresses.sort();
    let expected: Vec<ChunkAddress> = (0..3)
        .flat_map(|p| (0..5).map(move |b| ChunkAddress::new(p, b)))
        .collect();
    assert_eq!(addresses, expected);
}

#[tokio::test]
async fn test_batches_keep_source_order_within_partition() {
    let store = Arc::new(MemoryStore::new());
    let mut dataset = MemoryDataset::new(vec![
        sample_batch(2, 0, 3),
        sample_batch(0, 0, 3),
        sample_batch(2, 1, 3),
        sample_batch(2, 2, 3),
        sample_batch(0, 1, 3),
    ]);
    let mut splitter = Splitter::new(&config("order", 4), store.clone()).unwrap();
    splitter.split(&mut dataset).await.unwrap();

    let key = chunk_key("order", ChunkAddress::new(2, 2)).unwrap();
    let decoded = decode_stream(&store.get(&key).unwrap()).unwrap();
    assert_eq!(decoded, vec![sample_batch(2, 2, 3)]);

    let key = chunk_key("order", ChunkAddress::new(0, 1)).unwrap();
    let decoded = decode_stream(&store.get(&key).unwrap()).unwrap();
    assert_eq!(decoded, vec![sample_batch(0, 1, 3)]);

    assert_eq!(store.len(), 5);
}

#[tokio::test]
async fn test_missing_column_fails_before_any_write() {
    let store = Arc::new(FlakyStore::default());
    let mut dataset = unlabelled(4);
    let mut splitter = Splitter::new(&config("strict", 2), store.clone()).unwrap();

    let err = splitter.split(&mut dataset).await.unwrap_err();

    assert!(matches!(err, ChunkError::Addressing(_)));
    assert_eq!(store.set_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_positional_addressing() {
    let store = Arc::new(MemoryStore::new());
    let mut dataset = unlabelled(5);
    let mut cfg = config("pos", 2);
    cfg.addressing = AddressingPolicy::Positional;
    let mut splitter = Splitter::new(&cfg, store.clone()).unwrap();

    let report = splitter.split(&mut dataset).await.unwrap();

    assert_eq!(report.chunks, 5);
    let mut addresses: Vec<(u32, u32)> = store
        .keys()
        .iter()
        .map(|k| parse_chunk_key("pos", k).unwrap())
        .map(|a| (a.partition, a.batch))
        .collect();
    addresses.sort();
    assert_eq!(addresses, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0)]);
}

#[tokio::test]
async fn test_column_or_positional_falls_back_only_without_column() {
    let store = Arc::new(MemoryStore::new());
    let mut cfg = config("fallback", 3);
    cfg.addressing = AddressingPolicy::ColumnOrPositional;

    let mut splitter = Splitter::new(&cfg, store.clone()).unwrap();
    splitter.split(&mut unlabelled(4)).await.unwrap();
    let mut splitter = Splitter::new(&cfg, store.clone()).unwrap();
    let mut labelled = MemoryDataset::new(vec![sample_batch(9, 0, 2)]);
    splitter.split(&mut labelled).await.unwrap();

    assert!(store.contains("fallback:{part=00000}:batch=00002"));
    assert!(store.contains("fallback:{part=00001}:batch=00000"));
    assert!(store.contains("fallback:{part=00009}:batch=00000"));
    assert_eq!(store.len(), 5);
}

#[tokio::test]
async fn test_positional_overflow_rejected_up_front() {
    let store = Arc::new(FlakyStore::default());
    let mut cfg = config("big", 1);
    cfg.addressing = AddressingPolicy::Positional;
    let mut splitter = Splitter::new(&cfg, store.clone()).unwrap();

    let err = splitter
        .split(&mut Phantom { count: 100_001 })
        .await
        .unwrap_err();

    assert!(matches!(err, ChunkError::Addressing(_)));
    assert_eq!(store.set_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_column_overflow_rejected_before_any_write() {
    let store = Arc::new(MemoryStore::new());
    let mut dataset = MemoryDataset::new(vec![sample_batch(1, 0, 2), sample_batch(100_000, 0, 2)]);
    let mut splitter = Splitter::new(&config("wide", 1), store.clone()).unwrap();

    let err = splitter.split(&mut dataset).await.unwrap_err();

    assert!(matches!(err, ChunkError::Addressing(_)));
    assert_eq!(err.to_string().matches("Addressing error").count(), 1);
    assert_eq!(splitter.chunks_written(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_bad_partition_value_rejected_before_any_write() {
    let valid = sample_batch(0, 0, 2);
    let mut columns = valid.columns().to_vec();
    columns[1] = Arc::new(Int32Array::from(vec![-1, -1]));
    let negative = RecordBatch::try_new(valid.schema(), columns).unwrap();

    let store = Arc::new(MemoryStore::new());
    let mut dataset = MemoryDataset::new(vec![valid, negative]);
    let mut splitter = Splitter::new(&config("neg", 4), store.clone()).unwrap();

    let err = splitter.split(&mut dataset).await.unwrap_err();

    match &err {
        ChunkError::Addressing(reason) => {
            assert!(reason.starts_with("source batch 1: "), "{}", reason);
            assert!(reason.contains("-1"), "{}", reason);
        }
        other => panic!("Expected addressing error, got {:?}", other),
    }
    assert_eq!(err.to_string().matches("Addressing error").count(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_split_ipc_file_by_column() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("source.arrow");
    let options = GenOptions {
        partitions: 3,
        batches_per_partition: 2,
        rows_per_batch: 8,
        ..GenOptions::default()
    };
    generate_dataset(&path, &options).unwrap();

    let store = Arc::new(MemoryStore::new());
    let mut dataset = IpcFileDataset::open(&path).unwrap();
    let report = Splitter::new(&config("file", 2), store.clone())
        .unwrap()
        .split(&mut dataset)
        .await
        .unwrap();

    assert_eq!(report.chunks, 6);
    assert_eq!(
        report.partition_batches.into_iter().collect::<Vec<_>>(),
        vec![(0, 2), (1, 2), (2, 2)]
    );
    for partition in 0..3 {
        for batch in 0..2 {
            let key = chunk_key("file", ChunkAddress::new(partition, batch)).unwrap();
            assert!(store.contains(&key), "{} missing", key);
        }
    }
}

#[tokio::test]
async fn test_write_failure_fails_the_split() {
    let store = Arc::new(FlakyStore::failing_sets(u32::MAX));
    let mut dataset = interleaved_dataset(2, 3, 4);
    let mut splitter = Splitter::new(&config("broken", 3), store.clone()).unwrap();

    let err = splitter.split(&mut dataset).await.unwrap_err();

    match err {
        ChunkError::Write { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("Expected write error, got {:?}", other),
    }
    assert_eq!(splitter.chunks_written(), 0);
}

#[tokio::test]
async fn test_connection_failure_is_not_retried() {
    let store = Arc::new(FlakyStore::unreachable());
    let mut dataset = interleaved_dataset(1, 2, 3);
    let mut cfg = config("down", 2);
    cfg.retry.max_attempts = 5;
    let mut splitter = Splitter::new(&cfg, store.clone()).unwrap();

    let err = splitter.split(&mut dataset).await.unwrap_err();

    assert!(matches!(err, ChunkError::Connection { .. }));
    assert_eq!(store.set_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transient_failures_still_complete() {
    let store = Arc::new(FlakyStore::failing_sets(3));
    let mut dataset = interleaved_dataset(2, 4, 4);
    let mut cfg = config("flaky", 4);
    cfg.retry.max_attempts = 4;
    let mut splitter = Splitter::new(&cfg, store.clone()).unwrap();

    let report = splitter.split(&mut dataset).await.unwrap();

    assert_eq!(report.chunks, 8);
    assert_eq!(store.inner.len(), 8);
    assert_eq!(store.set_calls.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn test_inflight_writes_are_bounded() {
    let store = Arc::new(TrackingStore::new(Duration::from_millis(5)));
    let mut dataset = interleaved_dataset(4, 10, 2);
    let cfg = Config::builder()
        .prefix("bounded")
        .batches_per_partition(10)
        .max_inflight(3)
        .gather_threshold(8)
        .build();
    let mut splitter = Splitter::new(&cfg, store.clone()).unwrap();

    let report = splitter.split(&mut dataset).await.unwrap();

    assert_eq!(report.chunks, 40);
    assert_eq!(store.inner.len(), 40);
    assert!(store.peak() <= 3, "peak in-flight {}", store.peak());
    assert!(store.peak() >= 2);
}

#[tokio::test]
async fn test_empty_dataset_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let mut dataset = MemoryDataset::new(Vec::new());
    let mut splitter = Splitter::new(&config("empty", 4), store.clone()).unwrap();

    let report = splitter.split(&mut dataset).await.unwrap();

    assert_eq!(report.chunks, 0);
    assert_eq!(report.partitions(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let cfg = Config::builder().prefix("bad").max_inflight(0).build();
    assert!(matches!(
        Splitter::new(&cfg, store),
        Err(ChunkError::Config(_))
    ));
}
