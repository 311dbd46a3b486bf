//! Reader
//!
//! Reconstitutes a table from stored chunks.
//!
//! ## Pipeline
//! ```text
//!  partitions ──► keys 0..bpp ──► fetch groups ──► MGET ×N ──► flatten ──► decode ──► concat
//!  (request or    per partition    ≤ pipeline_width  fetch_concurrency   key order   decode_workers
//!   discovery)                                        at once                        (blocking pool)
//! ```
//!
//! Fetch groups never span partitions, so on a cluster every group is served
//! by the single node owning that partition's routing tag. Groups and decodes
//! complete in any order; both stages collect into slots indexed by submission
//! position, so row blocks always come out as partitions in request order and
//! batches `0..bpp` within each.
//!
//! Absent keys are not errors: they are counted in the report and skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use bytes::Bytes;

use crate::codec::decode_stream;
use crate::config::Config;
use crate::discovery::discover_partitions;
use crate::error::{ChunkError, Result};
use crate::keys::partition_keys;
use crate::pool::{map_blocking, map_bounded};
use crate::retry::{retry_with_backoff, Exhausted, RetryPolicy};
use crate::store::KvStore;
use crate::table::{concat_batches_promoting, empty_table};

/// Counts and stage timings of one read
#[derive(Debug, Clone, Default)]
pub struct ReadReport {
    /// Partitions requested (or discovered)
    pub partitions: usize,

    /// Keys constructed for the request
    pub keys_requested: usize,

    pub chunks_present: usize,

    /// Keys with no stored chunk, or an empty value
    pub chunks_missing: usize,

    /// Rows in the output table
    pub rows: usize,

    pub fetch_elapsed: Duration,
    pub decode_elapsed: Duration,
    pub concat_elapsed: Duration,
    pub total_elapsed: Duration,
}

/// Reconstituted table with its report
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub table: RecordBatch,
    pub report: ReadReport,
}

/// Slice each partition's keys into groups of at most `width` keys.
///
/// Groups follow partition order, then batch order; concatenating them yields
/// the full per-key order of the request.
pub fn build_fetch_groups(
    prefix: &str,
    partitions: &[u32],
    batches_per_partition: u32,
    width: usize,
) -> Result<Vec<Vec<String>>> {
    let width = width.max(1);
    let mut groups = Vec::new();

    for &partition in partitions {
        let keys = partition_keys(prefix, partition, batches_per_partition)?;
        groups.extend(keys.chunks(width).map(<[String]>::to_vec));
    }
    Ok(groups)
}

/// Reads partitions back from the store
pub struct Reader {
    store: Arc<dyn KvStore>,
    prefix: String,
    batches_per_partition: u32,
    pipeline_width: usize,
    fetch_concurrency: usize,
    decode_workers: usize,
    scan_page_size: usize,
    retry: RetryPolicy,
}

impl Reader {
    pub fn new(config: &Config, store: Arc<dyn KvStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            prefix: config.prefix.clone(),
            batches_per_partition: config.batches_per_partition,
            pipeline_width: config.pipeline_width,
            fetch_concurrency: config.fetch_concurrency,
            decode_workers: config.decode_workers,
            scan_page_size: config.scan_page_size,
            retry: config.retry,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Read `partitions` in the given order, or every partition found by
    /// discovery when `None`.
    ///
    /// An empty partition set yields a zero-column table.
    pub async fn read(&self, partitions: Option<&[u32]>) -> Result<ReadOutcome> {
        let started = Instant::now();

        let discovered;
        let partitions = match partitions {
            Some(requested) => requested,
            None => {
                discovered =
                    discover_partitions(self.store.as_ref(), &self.prefix, self.scan_page_size)
                        .await?;
                discovered.as_slice()
            }
        };

        if partitions.is_empty() {
            tracing::info!("No partitions to read under {}", self.prefix);
            return Ok(ReadOutcome {
                table: empty_table(),
                report: ReadReport {
                    total_elapsed: started.elapsed(),
                    ..ReadReport::default()
                },
            });
        }

        let mut report = ReadReport {
            partitions: partitions.len(),
            ..ReadReport::default()
        };

        // Fetch
        let stage = Instant::now();
        let groups = build_fetch_groups(
            &self.prefix,
            partitions,
            self.batches_per_partition,
            self.pipeline_width,
        )?;
        report.keys_requested = groups.iter().map(Vec::len).sum();
        tracing::debug!(
            "Fetching {} keys in {} groups ({} at once)",
            report.keys_requested,
            groups.len(),
            self.fetch_concurrency
        );

        let fetched = map_bounded(&groups, self.fetch_concurrency, |keys| self.fetch_group(keys)).await?;

        let present: Vec<(String, Bytes)> = groups
            .into_iter()
            .zip(fetched)
            .flat_map(|(keys, values)| keys.into_iter().zip(values))
            // An empty value is a missing chunk, not an empty IPC stream
            .filter_map(|(key, value)| {
                value
                    .filter(|payload| !payload.is_empty())
                    .map(|payload| (key, payload))
            })
            .collect();
        report.chunks_present = present.len();
        report.chunks_missing = report.keys_requested - report.chunks_present;
        report.fetch_elapsed = stage.elapsed();

        // Decode
        let stage = Instant::now();
        let decoded = map_blocking(present, self.decode_workers, decode_chunk).await?;
        let batches: Vec<RecordBatch> = decoded.into_iter().flatten().collect();
        report.decode_elapsed = stage.elapsed();

        // Concatenate
        let stage = Instant::now();
        let table = concat_batches_promoting(&batches)?;
        report.concat_elapsed = stage.elapsed();

        report.rows = table.num_rows();
        report.total_elapsed = started.elapsed();

        tracing::info!(
            "Read {}/{} chunks ({} missing) from {} partitions: {} rows in {:.2?} \
             (fetch {:.2?}, decode {:.2?}, concat {:.2?})",
            report.chunks_present,
            report.keys_requested,
            report.chunks_missing,
            report.partitions,
            report.rows,
            report.total_elapsed,
            report.fetch_elapsed,
            report.decode_elapsed,
            report.concat_elapsed
        );

        Ok(ReadOutcome { table, report })
    }

    /// One multi-get with retry; the reply has exactly one slot per key
    async fn fetch_group(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let first_key = keys.first().map(String::as_str).unwrap_or_default();
        let store = &self.store;

        retry_with_backoff(&self.retry, first_key, || async move {
            let values = store.mget(keys).await?;
            if values.len() != keys.len() {
                return Err(ChunkError::Protocol(format!(
                    "multi-get of {} keys returned {} values",
                    keys.len(),
                    values.len()
                )));
            }
            Ok(values)
        })
        .await
        .map_err(|Exhausted { attempts, last }| match last {
            err @ ChunkError::Connection { .. } => err,
            err => ChunkError::Fetch {
                first_key: first_key.to_string(),
                keys: keys.len(),
                attempts,
                source: Box::new(err),
            },
        })
    }
}

fn decode_chunk((key, payload): (String, Bytes)) -> Result<Vec<RecordBatch>> {
    decode_stream(&payload).map_err(|err| match err {
        ChunkError::Arrow(source) => ChunkError::Decode { key, source },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_never_span_partitions() {
        let groups = build_fetch_groups("p", &[3, 1], 5, 2).unwrap();
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1, 2, 2, 1]);
        assert_eq!(groups[0][0], "p:{part=00003}:batch=00000");
        assert_eq!(groups[2][0], "p:{part=00003}:batch=00004");
        assert_eq!(groups[3][0], "p:{part=00001}:batch=00000");
    }

    #[test]
    fn test_wide_pipeline_keeps_one_group_per_partition() {
        let groups = build_fetch_groups("p", &[0, 1, 2], 4, 64).unwrap();
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.len() == 4));
    }

    #[test]
    fn test_overflowing_partition_is_rejected() {
        assert!(matches!(
            build_fetch_groups("p", &[100_000], 1, 8),
            Err(ChunkError::Addressing(_))
        ));
    }
}
