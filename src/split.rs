//! Splitter
//!
//! Gives every batch of a dataset a (partition, batch-in-partition) address,
//! then streams the batches out, encodes them and writes them through a
//! bounded pipeline of retrying writes.
//!
//! ## Pipeline
//! ```text
//!  dataset ──► plan ──► encode ──► [permit] ──► spawn write ──► settle
//!  (all addresses,  source order)      max_inflight      every gather_threshold
//! ```
//!
//! - Every address is resolved and validated before the first write, so an
//!   addressing error leaves the store untouched
//! - Encoding stays on the calling task; only the writes run concurrently
//! - A write holds its semaphore permit until it finishes, so at most
//!   `max_inflight` writes (and their payloads) are outstanding
//! - Dispatched writes are awaited as a group whenever `gather_threshold` of
//!   them have accumulated
//! - The first permanent failure aborts the split once every dispatched write
//!   has settled

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::codec::IpcCodec;
use crate::config::{AddressingPolicy, Config};
use crate::dataset::DatasetSource;
use crate::error::{ChunkError, Result};
use crate::keys::{chunk_key, ChunkAddress, MAX_ID};
use crate::store::KvStore;
use crate::writer::RetryingWriter;

/// Outcome of a completed split
#[derive(Debug, Clone, Default)]
pub struct SplitReport {
    /// Chunks written
    pub chunks: u64,

    /// Batches written per partition (ids `0..n` each)
    pub partition_batches: BTreeMap<u32, u32>,

    /// Sum of encoded payload sizes
    pub payload_bytes: u64,

    pub elapsed: Duration,
}

impl SplitReport {
    pub fn partitions(&self) -> usize {
        self.partition_batches.len()
    }
}

/// Address and key of every batch, in source order
#[derive(Debug, Default)]
struct SplitPlan {
    keys: Vec<(ChunkAddress, String)>,
    partition_batches: BTreeMap<u32, u32>,
}

/// Writes a dataset into the store as addressed chunks
pub struct Splitter {
    writer: RetryingWriter,
    codec: IpcCodec,
    prefix: String,
    addressing: AddressingPolicy,
    partition_column: String,
    batches_per_partition: u32,
    max_inflight: usize,
    gather_threshold: usize,

    /// Chunks confirmed written by the running split
    chunks_written: u64,
}

impl Splitter {
    pub fn new(config: &Config, store: Arc<dyn KvStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            writer: RetryingWriter::new(store, config.retry),
            codec: IpcCodec::new(config.compression)?,
            prefix: config.prefix.clone(),
            addressing: config.addressing,
            partition_column: config.partition_column.clone(),
            batches_per_partition: config.batches_per_partition,
            max_inflight: config.max_inflight,
            gather_threshold: config.gather_threshold,
            chunks_written: 0,
        })
    }

    /// Chunks confirmed written so far by the current (or last) split
    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Split every batch of `dataset` into the store
    pub async fn split<D>(&mut self, dataset: &mut D) -> Result<SplitReport>
    where
        D: DatasetSource + ?Sized,
    {
        let started = Instant::now();
        self.chunks_written = 0;

        let SplitPlan {
            keys,
            partition_batches,
        } = self.plan(dataset)?;

        let permits = Arc::new(Semaphore::new(self.max_inflight));
        let mut pending: JoinSet<Result<()>> = JoinSet::new();
        let mut payload_bytes = 0u64;

        let dispatched = self
            .dispatch(dataset, keys, &permits, &mut pending, &mut payload_bytes)
            .await;
        let settled = self.settle(&mut pending).await;
        dispatched.and(settled)?;

        let report = SplitReport {
            chunks: self.chunks_written,
            partition_batches,
            payload_bytes,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Split {} chunks over {} partitions ({} payload bytes) in {:.2?}",
            report.chunks,
            report.partitions(),
            report.payload_bytes,
            report.elapsed
        );
        Ok(report)
    }

    /// Address every batch before anything is written.
    ///
    /// Column addressing reads the partition id of every batch up front, so a
    /// bad or out-of-range id fails the split with nothing in the store.
    /// Batch ids are handed out densely per partition in source order.
    fn plan<D>(&self, dataset: &mut D) -> Result<SplitPlan>
    where
        D: DatasetSource + ?Sized,
    {
        let count = dataset.batch_count();
        let mut plan = SplitPlan::default();
        if count == 0 {
            return Ok(plan);
        }
        let has_column = dataset.schema().index_of(&self.partition_column).is_ok();

        let column_ids = match self.addressing {
            AddressingPolicy::Column if !has_column => {
                return Err(ChunkError::Addressing(format!(
                    "dataset has no '{}' column; choose positional addressing to split it by source order",
                    self.partition_column
                )));
            }
            AddressingPolicy::Positional => vec![None; count],
            AddressingPolicy::ColumnOrPositional if !has_column => {
                tracing::warn!(
                    "No '{}' column; addressing {} batches by source position",
                    self.partition_column,
                    count
                );
                vec![None; count]
            }
            AddressingPolicy::Column | AddressingPolicy::ColumnOrPositional => {
                dataset.partition_ids(&self.partition_column)?
            }
        };
        if column_ids.len() != count {
            return Err(ChunkError::Addressing(format!(
                "read {} partition ids for {} batches",
                column_ids.len(),
                count
            )));
        }

        plan.keys.reserve(count);
        for (index, column_id) in column_ids.into_iter().enumerate() {
            let partition = match (column_id, self.addressing) {
                (Some(partition), _) => partition,
                (None, AddressingPolicy::Column) => {
                    return Err(ChunkError::Addressing(format!(
                        "source batch {} has no '{}' column",
                        index, self.partition_column
                    )));
                }
                (None, _) => self.positional(index)?,
            };

            let next = plan.partition_batches.entry(partition).or_insert(0);
            let address = ChunkAddress::new(partition, *next);
            let key = chunk_key(&self.prefix, address).map_err(|err| match err {
                ChunkError::Addressing(reason) => ChunkError::Addressing(format!(
                    "source batch {} ({}): {}",
                    index, address, reason
                )),
                other => other,
            })?;
            *next += 1;
            plan.keys.push((address, key));
        }

        tracing::debug!(
            "Planned {} chunks over {} partitions",
            plan.keys.len(),
            plan.partition_batches.len()
        );
        Ok(plan)
    }

    fn positional(&self, index: usize) -> Result<u32> {
        let partition = index / self.batches_per_partition as usize;
        if partition > MAX_ID as usize {
            return Err(ChunkError::Addressing(format!(
                "source batch {} falls in partition {} at {} batches per partition (max {})",
                index, partition, self.batches_per_partition, MAX_ID
            )));
        }
        Ok(partition as u32)
    }

    async fn dispatch<D>(
        &mut self,
        dataset: &mut D,
        keys: Vec<(ChunkAddress, String)>,
        permits: &Arc<Semaphore>,
        pending: &mut JoinSet<Result<()>>,
        payload_bytes: &mut u64,
    ) -> Result<()>
    where
        D: DatasetSource + ?Sized,
    {
        let total = keys.len();

        for (index, (address, key)) in keys.into_iter().enumerate() {
            let batch = dataset.get_batch(index)?;
            let payload = self.codec.encode(&batch)?;
            *payload_bytes += payload.len() as u64;

            let permit = Arc::clone(permits)
                .acquire_owned()
                .await
                .map_err(|e| ChunkError::Task(format!("write semaphore closed: {}", e)))?;
            let writer = self.writer.clone();

            tracing::trace!("Dispatching {} as {}", address, key);
            pending.spawn(async move {
                let _permit = permit;
                writer.write(&key, payload).await
            });

            if pending.len() >= self.gather_threshold {
                self.settle(pending).await?;
                tracing::debug!("Settled {}/{} chunks", self.chunks_written, total);
            }
        }
        Ok(())
    }

    /// Wait for every dispatched write, returning the first failure
    async fn settle(&mut self, pending: &mut JoinSet<Result<()>>) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(Ok(())) => self.chunks_written += 1,
                Ok(Err(err)) => {
                    tracing::error!("Chunk write failed: {}", err);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(ChunkError::Task(join_err.to_string()));
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
