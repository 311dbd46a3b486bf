//! Dataset sources
//!
//! The splitter consumes a dataset through `DatasetSource`: a random-access,
//! ordered sequence of record batches. Two sources are provided:
//! - `IpcFileDataset`: an Arrow IPC file on disk
//! - `MemoryDataset`: batches already in memory

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Int16Type, Int32Type, Int64Type, Int8Type, Schema, SchemaRef, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;

use crate::codec::Compression;
use crate::error::{ChunkError, Result};
use crate::table::{concat_batches_promoting, empty_table};

/// Default name of the column carrying partition ids
pub const PARTITION_COLUMN: &str = "partition";

/// Random-access source of record batches
pub trait DatasetSource {
    /// Schema shared by every batch
    fn schema(&self) -> SchemaRef;

    /// Number of batches in the source
    fn batch_count(&self) -> usize;

    /// Batch at position `index` (0-based source order)
    fn get_batch(&mut self, index: usize) -> Result<RecordBatch>;

    /// Partition id of every batch, in source order, read from `column`.
    ///
    /// Every entry is `None` when the schema has no such column. Sources that
    /// can read a single column cheaply should override this.
    fn partition_ids(&mut self, column: &str) -> Result<Vec<Option<u32>>> {
        let count = self.batch_count();
        if self.schema().index_of(column).is_err() {
            return Ok(vec![None; count]);
        }
        (0..count)
            .map(|index| {
                let batch = self.get_batch(index)?;
                batch_partition(&batch, index, column)
            })
            .collect()
    }
}

// =============================================================================
// Arrow IPC File
// =============================================================================

/// Arrow IPC file read one batch at a time
pub struct IpcFileDataset {
    path: PathBuf,
    reader: FileReader<BufReader<File>>,
    file_size: u64,
}

impl IpcFileDataset {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let reader = FileReader::try_new(BufReader::new(file), None)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            file_size,
        })
    }

    /// Size of the file on disk in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

impl DatasetSource for IpcFileDataset {
    fn schema(&self) -> SchemaRef {
        self.reader.schema()
    }

    fn batch_count(&self) -> usize {
        self.reader.num_batches()
    }

    fn get_batch(&mut self, index: usize) -> Result<RecordBatch> {
        self.reader.set_index(index)?;
        match self.reader.next() {
            Some(batch) => Ok(batch?),
            None => Err(ChunkError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("batch {} missing from IPC file", index),
            ))),
        }
    }

    /// Reads only the partition column through a second, projected reader
    fn partition_ids(&mut self, column: &str) -> Result<Vec<Option<u32>>> {
        let Ok(position) = self.schema().index_of(column) else {
            return Ok(vec![None; self.batch_count()]);
        };
        let file = File::open(&self.path)?;
        let projected = FileReader::try_new(BufReader::new(file), Some(vec![position]))?;
        projected
            .enumerate()
            .map(|(index, batch)| batch_partition(&batch?, index, column))
            .collect()
    }
}

// =============================================================================
// In-Memory
// =============================================================================

/// Batches held in memory
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl MemoryDataset {
    /// Build from batches; the schema is taken from the first batch
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .unwrap_or_else(|| Arc::new(Schema::empty()));
        Self { schema, batches }
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }
}

impl DatasetSource for MemoryDataset {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn batch_count(&self) -> usize {
        self.batches.len()
    }

    fn get_batch(&mut self, index: usize) -> Result<RecordBatch> {
        self.batches.get(index).cloned().ok_or_else(|| {
            ChunkError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("batch {} out of range ({} batches)", index, self.batches.len()),
            ))
        })
    }
}

// =============================================================================
// Partition Column
// =============================================================================

/// Partition id of a batch, read from the first row of `column`.
///
/// Returns `Ok(None)` when the column does not exist. An empty batch, a null
/// first value, a negative value or a non-integer column is an
/// `ChunkError::Addressing` error.
pub fn partition_of(batch: &RecordBatch, column: &str) -> Result<Option<u32>> {
    let Some(array) = batch.column_by_name(column) else {
        return Ok(None);
    };
    if array.is_empty() {
        return Err(ChunkError::Addressing(format!(
            "batch has no rows to read column '{}' from",
            column
        )));
    }
    if array.is_null(0) {
        return Err(ChunkError::Addressing(format!(
            "column '{}' is null in the first row",
            column
        )));
    }

    let value = first_integer(array).ok_or_else(|| {
        ChunkError::Addressing(format!(
            "column '{}' has non-integer type {}",
            column,
            array.data_type()
        ))
    })?;

    u32::try_from(value).map(Some).map_err(|_| {
        ChunkError::Addressing(format!(
            "column '{}' holds out-of-range partition id {}",
            column, value
        ))
    })
}

/// `partition_of` with the source position added to any addressing error
fn batch_partition(batch: &RecordBatch, index: usize, column: &str) -> Result<Option<u32>> {
    partition_of(batch, column).map_err(|err| match err {
        ChunkError::Addressing(reason) => {
            ChunkError::Addressing(format!("source batch {}: {}", index, reason))
        }
        other => other,
    })
}

fn first_integer(array: &ArrayRef) -> Option<i128> {
    let value = match array.data_type() {
        DataType::Int8 => array.as_primitive::<Int8Type>().value(0) as i128,
        DataType::Int16 => array.as_primitive::<Int16Type>().value(0) as i128,
        DataType::Int32 => array.as_primitive::<Int32Type>().value(0) as i128,
        DataType::Int64 => array.as_primitive::<Int64Type>().value(0) as i128,
        DataType::UInt8 => array.as_primitive::<UInt8Type>().value(0) as i128,
        DataType::UInt16 => array.as_primitive::<UInt16Type>().value(0) as i128,
        DataType::UInt32 => array.as_primitive::<UInt32Type>().value(0) as i128,
        DataType::UInt64 => array.as_primitive::<UInt64Type>().value(0) as i128,
        _ => return None,
    };
    Some(value)
}

// =============================================================================
// Local Files
// =============================================================================

/// Write one table as an Arrow IPC file
pub fn write_ipc_file(path: &Path, table: &RecordBatch, compression: Compression) -> Result<u64> {
    let file = File::create(path)?;
    let mut writer =
        FileWriter::try_new_with_options(file, &table.schema(), compression.write_options()?)?;
    writer.write(table)?;
    writer.finish()?;
    Ok(std::fs::metadata(path)?.len())
}

/// Read a whole IPC file into one table
pub fn read_ipc_file(path: &Path) -> Result<RecordBatch> {
    read_local(path, &[])
}

/// Baseline local read: every batch of `path` whose partition column is in
/// `partitions`. An empty `partitions` slice keeps every batch, as do
/// batches without a partition column.
pub fn read_local(path: &Path, partitions: &[u32]) -> Result<RecordBatch> {
    let wanted: HashSet<u32> = partitions.iter().copied().collect();
    let mut dataset = IpcFileDataset::open(path)?;
    let schema = dataset.schema();
    let mut kept = Vec::new();

    for index in 0..dataset.batch_count() {
        let batch = dataset.get_batch(index)?;
        if batch.num_rows() == 0 {
            continue;
        }
        if !wanted.is_empty() {
            if let Some(partition) = partition_of(&batch, PARTITION_COLUMN)? {
                if !wanted.contains(&partition) {
                    continue;
                }
            }
        }
        kept.push(batch);
    }

    if kept.is_empty() {
        return Ok(if schema.fields().is_empty() {
            empty_table()
        } else {
            RecordBatch::new_empty(schema)
        });
    }
    concat_batches_promoting(&kept)
}
