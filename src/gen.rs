//! Synthetic dataset generator
//!
//! Writes one Arrow IPC file of `partitions × batches` record batches, each
//! tagged with its partition id in the `partition` column. Batches are laid
//! out partition-major, so a positional split with the same
//! batches-per-partition reproduces the column-based addressing.
//!
//! ## Columns
//! ```text
//! id64        Int64          global row id
//! partition   Int32          partition id
//! int32_c     Int32          uniform in [-1e6, 1e6)
//! float64_c   Float64        uniform in [-1, 1)
//! float32_c   Float32        uniform in [-1, 1)
//! bool_c      Boolean
//! ts_ns       Timestamp(ns)  30-day window from 2023-11-14
//! dec_18_4    Decimal128(18, 4)
//! str_c       Utf8 or Dictionary(Int32, Utf8)
//! list_ints   List<Int32>    0..=5 items each
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::array::{
    ArrayRef, BooleanArray, Decimal128Array, DictionaryArray, Float32Array, Float64Array,
    Int32Array, Int64Array, ListArray, StringArray, TimestampNanosecondArray,
};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef, TimeUnit};
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::codec::Compression;
use crate::dataset::PARTITION_COLUMN;
use crate::error::{ChunkError, Result};

const TS_BASE_NS: i64 = 1_700_000_000_000_000_000;
const TS_SPAN_NS: i64 = 30 * 24 * 3600 * 1_000_000_000;
const DECIMAL_RANGE: i128 = 10_000_000_000;

const VOWELS: &[u8] = b"aeiou";
const CONSONANTS: &[u8] = b"bcdfghjklmnpqrstvwxyz";

/// Shape of a generated dataset
#[derive(Debug, Clone)]
pub struct GenOptions {
    pub partitions: u32,
    pub batches_per_partition: u32,
    pub rows_per_batch: usize,
    pub compression: Compression,

    /// Dictionary-encode `str_c`
    pub dict_strings: bool,

    /// Distinct values of `str_c`
    pub string_cardinality: usize,

    pub seed: u64,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            partitions: 8,
            batches_per_partition: 8,
            rows_per_batch: 100_000,
            compression: Compression::Zstd,
            dict_strings: false,
            string_cardinality: 5000,
            seed: 123,
        }
    }
}

/// Summary of a generated file
#[derive(Debug, Clone)]
pub struct GenReport {
    pub batches: u64,
    pub rows: u64,
    pub file_bytes: u64,
    pub elapsed: Duration,
}

/// Schema of every generated batch
pub fn gen_schema(dict_strings: bool) -> SchemaRef {
    let str_type = if dict_strings {
        DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
    } else {
        DataType::Utf8
    };

    Arc::new(Schema::new(vec![
        Field::new("id64", DataType::Int64, false),
        Field::new(PARTITION_COLUMN, DataType::Int32, false),
        Field::new("int32_c", DataType::Int32, false),
        Field::new("float64_c", DataType::Float64, false),
        Field::new("float32_c", DataType::Float32, false),
        Field::new("bool_c", DataType::Boolean, false),
        Field::new("ts_ns", DataType::Timestamp(TimeUnit::Nanosecond, None), false),
        Field::new("dec_18_4", DataType::Decimal128(18, 4), false),
        Field::new("str_c", str_type, false),
        Field::new(
            "list_ints",
            DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
            false,
        ),
    ]))
}

/// Random pronounceable words of 2 to 4 syllables
pub fn vocabulary(cardinality: usize, rng: &mut SmallRng) -> Vec<String> {
    (0..cardinality.max(1))
        .map(|_| {
            let syllables = rng.gen_range(2..5);
            let mut word = String::with_capacity(syllables * 2);
            for _ in 0..syllables {
                word.push(CONSONANTS[rng.gen_range(0..CONSONANTS.len())] as char);
                word.push(VOWELS[rng.gen_range(0..VOWELS.len())] as char);
            }
            word
        })
        .collect()
}

/// One batch of `rows` rows for `partition`; `global_batch` seeds `id64`
pub fn make_batch(
    schema: &SchemaRef,
    rows: usize,
    partition: u32,
    global_batch: u64,
    vocab: &[String],
    rng: &mut SmallRng,
) -> Result<RecordBatch> {
    let first_id = global_batch as i64 * rows as i64;
    let dict_strings = matches!(
        schema.field_with_name("str_c")?.data_type(),
        DataType::Dictionary(_, _)
    );

    let id64 = Int64Array::from_iter_values(first_id..first_id + rows as i64);
    let part = Int32Array::from(vec![partition as i32; rows]);
    let int32_c = Int32Array::from_iter_values((0..rows).map(|_| rng.gen_range(-1_000_000..1_000_000)));
    let float64_c = Float64Array::from_iter_values((0..rows).map(|_| rng.gen_range(-1.0..1.0)));
    let float32_c = Float32Array::from_iter_values((0..rows).map(|_| rng.gen_range(-1.0f32..1.0)));
    let bool_c = BooleanArray::from((0..rows).map(|_| rng.gen_bool(0.5)).collect::<Vec<_>>());
    let ts_ns = TimestampNanosecondArray::from_iter_values(
        (0..rows).map(|_| TS_BASE_NS + rng.gen_range(0..TS_SPAN_NS)),
    );
    let dec_18_4 = Decimal128Array::from_iter_values(
        (0..rows).map(|_| rng.gen_range(-DECIMAL_RANGE..DECIMAL_RANGE)),
    )
    .with_precision_and_scale(18, 4)?;

    let picks: Vec<i32> = (0..rows)
        .map(|_| rng.gen_range(0..vocab.len()) as i32)
        .collect();
    let str_c: ArrayRef = if dict_strings {
        let values: ArrayRef = Arc::new(StringArray::from_iter_values(vocab.iter()));
        Arc::new(DictionaryArray::<Int32Type>::try_new(
            Int32Array::from(picks),
            values,
        )?)
    } else {
        Arc::new(StringArray::from_iter_values(
            picks.iter().map(|&i| vocab[i as usize].as_str()),
        ))
    };

    let list_ints = ListArray::from_iter_primitive::<Int32Type, _, _>((0..rows).map(|_| {
        let len = rng.gen_range(0..6);
        Some((0..len).map(|_| Some(rng.gen_range(0..1000))).collect::<Vec<_>>())
    }));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(id64),
        Arc::new(part),
        Arc::new(int32_c),
        Arc::new(float64_c),
        Arc::new(float32_c),
        Arc::new(bool_c),
        Arc::new(ts_ns),
        Arc::new(dec_18_4),
        str_c,
        Arc::new(list_ints),
    ];
    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

/// Generate a dataset into an Arrow IPC file at `path`
pub fn generate_dataset(path: &Path, options: &GenOptions) -> Result<GenReport> {
    if options.partitions == 0 || options.batches_per_partition == 0 {
        return Err(ChunkError::Config(
            "partitions and batches per partition must be positive".to_string(),
        ));
    }

    let started = Instant::now();
    let mut rng = SmallRng::seed_from_u64(options.seed);
    let vocab = vocabulary(options.string_cardinality, &mut rng);
    let schema = gen_schema(options.dict_strings);

    let file = BufWriter::new(File::create(path)?);
    let mut writer =
        FileWriter::try_new_with_options(file, &schema, options.compression.write_options()?)?;

    let total = options.partitions as u64 * options.batches_per_partition as u64;
    let mut written = 0u64;
    for partition in 0..options.partitions {
        for batch in 0..options.batches_per_partition {
            let global = partition as u64 * options.batches_per_partition as u64 + batch as u64;
            let record = make_batch(
                &schema,
                options.rows_per_batch,
                partition,
                global,
                &vocab,
                &mut rng,
            )?;
            writer.write(&record)?;
            written += 1;
        }
        tracing::debug!("Generated partition {} ({}/{} batches)", partition, written, total);
    }
    writer.finish()?;

    let report = GenReport {
        batches: written,
        rows: written * options.rows_per_batch as u64,
        file_bytes: std::fs::metadata(path)?.len(),
        elapsed: started.elapsed(),
    };
    tracing::info!(
        "Generated {} batches ({} rows, {} bytes) into {} in {:.2?}",
        report.batches,
        report.rows,
        report.file_bytes,
        path.display(),
        report.elapsed
    );
    Ok(report)
}
