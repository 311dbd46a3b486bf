//! chunkline CLI
//!
//! Generates datasets, splits them into a key-value backend and reads them back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use chunkline::config::ConfigBuilder;
use chunkline::dataset::{read_ipc_file, read_local, write_ipc_file, IpcFileDataset};
use chunkline::gen::{generate_dataset, GenOptions};
use chunkline::table::diff_columns;
use chunkline::{
    discover_partitions, purge, store, AddressingPolicy, ChunkError, Compression, Config, Reader,
    Result, RetryPolicy, Splitter, Topology,
};
use tracing_subscriber::{fmt, EnvFilter};

/// chunkline
#[derive(Parser, Debug)]
#[command(name = "chunkline")]
#[command(about = "Split Arrow datasets into a key-value store and read partitions back")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Backend connection and retry flags
#[derive(clap::Args, Debug)]
struct BackendArgs {
    /// Endpoint URL (redis://[user:pass@]host:port[/db])
    #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,

    /// Route by hash slot across cluster primaries
    #[arg(long)]
    cluster: bool,

    /// Attempts per write or fetch group
    #[arg(long, default_value = "3")]
    retries: u32,

    #[arg(long, default_value = "1000")]
    retry_base_ms: u64,

    #[arg(long, default_value = "60000")]
    retry_max_ms: u64,

    /// Connections per node
    #[arg(long, default_value = "50")]
    max_connections: usize,
}

impl BackendArgs {
    fn config(&self, prefix: &str) -> ConfigBuilder {
        let topology = if self.cluster {
            Topology::Cluster
        } else {
            Topology::Standalone
        };
        Config::builder()
            .prefix(prefix)
            .endpoint(&self.redis_url)
            .topology(topology)
            .max_connections(self.max_connections)
            .retry(RetryPolicy::new(
                self.retries,
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            ))
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Addressing {
    /// Partition id from the partition column (required)
    Column,
    /// Partition id = source position / batches per partition
    Positional,
    /// Column when present, else positional
    ColumnOrPositional,
}

impl From<Addressing> for AddressingPolicy {
    fn from(value: Addressing) -> Self {
        match value {
            Addressing::Column => AddressingPolicy::Column,
            Addressing::Positional => AddressingPolicy::Positional,
            Addressing::ColumnOrPositional => AddressingPolicy::ColumnOrPositional,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate one Arrow IPC file of synthetic partitions
    Gen {
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value = "8")]
        partitions: u32,

        /// Batches per partition
        #[arg(long, default_value = "8")]
        batches: u32,

        /// Rows per batch
        #[arg(long, default_value = "100000")]
        rows: usize,

        /// uncompressed, lz4 or zstd
        #[arg(long, default_value = "zstd")]
        compression: Compression,

        #[arg(long)]
        dict_strings: bool,

        #[arg(long, default_value = "5000")]
        string_cardinality: usize,

        #[arg(long, default_value = "123")]
        seed: u64,
    },

    /// Split an IPC file into the store, one chunk per batch
    Split {
        #[arg(long)]
        inp: PathBuf,

        #[arg(long)]
        prefix: String,

        /// Batches per partition
        #[arg(long)]
        batches: u32,

        #[arg(long, default_value = "zstd")]
        compression: Compression,

        #[arg(long, value_enum, default_value = "column")]
        addressing: Addressing,

        #[arg(long, default_value = "partition")]
        partition_column: String,

        #[arg(long, default_value = "256")]
        max_inflight: usize,

        /// Dispatched writes awaited as one group
        #[arg(long, default_value = "100")]
        gather_threshold: usize,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Read partitions back from the store
    Read {
        #[arg(long)]
        prefix: String,

        /// Comma-separated partition ids, or "all" to discover them
        #[arg(long)]
        partitions: String,

        /// Batches per partition
        #[arg(long)]
        batches: u32,

        /// Keys per multi-get
        #[arg(long, default_value = "64")]
        pipeline: usize,

        /// Concurrent multi-gets
        #[arg(long, default_value = "256")]
        concurrency: usize,

        /// Decode worker threads (defaults to available parallelism)
        #[arg(long)]
        decode_workers: Option<usize>,

        /// Save the reconstituted table as an IPC file
        #[arg(long)]
        out: Option<PathBuf>,

        /// Compression of the --out file
        #[arg(long, default_value = "zstd")]
        compression: Compression,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// List the partitions stored under a prefix
    Discover {
        #[arg(long)]
        prefix: String,

        #[arg(long, default_value = "1000")]
        scan_count: usize,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Delete every chunk stored under a prefix
    Purge {
        #[arg(long)]
        prefix: String,

        #[arg(long, default_value = "1000")]
        scan_count: usize,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Read partitions straight from a local IPC file (baseline)
    LocalRead {
        #[arg(long)]
        inp: PathBuf,

        /// Comma-separated partition ids
        #[arg(long)]
        partitions: String,
    },

    /// Check that two IPC files hold the same table
    Verify {
        #[arg(long)]
        file1: PathBuf,

        #[arg(long)]
        file2: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chunkline=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::debug!("chunkline v{}", chunkline::VERSION);

    if let Err(e) = run(args.command).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Gen {
            out,
            partitions,
            batches,
            rows,
            compression,
            dict_strings,
            string_cardinality,
            seed,
        } => {
            let options = GenOptions {
                partitions,
                batches_per_partition: batches,
                rows_per_batch: rows,
                compression,
                dict_strings,
                string_cardinality,
                seed,
            };
            let report = tokio::task::spawn_blocking(move || generate_dataset(&out, &options))
                .await
                .map_err(|e| ChunkError::Task(e.to_string()))??;
            println!(
                "generated {} batches, {} rows, {} bytes in {:.2?}",
                report.batches, report.rows, report.file_bytes, report.elapsed
            );
        }

        Commands::Split {
            inp,
            prefix,
            batches,
            compression,
            addressing,
            partition_column,
            max_inflight,
            gather_threshold,
            backend,
        } => {
            let config = backend
                .config(&prefix)
                .batches_per_partition(batches)
                .compression(compression)
                .addressing(addressing.into())
                .partition_column(partition_column)
                .max_inflight(max_inflight)
                .gather_threshold(gather_threshold)
                .build();
            config.validate()?;

            let mut dataset = IpcFileDataset::open(&inp)?;
            tracing::info!(
                "Splitting {} ({} bytes) into {}",
                inp.display(),
                dataset.file_size(),
                config.endpoint
            );
            let kv = store::connect(&config).await?;
            let report = Splitter::new(&config, kv)?.split(&mut dataset).await?;
            println!(
                "wrote {} chunks across {} partitions ({} bytes) in {:.2?}",
                report.chunks,
                report.partitions(),
                report.payload_bytes,
                report.elapsed
            );
        }

        Commands::Read {
            prefix,
            partitions,
            batches,
            pipeline,
            concurrency,
            decode_workers,
            out,
            compression,
            backend,
        } => {
            let requested = parse_partitions(&partitions, true)?;
            let mut builder = backend
                .config(&prefix)
                .batches_per_partition(batches)
                .pipeline_width(pipeline)
                .fetch_concurrency(concurrency);
            if let Some(workers) = decode_workers {
                builder = builder.decode_workers(workers);
            }
            let config = builder.build();
            config.validate()?;

            let kv = store::connect(&config).await?;
            let outcome = Reader::new(&config, kv)?.read(requested.as_deref()).await?;
            let report = &outcome.report;
            println!(
                "rows={} cols={} chunks={}/{} missing={} total={:.2?} fetch={:.2?} decode={:.2?} concat={:.2?}",
                report.rows,
                outcome.table.num_columns(),
                report.chunks_present,
                report.keys_requested,
                report.chunks_missing,
                report.total_elapsed,
                report.fetch_elapsed,
                report.decode_elapsed,
                report.concat_elapsed
            );

            if let Some(path) = out {
                let bytes = write_ipc_file(&path, &outcome.table, compression)?;
                println!("saved {} ({} bytes)", path.display(), bytes);
            }
        }

        Commands::Discover {
            prefix,
            scan_count,
            backend,
        } => {
            let config = backend.config(&prefix).scan_page_size(scan_count).build();
            config.validate()?;
            let kv = store::connect(&config).await?;
            let found = discover_partitions(kv.as_ref(), &prefix, scan_count).await?;
            let ids: Vec<String> = found.iter().map(u32::to_string).collect();
            println!("{} partitions: {}", found.len(), ids.join(","));
        }

        Commands::Purge {
            prefix,
            scan_count,
            backend,
        } => {
            let config = backend.config(&prefix).scan_page_size(scan_count).build();
            config.validate()?;
            let kv = store::connect(&config).await?;
            let removed = purge(kv.as_ref(), &prefix, scan_count).await?;
            println!("deleted {} chunks", removed);
        }

        Commands::LocalRead { inp, partitions } => {
            let wanted = parse_partitions(&partitions, false)?.unwrap_or_default();
            let started = std::time::Instant::now();
            let table = read_local(&inp, &wanted)?;
            println!(
                "rows={} cols={} total={:.2?}",
                table.num_rows(),
                table.num_columns(),
                started.elapsed()
            );
        }

        Commands::Verify { file1, file2 } => verify(&file1, &file2)?,
    }
    Ok(())
}

/// Parse "0,1,2" (or "all" when allowed, meaning discover)
fn parse_partitions(list: &str, allow_all: bool) -> Result<Option<Vec<u32>>> {
    let list = list.trim();
    if allow_all && list.eq_ignore_ascii_case("all") {
        return Ok(None);
    }

    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<u32>()
                .map_err(|_| ChunkError::Config(format!("invalid partition id '{}'", id)))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn verify(left_path: &Path, right_path: &Path) -> Result<()> {
    let left = read_ipc_file(left_path)?;
    let right = read_ipc_file(right_path)?;

    if left.schema() != right.schema() {
        return Err(ChunkError::Schema(format!(
            "schemas differ:\n  {}: {:?}\n  {}: {:?}",
            left_path.display(),
            left.schema().fields(),
            right_path.display(),
            right.schema().fields()
        )));
    }
    if left.num_rows() != right.num_rows() {
        return Err(ChunkError::Schema(format!(
            "row counts differ: {} vs {}",
            left.num_rows(),
            right.num_rows()
        )));
    }

    let differing = diff_columns(&left, &right);
    if !differing.is_empty() {
        return Err(ChunkError::Schema(format!(
            "column values differ: {}",
            differing.join(", ")
        )));
    }

    println!(
        "identical: {} rows, {} columns",
        left.num_rows(),
        left.num_columns()
    );
    Ok(())
}
