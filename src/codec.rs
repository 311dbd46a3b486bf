//! Chunk codec
//!
//! Serializes one record batch into a self-describing Arrow IPC stream and
//! back. Compression is chosen per codec instance and applied to every batch
//! it encodes; decoding reads whatever compression the stream declares.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::{IpcWriteOptions, StreamWriter};
use arrow::ipc::CompressionType;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;

use crate::error::{ChunkError, Result};

/// Body compression for encoded chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain IPC buffers
    None,

    /// LZ4 frame (fast)
    Lz4,

    /// Zstandard (high ratio)
    #[default]
    Zstd,
}

impl Compression {
    /// IPC write options carrying this compression
    pub fn write_options(self) -> Result<IpcWriteOptions> {
        let kind = match self {
            Compression::None => None,
            Compression::Lz4 => Some(CompressionType::LZ4_FRAME),
            Compression::Zstd => Some(CompressionType::ZSTD),
        };
        Ok(IpcWriteOptions::default().try_with_compression(kind)?)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "uncompressed",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uncompressed" | "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(ChunkError::Config(format!(
                "unknown compression '{}' (expected zstd, lz4 or uncompressed)",
                other
            ))),
        }
    }
}

/// Arrow IPC stream codec
#[derive(Debug, Clone)]
pub struct IpcCodec {
    compression: Compression,
    options: IpcWriteOptions,
}

impl IpcCodec {
    pub fn new(compression: Compression) -> Result<Self> {
        Ok(Self {
            compression,
            options: compression.write_options()?,
        })
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Encode one batch as a complete IPC stream (schema + batch + EOS)
    pub fn encode(&self, batch: &RecordBatch) -> Result<Bytes> {
        let mut writer =
            StreamWriter::try_new_with_options(Vec::new(), &batch.schema(), self.options.clone())?;
        writer.write(batch)?;
        writer.finish()?;
        Ok(Bytes::from(writer.into_inner()?))
    }

    /// Decode every batch contained in an IPC stream payload
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<RecordBatch>> {
        decode_stream(payload)
    }
}

/// Decode an IPC stream payload without a codec instance
pub fn decode_stream(payload: &[u8]) -> Result<Vec<RecordBatch>> {
    let reader = StreamReader::try_new(Cursor::new(payload), None)?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}
