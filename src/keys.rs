//! Chunk Key Scheme
//!
//! The single place that encodes the addressing contract between a
//! (partition, batch-in-partition) address and its key string.
//!
//! ## Key Format
//! ```text
//! {prefix}:{part=PPPPP}:batch=BBBBB
//!          └────┬─────┘
//!          routing tag (cluster hash tag)
//! ```
//!
//! Both ids are rendered as 5-digit zero-padded decimals so that lexical key
//! order matches numeric order. The brace-delimited segment is the Redis
//! hash tag: every batch of one partition maps to the same cluster slot.

use std::fmt;

use crate::error::{ChunkError, Result};

/// Digits used for partition and batch ids
pub const ID_WIDTH: usize = 5;

/// Largest id that fits in `ID_WIDTH` digits
pub const MAX_ID: u32 = 99_999;

const PART_OPEN: &str = "{part=";
const BATCH_SEP: &str = "}:batch=";

/// Address of one chunk inside a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkAddress {
    pub partition: u32,
    pub batch: u32,
}

impl ChunkAddress {
    pub fn new(partition: u32, batch: u32) -> Self {
        Self { partition, batch }
    }
}

impl fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition {} batch {}", self.partition, self.batch)
    }
}

/// Build the key for a chunk address.
///
/// Fails with `ChunkError::Addressing` instead of widening the field, since a
/// truncated or widened id would break the fixed-width ordering and could
/// collide with another address.
pub fn chunk_key(prefix: &str, address: ChunkAddress) -> Result<String> {
    check_id("partition", address.partition)?;
    check_id("batch", address.batch)?;
    Ok(format!(
        "{prefix}:{{part={:05}}}:batch={:05}",
        address.partition, address.batch
    ))
}

/// Keys for batches `0..batches` of one partition, in batch order
pub fn partition_keys(prefix: &str, partition: u32, batches: u32) -> Result<Vec<String>> {
    (0..batches)
        .map(|batch| chunk_key(prefix, ChunkAddress::new(partition, batch)))
        .collect()
}

/// Parse a key produced by `chunk_key` under `prefix` back into its address.
///
/// Returns `None` for keys outside the namespace or not in the scheme's shape.
pub fn parse_chunk_key(prefix: &str, key: &str) -> Option<ChunkAddress> {
    let rest = key.strip_prefix(prefix)?.strip_prefix(':')?;
    let rest = rest.strip_prefix(PART_OPEN)?;
    let (partition, batch) = rest.split_once(BATCH_SEP)?;
    Some(ChunkAddress {
        partition: parse_id(partition)?,
        batch: parse_id(batch)?,
    })
}

/// Glob pattern matching every chunk key of a namespace.
///
/// Glob metacharacters inside the prefix are escaped so a prefix such as
/// `bench[1]` only matches itself.
pub fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 24);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":{part=*}:batch=*");
    pattern
}

fn check_id(field: &str, id: u32) -> Result<()> {
    if id > MAX_ID {
        return Err(ChunkError::Addressing(format!(
            "{field} id {id} exceeds the {ID_WIDTH}-digit key field (max {MAX_ID})"
        )));
    }
    Ok(())
}

fn parse_id(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_foreign_keys() {
        assert_eq!(parse_chunk_key("demo", "other:{part=00001}:batch=00002"), None);
        assert_eq!(parse_chunk_key("demo", "demo:{part=x}:batch=00002"), None);
        assert_eq!(parse_chunk_key("demo", "demo:{part=00001}:batch="), None);
        assert_eq!(parse_chunk_key("demo", "demo:{part=00001}:batch=+1"), None);
    }

    #[test]
    fn test_scan_pattern_escapes_prefix() {
        assert_eq!(scan_pattern("a*b"), "a\\*b:{part=*}:batch=*");
        assert_eq!(scan_pattern("demo:v1"), "demo:v1:{part=*}:batch=*");
    }
}
