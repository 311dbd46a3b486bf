//! Partition Discovery
//!
//! Enumerates the partitions present in a namespace by walking a
//! cursor-based scan of the chunk keys until the backend hands back the
//! start cursor. Keys may repeat across pages and pages may be empty, so ids
//! are collected into a set and the walk never stops early.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::keys::{parse_chunk_key, scan_pattern};
use crate::store::{KvStore, ScanCursor};

/// Sorted, duplicate-free partition ids present under `prefix`
pub async fn discover_partitions(
    store: &dyn KvStore,
    prefix: &str,
    page_size: usize,
) -> Result<Vec<u32>> {
    let mut partitions = BTreeSet::new();

    let pages = walk(store, prefix, page_size, |key| match parse_chunk_key(prefix, key) {
        Some(address) => {
            partitions.insert(address.partition);
        }
        None => tracing::debug!("Skipping key outside the chunk scheme: {}", key),
    })
    .await?;

    tracing::info!(
        "Discovered {} partitions under {} ({} scan pages)",
        partitions.len(),
        prefix,
        pages
    );
    Ok(partitions.into_iter().collect())
}

/// Delete every chunk stored under `prefix`, returning how many were removed
pub async fn purge(store: &dyn KvStore, prefix: &str, page_size: usize) -> Result<u64> {
    let mut keys = BTreeSet::new();

    walk(store, prefix, page_size, |key| {
        if parse_chunk_key(prefix, key).is_some() {
            keys.insert(key.to_string());
        }
    })
    .await?;

    let keys: Vec<String> = keys.into_iter().collect();
    let mut removed = 0u64;
    for group in keys.chunks(page_size.max(1)) {
        removed += store.delete(group).await?;
    }

    tracing::info!("Purged {} chunks under {}", removed, prefix);
    Ok(removed)
}

/// Visit every key the scan of `prefix`'s namespace yields, returning the
/// number of pages fetched
async fn walk<F>(store: &dyn KvStore, prefix: &str, page_size: usize, mut visit: F) -> Result<usize>
where
    F: FnMut(&str),
{
    let pattern = scan_pattern(prefix);
    let mut cursor = ScanCursor::START;
    let mut pages = 0;

    loop {
        let page = store.scan(cursor, &pattern, page_size.max(1)).await?;
        pages += 1;
        for key in &page.keys {
            visit(key);
        }

        cursor = page.cursor;
        if cursor.is_start() {
            return Ok(pages);
        }
    }
}
