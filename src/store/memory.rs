//! In-memory store
//!
//! BTreeMap-based store with RwLock for concurrency. Scan cursors are
//! positions in key order, so pages stay stable while no keys are inserted
//! before the cursor.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::Result;

use super::{KvStore, ScanCursor, ScanPage};

/// Process-local key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Every key in order
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Value of one key
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.data.read().get(key).cloned()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let data = self.data.read();
        Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
    }

    async fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        let data = self.data.read();
        let start = cursor.position as usize;
        let examined: Vec<&String> = data.keys().skip(start).take(count.max(1)).collect();
        let end = start + examined.len();

        let keys = examined
            .into_iter()
            .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
            .cloned()
            .collect();
        let cursor = if end >= data.len() {
            ScanCursor::START
        } else {
            ScanCursor::at(0, end as u64)
        };

        Ok(ScanPage { cursor, keys })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut data = self.data.write();
        Ok(keys.iter().filter(|k| data.remove(k.as_str()).is_some()).count() as u64)
    }
}

// =============================================================================
// Glob Matching
// =============================================================================

/// Redis-style glob: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    // Position after the last `*` and the text position it is matched up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if let Some((consumed, matched)) = match_one(pattern, p, text[t]) {
            if matched {
                p += consumed;
                t += 1;
                continue;
            }
        } else if p < pattern.len() && pattern[p] == b'*' {
            p += 1;
            backtrack = Some((p, t));
            continue;
        }

        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, t));
            }
            None => return false,
        }
    }

    pattern[p.min(pattern.len())..].iter().all(|&c| c == b'*')
}

/// Match one text byte against the pattern element at `p`.
///
/// Returns the element length and whether it matched, or `None` at a `*` or
/// at the end of the pattern.
fn match_one(pattern: &[u8], p: usize, c: u8) -> Option<(usize, bool)> {
    match *pattern.get(p)? {
        b'*' => None,
        b'?' => Some((1, true)),
        b'\\' if p + 1 < pattern.len() => Some((2, pattern[p + 1] == c)),
        b'[' => match match_class(pattern, p, c) {
            Some(found) => Some(found),
            None => Some((1, c == b'[')),
        },
        literal => Some((1, literal == c)),
    }
}

/// `[...]` class starting at `p`; `None` when the class is never closed
fn match_class(pattern: &[u8], p: usize, c: u8) -> Option<(usize, bool)> {
    let mut i = p + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        let current = *pattern.get(i)?;
        match current {
            b']' => break,
            b'\\' => {
                let escaped = *pattern.get(i + 1)?;
                matched |= escaped == c;
                i += 2;
            }
            low if pattern.get(i + 1) == Some(&b'-') && pattern.get(i + 2).map_or(false, |&h| h != b']') => {
                let high = pattern[i + 2];
                let (low, high) = if low <= high { (low, high) } else { (high, low) };
                matched |= (low..=high).contains(&c);
                i += 3;
            }
            literal => {
                matched |= literal == c;
                i += 1;
            }
        }
    }

    Some((i + 1 - p, matched != negate))
}
