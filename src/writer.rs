//! Retrying Writer
//!
//! One chunk write (`SET`) wrapped in the retry policy. Writes are idempotent:
//! repeating a `SET` of the same payload under the same key is harmless.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{ChunkError, Result};
use crate::retry::{retry_with_backoff, Exhausted, RetryPolicy};
use crate::store::KvStore;

/// Writes chunks with bounded retry
#[derive(Clone)]
pub struct RetryingWriter {
    store: Arc<dyn KvStore>,
    policy: RetryPolicy,
}

impl RetryingWriter {
    pub fn new(store: Arc<dyn KvStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write `payload` under `key`
    ///
    /// After the last failed attempt the cause is returned as
    /// `ChunkError::Write`. Connection failures are returned as they are.
    pub async fn write(&self, key: &str, payload: Bytes) -> Result<()> {
        let store = &self.store;
        retry_with_backoff(&self.policy, key, move || store.set(key, payload.clone()))
            .await
            .map_err(|Exhausted { attempts, last }| match last {
                err @ ChunkError::Connection { .. } => err,
                err => ChunkError::Write {
                    key: key.to_string(),
                    attempts,
                    source: Box::new(err),
                },
            })
    }
}
