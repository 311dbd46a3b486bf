//! Bounded parallel map
//!
//! Two order-preserving building blocks used by the read path:
//! - `map_bounded`: many async operations on the calling task, at most
//!   `limit` of them past the semaphore at once
//! - `map_blocking`: CPU-bound work on tokio's blocking pool, at most
//!   `limit` jobs running at once
//!
//! Results land in pre-sized slots keyed by input index, so completion order
//! never leaks into output order.

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{ChunkError, Result};

/// Run `f` over `items` with at most `limit` futures admitted concurrently.
///
/// Output `i` corresponds to input `i`. The first error cancels the remaining
/// futures and is returned.
pub async fn map_bounded<I, T, F, Fut>(items: I, limit: usize, mut f: F) -> Result<Vec<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let permits = Semaphore::new(limit.max(1));
    let permits = &permits;
    let mut running = FuturesUnordered::new();

    for (index, item) in items.into_iter().enumerate() {
        let operation = f(item);
        running.push(async move {
            let _permit = permits
                .acquire()
                .await
                .map_err(|e| ChunkError::Task(format!("semaphore closed: {}", e)))?;
            operation.await.map(|value| (index, value))
        });
    }

    let mut slots: Vec<Option<T>> = Vec::with_capacity(running.len());
    slots.resize_with(running.len(), || None);

    while let Some(result) = running.next().await {
        let (index, value) = result?;
        slots[index] = Some(value);
    }

    collect_slots(slots)
}

/// Run the blocking function `f` over `items` on at most `limit` worker
/// threads at a time.
///
/// Every job is allowed to finish; the error of the lowest failing index is
/// returned.
pub async fn map_blocking<I, T, F>(items: Vec<I>, limit: usize, f: F) -> Result<Vec<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Result<T> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut jobs = JoinSet::new();
    let len = items.len();

    for (index, item) in items.into_iter().enumerate() {
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|e| ChunkError::Task(format!("semaphore closed: {}", e)))?;
        let f = Arc::clone(&f);
        jobs.spawn_blocking(move || {
            let _permit = permit;
            (index, f(item))
        });
    }

    let mut slots: Vec<Option<T>> = Vec::with_capacity(len);
    slots.resize_with(len, || None);
    let mut first_error: Option<(usize, ChunkError)> = None;

    while let Some(joined) = jobs.join_next().await {
        let (index, result) = joined.map_err(|e| ChunkError::Task(e.to_string()))?;
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(err) => {
                if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                    first_error = Some((index, err));
                }
            }
        }
    }

    if let Some((_, err)) = first_error {
        return Err(err);
    }
    collect_slots(slots)
}

fn collect_slots<T>(slots: Vec<Option<T>>) -> Result<Vec<T>> {
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| ChunkError::Task(format!("no result for slot {}", index)))
        })
        .collect()
}
