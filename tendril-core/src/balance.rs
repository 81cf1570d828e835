//! Spread one bulk call over several accounts.
//!
//! The argument list is split into chunks no larger than the API list
//! threshold, chunk `i` is bound to account `i mod K`, and each account works
//! through its own chunks one at a time so no credential ever has two
//! requests in flight. Results are stitched back together in chunk order.

use crate::error::{CrawlError, Result};
use std::future::Future;
use std::sync::Arc;
use tendril_api::{API_LIST_THRESHOLD, ApiError};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Split `args` into order-preserving chunks of at most `size` elements.
pub fn split_into_chunks<A>(args: Vec<A>, size: usize) -> Vec<Vec<A>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(args.len().div_ceil(size));
    let mut iter = args.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

/// Account index for each of `chunks` chunks: chunk `i` goes to `i mod accounts`.
pub fn round_robin(chunks: usize, accounts: usize) -> Vec<usize> {
    if accounts == 0 {
        return Vec::new();
    }
    (0..chunks).map(|i| i % accounts).collect()
}

/// Run `operation` once per chunk of `args`, fanned out over `accounts`, and
/// concatenate the per-chunk results in chunk order.
///
/// The first fatal chunk failure aborts every other worker and is returned;
/// partial results are never handed back.
pub async fn balance<C, A, R, F, Fut>(
    operation: F,
    accounts: &[Arc<C>],
    args: Vec<A>,
    chunk_size: usize,
) -> Result<Vec<R>>
where
    C: Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(Arc<C>, Vec<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<R>, ApiError>> + Send + 'static,
{
    if accounts.is_empty() {
        return Err(CrawlError::NoAccounts);
    }
    if chunk_size == 0 {
        return Err(CrawlError::InvalidOptions(
            "chunk size must be at least 1".to_string(),
        ));
    }
    if chunk_size > API_LIST_THRESHOLD {
        return Err(CrawlError::BudgetExceeded {
            size: chunk_size,
            limit: API_LIST_THRESHOLD,
        });
    }

    let total = args.len();
    let chunks = split_into_chunks(args, chunk_size);
    let chunk_count = chunks.len();
    info!(
        "Split list of {} into {} chunks of at most {} elements over {} accounts",
        total,
        chunk_count,
        chunk_size,
        accounts.len()
    );
    if chunk_count == 0 {
        return Ok(Vec::new());
    }

    // Each account gets its own queue of (chunk index, chunk)
    let mut queues: Vec<Vec<(usize, Vec<A>)>> = accounts.iter().map(|_| Vec::new()).collect();
    let assignment = round_robin(chunk_count, accounts.len());
    for (index, (chunk, account)) in chunks.into_iter().zip(assignment).enumerate() {
        queues[account].push((index, chunk));
    }

    let operation = Arc::new(operation);
    let mut workers = JoinSet::new();

    for (worker_id, queue) in queues.into_iter().enumerate() {
        if queue.is_empty() {
            continue;
        }

        let account = accounts[worker_id].clone();
        let operation = operation.clone();

        workers.spawn(async move {
            debug!("Worker {} started with {} chunks", worker_id, queue.len());
            let mut done = Vec::with_capacity(queue.len());
            for (index, chunk) in queue {
                let result = (*operation)(account.clone(), chunk).await?;
                done.push((index, result));
            }
            debug!("Worker {} finished", worker_id);
            Ok::<_, ApiError>(done)
        });
    }

    let mut slots: Vec<Option<Vec<R>>> = (0..chunk_count).map(|_| None).collect();
    while let Some(joined) = workers.join_next().await {
        let done = match joined {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                workers.abort_all();
                return Err(err.into());
            }
            Err(err) => {
                workers.abort_all();
                return Err(CrawlError::Worker(err));
            }
        };
        for (index, result) in done {
            slots[index] = Some(result);
        }
    }

    let results: Vec<R> = slots.into_iter().flatten().flatten().collect();
    debug!("Concatenated {} results from {} chunks", results.len(), chunk_count);
    Ok(results)
}
