//! Concurrency helpers shared by the cycle phases
//!
//! - [`run_bounded`]: processes independent items on a bounded set of tasks
//! - [`Throttle`]: enforces a minimum spacing between external calls,
//!   independently of how many workers are running
//! - [`with_timeout`]: bounds an external call so it can never hang a phase

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use core_kernel::PortError;

/// Runs `work` over labelled items with at most `concurrency` in flight
///
/// Results come back in input order. An item whose task panicked yields
/// `Err` with a description instead of taking the batch down.
pub async fn run_bounded<I, T, F, Fut>(
    items: Vec<(String, I)>,
    concurrency: usize,
    work: F,
) -> Vec<(String, Result<T, String>)>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let work = Arc::new(work);
    let mut labels = Vec::with_capacity(items.len());
    let mut set = JoinSet::new();

    for (index, (label, item)) in items.into_iter().enumerate() {
        labels.push(label);
        let semaphore = Arc::clone(&semaphore);
        let work = Arc::clone(&work);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            (index, work(item).await)
        });
    }

    let mut results: Vec<Option<T>> = labels.iter().map(|_| None).collect();
    let mut panics = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, output)) => results[index] = Some(output),
            Err(e) => panics.push(e.to_string()),
        }
    }

    let reason = if panics.is_empty() {
        "worker task did not complete".to_string()
    } else {
        format!("worker task aborted: {}", panics.join("; "))
    };

    labels
        .into_iter()
        .zip(results)
        .map(|(label, output)| (label, output.ok_or_else(|| reason.clone())))
        .collect()
}

/// Minimum spacing between calls, shared by all workers
#[derive(Debug)]
pub struct Throttle {
    spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits for the next free slot and reserves it
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.spacing);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

/// Fails with `PortError::Timeout` once `limit` elapses
pub async fn with_timeout<T, Fut>(operation: &str, limit: Duration, call: Fut) -> Result<T, PortError>
where
    Fut: Future<Output = Result<T, PortError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PortError::timeout(operation, limit)),
    }
}
