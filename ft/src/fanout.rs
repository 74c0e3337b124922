//! Concurrent fan-out over the children of a tier
//!
//! Every child gets its own task; results are written to the slot of the
//! originating child, so the output order is the child order no matter which
//! child finishes first. The first failure aborts the remaining tasks and is
//! returned with the failing child's index attached.

use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{ExecutorError, Result};

/// Run `f` for every item concurrently and collect results in item order
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, f: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let count = items.len();
    debug!(count, "fan_out: called");

    let mut tasks = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let fut = f(index, item);
        tasks.spawn(async move { (index, fut.await) });
    }

    let mut slots: Vec<Option<R>> = (0..count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, result) =
            joined.map_err(|e| ExecutorError::Computation(format!("fan-out task did not complete: {}", e)))?;
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(e) => {
                warn!(index, error = %e, "fan_out: child failed, aborting remaining tasks");
                return Err(ExecutorError::child(index, e));
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| ExecutorError::Computation(format!("fan-out slot {} was never filled", index)))
        })
        .collect()
}
