//! Run one task per target credential and wait for all of them.
//!
//! Every task runs inside a `JoinSet`, so nothing outlives the call: dropping
//! the returned future aborts the remaining tasks. Each task yields its own
//! result and the joining routine merges them after the barrier, in target
//! order.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use keel_core::{merge_errors, ClientFactory, KeelError, KeelResult, TargetClient};
use metrics::counter;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Result of one target's task.
#[derive(Debug)]
pub struct TargetOutcome<T> {
    /// Index of the credential in the request.
    pub target: usize,
    pub result: KeelResult<T>,
}

fn panic_reason(p: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

/// Spawn `task(index, credential)` for every credential concurrently.
///
/// Outcomes come back sorted by target index, one per credential. A panic in
/// a task is reported as `KeelError::TargetTask` for that target.
pub async fn each_target<T, F, Fut>(targets: &[String], task: F) -> Vec<TargetOutcome<T>>
where
    T: Send + 'static,
    F: Fn(usize, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = KeelResult<T>> + Send + 'static,
{
    counter!("fanout_calls", 1u64);
    counter!("fanout_targets_total", targets.len() as u64);
    let task = Arc::new(task);
    let mut set = JoinSet::new();
    for (idx, cred) in targets.iter().enumerate() {
        let task = task.clone();
        let cred = cred.clone();
        set.spawn(async move {
            let res = AssertUnwindSafe(task(idx, cred))
                .catch_unwind()
                .await
                .unwrap_or_else(|p| Err(KeelError::TargetTask { target: idx, reason: panic_reason(p) }));
            (idx, res)
        });
    }

    let mut slots: Vec<Option<KeelResult<T>>> = (0..targets.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, res)) => slots[idx] = Some(res),
            Err(e) => warn!(error = %e, "fan-out task did not complete"),
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            let result = slot.unwrap_or_else(|| Err(KeelError::TargetTask { target: idx, reason: "task cancelled".into() }));
            if let Err(e) = &result {
                counter!("fanout_target_err", 1u64);
                debug!(cluster = idx, error = %e, "target failed");
            }
            TargetOutcome { target: idx, result }
        })
        .collect()
}

/// Like [`each_target`], but first builds a fresh client from the credential.
/// A construction failure becomes `KeelError::ClientConstruction` and skips the
/// task for that target.
pub async fn fan_out<T, F, Fut>(factory: Arc<dyn ClientFactory>, targets: &[String], task: F) -> Vec<TargetOutcome<T>>
where
    T: Send + 'static,
    F: Fn(usize, Arc<dyn TargetClient>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = KeelResult<T>> + Send + 'static,
{
    let task = Arc::new(task);
    each_target(targets, move |idx, cred| {
        let factory = factory.clone();
        let task = task.clone();
        async move {
            let client = match factory.connect(&cred).await {
                Ok(c) => c,
                Err(e) => return Err(KeelError::ClientConstruction { target: idx, reason: format!("{:#}", e) }),
            };
            task(idx, client).await
        }
    })
    .await
}

/// Merge the failures of a fan-out into one aggregate.
pub fn merged_failure<T>(outcomes: Vec<TargetOutcome<T>>) -> Option<KeelError> {
    merge_errors(outcomes.into_iter().filter_map(|o| o.result.err()).collect())
}
