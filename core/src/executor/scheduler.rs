use std::collections::HashMap;
use std::future::Future;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;

use super::types::TaskResult;

/// Runs one wave: every task id gets a future, at most `max_concurrency` of
/// them past the semaphore at a time. Returns once every task is terminal.
pub async fn execute_wave<F, Fut>(
    task_ids: &[String],
    max_concurrency: usize,
    executor_fn: F,
) -> HashMap<String, TaskResult>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = TaskResult>,
{
    let sem = Semaphore::new(max_concurrency.max(1));
    let mut futs: FuturesUnordered<_> = FuturesUnordered::new();

    for id in task_ids {
        let sem = &sem;
        let fut = executor_fn(id.clone());
        futs.push(async move {
            // The semaphore lives for the whole wave and is never closed.
            let _permit = sem.acquire().await.ok();
            fut.await
        });
    }

    let mut results: HashMap<String, TaskResult> = HashMap::with_capacity(task_ids.len());
    while let Some(task_result) = futs.next().await {
        results.insert(task_result.task_id.clone(), task_result);
    }
    results
}
