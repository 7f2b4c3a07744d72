//! Cooperative bounded-concurrency batch runner.
//!
//! Workers are plain futures polled together by `join_all` on the caller's task; they share
//! one atomic claim cursor, so every index is processed exactly once.

use futures_util::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const MAX_CONCURRENT_CHUNKS: usize = 3;

/// Run `work` over every item with at most `concurrency` invocations in flight.
///
/// Returns one result per item, in input order. A failing item never stops the batch.
/// `progress(completed, total)` is called after each completion, in completion order.
pub async fn run_all<'a, I, T, E, F, Fut, P>(
    items: &'a [I],
    concurrency: usize,
    work: F,
    progress: P,
) -> Vec<Result<T, E>>
where
    F: Fn(&'a I, usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(usize, usize),
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let cursor = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let (cursor, completed, work, progress) = (&cursor, &completed, &work, &progress);

    let workers = (0..concurrency.clamp(1, total)).map(|_| async move {
        let mut done = Vec::new();
        loop {
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            if index >= total {
                break;
            }
            let result = work(&items[index], index).await;
            done.push((index, result));
            let n = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(n, total);
        }
        done
    });

    let mut slots: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();
    for (index, result) in join_all(workers).await.into_iter().flatten() {
        slots[index] = Some(result);
    }
    slots.into_iter().flatten().collect()
}
