//! A fixed-size pool of in-flight futures.
//!
//! There are no threads or tasks here: "workers" are slots in a
//! [`buffer_unordered`](futures::StreamExt::buffer_unordered) buffer, polled by
//! whoever drives the returned stream.

use futures::{Stream, StreamExt};
use std::future::Future;

/// Number of concurrent operations when nothing else is configured.
pub const DEFAULT_WORKERS: usize = 10;

/// Runs a handler over every item of a stream with at most `workers` handler
/// futures in flight at once.
///
/// # Examples
///
/// ```
/// use futures::{StreamExt, stream};
/// use offload_asyncutils::WorkerPool;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = WorkerPool::new(2);
/// let mut results = pool.drain(stream::iter(1..=4), |n| async move { n * 10 }).await;
/// results.sort();
/// assert_eq!(results, [10, 20, 30, 40]);
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
}
impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
impl WorkerPool {
    /// A pool of `workers` slots. Zero is treated as one.
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stream handler results in completion order (not input order).
    ///
    /// New items are only pulled from `input` when a slot frees up, so a slow
    /// handler applies backpressure to the source.
    pub fn process<'a, S, F, Fut>(self, input: S, mut handler: F) -> impl Stream<Item = Fut::Output> + Send + 'a
    where
        S: Stream + Send + 'a,
        F: FnMut(S::Item) -> Fut + Send + 'a,
        Fut: Future + Send + 'a,
        Fut::Output: Send,
    {
        input.map(move |item| handler(item)).buffer_unordered(self.workers)
    }

    /// Like [`process()`](Self::process), but waits for every handler to
    /// finish before returning all results at once.
    pub async fn drain<'a, S, F, Fut>(&self, input: S, handler: F) -> Vec<Fut::Output>
    where
        S: Stream + Send + 'a,
        F: FnMut(S::Item) -> Fut + Send + 'a,
        Fut: Future + Send + 'a,
        Fut::Output: Send,
    {
        self.process(input, handler).collect().await
    }
}
