//! Thin shim over the single async runtime backing the engine.
//!
//! The teacher supports multiple pluggable runtimes behind a feature flag;
//! this crate fixes `tokio` as the only backend, so the shim exists purely
//! to keep call sites (`rt::spawn`, `rt::init`) stable if that ever changes.

use std::future::Future;

pub type JoinHandle<T> = tokio::task::JoinHandle<T>;

pub type Runtime = tokio::runtime::Runtime;

/// Builds a multi-threaded runtime with `num_threads` worker threads.
pub fn init(num_threads: usize) -> Result<Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_threads)
        .thread_name("castra-worker")
        .enable_all()
        .build()
}

/// Spawns `future` onto the ambient runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}
