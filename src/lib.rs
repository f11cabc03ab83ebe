//! `castra` is a PBFT replication engine: given a replicated application
//! that implements [`executable::Application`], it drives agreement on a
//! total order of opaque payloads across `n = 3f+1` replicas.
//!
//! The crate's surface is organized as:
//! - [`view`] / [`ordering`]: replica identity, views, and sequence numbers.
//! - [`crypto`]: hashing, signing and the truststore lookup.
//! - [`ops`] / [`log`]: payload storage and per-slot vote accounting.
//! - [`communication`]: wire message types and the `Transport` boundary.
//! - [`consensus`]: the three-phase state machine itself.
//! - [`timeouts`]: the leader/no-op/reconnect timer subsystem.
//! - [`executable`]: the upcall/downcall surface to the embedding application.
//! - [`config`]: properties-file configuration loading.

pub mod async_runtime;
pub mod communication;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod executable;
pub mod log;
pub mod ops;
pub mod ordering;
pub mod timeouts;
pub mod view;

use std::sync::atomic::{AtomicBool, Ordering};

use error::*;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configures the init process of the library.
pub struct InitConfig {
    /// Number of worker threads used by the async runtime.
    pub async_threads: usize,
}

/// Handle to the global data initialized by [`init`].
///
/// When dropped, the data is deinitialized.
pub struct InitGuard;

/// Initializes global data: the async runtime and structured logging.
///
/// Returns `Ok(None)` if already initialized. Should be called once before
/// any replica is bootstrapped.
pub fn init(c: InitConfig) -> Result<Option<InitGuard>> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .simple_msg(ErrorKind::Config, "failed to install tracing subscriber")?;

    async_runtime::init(c.async_threads)
        .wrapped(ErrorKind::Config)?;

    Ok(Some(InitGuard))
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        INITIALIZED.store(false, Ordering::SeqCst);
    }
}
