//! kvpool manages named connection pools to key-value cache backends.
//!
//! It uses the following terminology:
//! * A pool name is the logical name callers use, like `"default"` or
//!   `"session"`. Each name maps to one [config::BackendConfig].
//! * Backends are the cache servers listed for a name. A pool talks to a
//!   single backend, picked at random when the pool is created.
//!
//! # Usage
//!
//! * Load a [config::ConfigRegistry] once at startup.
//! * Build a [factory::PoolFactory] from it, along with a
//!   [registry::PoolRegistry] and a [selector::HostSelector].
//! * Run commands through an [executor::LoggedExecutor], which resolves
//!   pools by name and reports each command to a [log::TagLogger].
//!
//! Pools are created lazily on first use and never dial until a connection
//! is claimed. A claimed connection is a [claim::Handle], which returns to
//! its pool when dropped.
//!
//! # DTrace probes
//!
//! kvpool contains a number of DTrace USDT probes, which fire as a pool
//! manages its connections. The full list of probes is:
//!
//! - `claim-start`: Fires before attempting to take a claim from the pool.
//! - `claim-done`: Fires before returning a successful claim to the client.
//! - `claim-failed`: Fires on failure to take a claim from the pool.
//! - `connect-start`: Fires before attempting a connection to a backend.
//! - `connect-done`: Fires after successfully connecting to a backend.
//! - `connect-failed`: Fires after failing to connect to a backend.
//! - `health-check-start`: Fires before probing an idle connection.
//! - `health-check-done`: Fires when an idle connection passes its probe.
//! - `health-check-failed`: Fires when an idle connection fails its probe
//!   and is discarded.
//! - `handle-returned`: Fires when a handle is returned to the pool, after it
//!   is dropped.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. Probes are zero-cost unless they are explicitly enabled,
//! by tracing the program with the `dtrace(1)` command-line tool.
//!
//! Registering the probes is technically fallible, so `pool::Pool::new`
//! returns a `Result` whose `Err` variant still gives access to the pool.

// Public API
pub mod backend;
pub mod claim;
pub mod command;
pub mod config;
pub mod executor;
pub mod factory;
pub mod log;
pub mod policy;
pub mod pool;
pub mod registry;
pub mod selector;

// Necessary for implementation
mod idle;
#[cfg(test)]
mod test_utils;

pub use idle::Stats;

// Default implementations of generic interfaces
pub mod connectors;

use std::sync::atomic::{AtomicU64, Ordering};

/// Uniquely identifies a claim
#[derive(Copy, Clone, Debug)]
pub(crate) struct ClaimId(pub u64);

impl ClaimId {
    fn new() -> Self {
        static NEXT_CLAIM_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_CLAIM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

/// USDT probes for tracing how kvpool makes connections and hands out claims.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "kvpool")]
mod probes {
    /// Fires right before attempting to acquire a claim from the pool.
    fn claim__start(pool: &str, claim_id: u64) {}

    /// Fires when a claim is successfully acquired from the pool.
    fn claim__done(pool: &str, claim_id: u64) {}

    /// Fires when we _fail_ to acquire a claim from the pool, with a string
    /// identifying the reason.
    fn claim__failed(pool: &str, claim_id: u64, reason: &str) {}

    /// Fires right before attempting to make a connection, with the address
    /// we're connecting to.
    fn connect__start(pool: &str, claim_id: u64, addr: &str) {}

    /// Fires just after successfully making a connection.
    fn connect__done(pool: &str, claim_id: u64, addr: &str) {}

    /// Fires just after failing to make a connection, with a string
    /// identifying the reason.
    fn connect__failed(pool: &str, claim_id: u64, addr: &str, reason: &str) {}

    /// Fires just before we probe an idle connection.
    fn health__check__start(pool: &str, claim_id: u64) {}

    /// Fires after an idle connection passes its probe.
    fn health__check__done(pool: &str, claim_id: u64) {}

    /// Fires after an idle connection fails its probe.
    fn health__check__failed(pool: &str, claim_id: u64, reason: &str) {}

    /// Fires when a handle is returned to the pool, usually when it is dropped.
    fn handle__returned(pool: &str) {}
}
