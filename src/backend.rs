//! The interface for identifying and connecting to cache backends.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to dial {address}")]
    Dial {
        address: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("Backend rejected AUTH")]
    Auth(#[source] redis::RedisError),

    #[error("Backend rejected SELECT {db}")]
    Select {
        db: i64,
        #[source]
        source: redis::RedisError,
    },

    #[error("Ping failed")]
    Ping(#[source] redis::RedisError),

    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl Error {
    #[cfg(feature = "probes")]
    // Convert to a static string for USDT probes.
    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            Error::Dial { .. } => "Dial",
            Error::Auth(_) => "Auth",
            Error::Select { .. } => "Select",
            Error::Ping(_) => "Ping",
            Error::Io(_) => "Io",
            Error::Other(_) => "Other",
        }
    }
}

/// A single cache server, addressed as "host:port".
#[derive(Clone, PartialEq, Eq, Debug, Hash, Ord, PartialOrd)]
pub struct Backend {
    pub address: Arc<str>,
}

impl Backend {
    pub fn new(address: impl Into<Arc<str>>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.address.fmt(f)
    }
}

/// Interface for raw connections.
pub trait Connection: Send + 'static {}

impl<T> Connection for T where T: Send + 'static {}

/// Describes how a connection to a Backend should be constructed.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Creates a connection to a backend.
    ///
    /// Any setup the connection needs before it can serve commands
    /// (credentials, database selection) belongs here. A connection which
    /// fails setup must not be returned.
    async fn connect(&self, backend: &Backend) -> Result<Self::Connection, Error>;

    /// Determines if an idle connection is still usable.
    ///
    /// The pool calls this on every idle connection before handing it out,
    /// bounded by [crate::policy::Policy::health_check_timeout]. Connections
    /// which fail are closed and never reach the caller.
    ///
    /// By default this method does nothing.
    async fn is_valid(&self, _conn: &mut Self::Connection) -> Result<(), Error> {
        Ok(())
    }
}

pub type SharedConnector<Conn> = Arc<dyn Connector<Connection = Conn>>;
