//! Implementation of [Connector] for Redis-protocol cache servers.

use crate::backend::{self, Backend, Connector, Error};
use crate::command::Arg;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, RedisResult, Value};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{event, Level};

/// Deadlines applied to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Bounds dialing the server.
    pub connect: Duration,
    /// Bounds waiting for a reply.
    pub read: Duration,
    /// Bounds sending a command.
    pub write: Duration,
}

impl Timeouts {
    /// The deadline for one round trip.
    ///
    /// The multiplexed connection does not separate writing a command from
    /// reading its reply, so both budgets apply to the whole exchange.
    pub fn command(&self) -> Duration {
        self.read + self.write
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(50),
            read: Duration::from_millis(100),
            write: Duration::from_millis(100),
        }
    }
}

/// An established, authenticated connection to one server.
pub struct RedisConnection {
    conn: MultiplexedConnection,
    command_timeout: Duration,
    address: Arc<str>,
}

impl RedisConnection {
    /// The "host:port" this connection talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends `command` with `args`, waiting at most the command timeout for
    /// the reply.
    pub async fn query(&mut self, command: &str, args: &[Arg]) -> RedisResult<Value> {
        let mut cmd = redis::cmd(command);
        for arg in args {
            cmd.arg(arg);
        }
        self.query_cmd(&cmd).await
    }

    pub async fn query_cmd(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        match timeout(self.command_timeout, cmd.query_async(&mut self.conn)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("command").into()),
        }
    }
}

fn timed_out(what: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{what} timed out"))
}

/// Dials servers and prepares connections for use.
///
/// Every new connection is authenticated (if a password is set) and switched
/// to its database (if not the default) before it is handed out.
pub struct RedisConnector {
    timeouts: Timeouts,
    password: Option<String>,
    db: i64,
}

impl RedisConnector {
    pub fn new(timeouts: Timeouts, password: Option<String>, db: i64) -> Self {
        Self {
            timeouts,
            password,
            db,
        }
    }

    async fn dial(&self, backend: &Backend) -> Result<MultiplexedConnection, Error> {
        let dial_error = |source: redis::RedisError| Error::Dial {
            address: backend.address.to_string(),
            source,
        };
        let client = redis::Client::open(format!("redis://{}/", backend.address))
            .map_err(dial_error)?;
        match timeout(
            self.timeouts.connect,
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(result) => result.map_err(dial_error),
            Err(_) => Err(dial_error(timed_out("connect").into())),
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self, backend: &Backend) -> Result<Self::Connection, backend::Error> {
        let mut conn = RedisConnection {
            conn: self.dial(backend).await?,
            command_timeout: self.timeouts.command(),
            address: backend.address.clone(),
        };

        // A connection that fails setup is dropped here, which closes it.
        if let Some(password) = &self.password {
            conn.query("AUTH", &[Arg::from(password.as_str())])
                .await
                .map_err(Error::Auth)?;
        }
        if self.db != 0 {
            conn.query("SELECT", &[Arg::from(self.db)])
                .await
                .map_err(|source| Error::Select {
                    db: self.db,
                    source,
                })?;
        }

        event!(Level::TRACE, backend = %backend, db = self.db, "Connection ready");
        Ok(conn)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), backend::Error> {
        conn.query("PING", &[]).await.map_err(Error::Ping)?;
        Ok(())
    }
}
