//! Runs commands against named pools, logging each one.

use crate::claim::Handle;
use crate::command::{bind, reply_to_string, Arg};
use crate::connectors::redis::RedisConnection;
use crate::factory::{self, PoolFactory};
use crate::log::{
    format_proc_time, LogFields, SharedLogger, TraceContext, FAILURE_TAG, SUCCESS_TAG,
};
use crate::pool;

use redis::{RedisError, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{event, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to get pool")]
    Factory(#[from] factory::Error),

    #[error("Failed to claim connection")]
    Claim(#[from] pool::Error),

    #[error("Command failed")]
    Execution(#[from] RedisError),
}

// Renders an error with all of its causes, outermost first.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        out.push_str(": ");
        out.push_str(&err.to_string());
        source = err.source();
    }
    out
}

// Whether the connection itself is unusable after this error, as opposed to
// the server rejecting one command.
fn is_transport_error(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
}

/// Executes commands and reports each one to a [crate::log::TagLogger].
///
/// Every call produces exactly one entry: [SUCCESS_TAG] at info level with
/// the reply, or [FAILURE_TAG] at error level with the error. Results are
/// returned unchanged, and nothing is retried.
pub struct LoggedExecutor {
    factory: Arc<PoolFactory>,
    logger: SharedLogger,
}

impl LoggedExecutor {
    pub fn new(factory: Arc<PoolFactory>, logger: SharedLogger) -> Self {
        Self { factory, logger }
    }

    pub fn factory(&self) -> &PoolFactory {
        &self.factory
    }

    /// Runs `command` on a connection borrowed from the pool named `name`.
    ///
    /// Timing covers borrowing the connection as well as the round trip. The
    /// connection goes back to the pool afterwards, unless the command failed
    /// in a way that leaves the connection unusable.
    pub async fn execute(
        &self,
        trace: &TraceContext,
        name: &str,
        command: &str,
        args: &[Arg],
    ) -> Result<Value, Error> {
        let pool = match self.factory.get_or_create_pool(name) {
            Ok(pool) => pool,
            Err(err) => {
                self.logger.tag_error(
                    trace,
                    FAILURE_TAG,
                    LogFields {
                        method: command.to_string(),
                        err: Some(format!("RedisConnFactory_error:{name}")),
                        bind: bind(args),
                        ..Default::default()
                    },
                );
                return Err(err.into());
            }
        };

        let start = Instant::now();
        let mut conn = match pool.claim().await {
            Ok(conn) => conn,
            Err(err) => {
                let err = Error::from(err);
                self.log_failure(trace, command, args, &err, start);
                return Err(err);
            }
        };
        self.run(trace, &mut conn, command, args, start).await
    }

    /// Runs `command` on a connection the caller already holds.
    pub async fn execute_on(
        &self,
        trace: &TraceContext,
        conn: &mut Handle<RedisConnection>,
        command: &str,
        args: &[Arg],
    ) -> Result<Value, Error> {
        self.run(trace, conn, command, args, Instant::now()).await
    }

    async fn run(
        &self,
        trace: &TraceContext,
        conn: &mut Handle<RedisConnection>,
        command: &str,
        args: &[Arg],
        start: Instant,
    ) -> Result<Value, Error> {
        match conn.query(command, args).await {
            Ok(reply) => {
                self.logger.tag_info(
                    trace,
                    SUCCESS_TAG,
                    LogFields {
                        method: command.to_string(),
                        bind: bind(args),
                        reply: Some(reply_to_string(&reply)),
                        proc_time: Some(format_proc_time(start.elapsed())),
                        ..Default::default()
                    },
                );
                Ok(reply)
            }
            Err(err) => {
                if is_transport_error(&err) {
                    event!(
                        Level::DEBUG,
                        address = conn.address(),
                        "Closing connection after transport error"
                    );
                    conn.mark_broken();
                }
                let err = Error::from(err);
                self.log_failure(trace, command, args, &err, start);
                Err(err)
            }
        }
    }

    fn log_failure(
        &self,
        trace: &TraceContext,
        command: &str,
        args: &[Arg],
        err: &Error,
        start: Instant,
    ) {
        self.logger.tag_error(
            trace,
            FAILURE_TAG,
            LogFields {
                method: command.to_string(),
                err: Some(error_chain(err)),
                bind: bind(args),
                proc_time: Some(format_proc_time(start.elapsed())),
                ..Default::default()
            },
        );
    }
}
