//! Tagged log entries describing each executed command.

use rand::Rng;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{event, Level};

/// Tag attached to entries for commands which failed.
pub const FAILURE_TAG: &str = "_com_redis_failure";

/// Tag attached to entries for commands which succeeded.
pub const SUCCESS_TAG: &str = "_com_redis_success";

/// Identifies the request a command was issued on behalf of.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    /// Creates a context with fresh random identifiers, for callers which
    /// are not already part of a trace.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        Self {
            trace_id: format!("{:032x}", rng.random::<u128>()),
            span_id: format!("{:016x}", rng.random::<u64>()),
        }
    }
}

/// The fields of one command log entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogFields {
    /// The command name, as given by the caller.
    pub method: String,
    pub err: Option<String>,
    /// The command arguments, rendered as text.
    pub bind: Vec<String>,
    pub reply: Option<String>,
    /// Elapsed time, see [format_proc_time].
    pub proc_time: Option<String>,
}

/// Receives command log entries.
pub trait TagLogger: Send + Sync {
    fn tag_info(&self, trace: &TraceContext, tag: &str, fields: LogFields);
    fn tag_error(&self, trace: &TraceContext, tag: &str, fields: LogFields);
}

/// Helper type for anything that implements the TagLogger interface.
pub type SharedLogger = Arc<dyn TagLogger>;

/// Forwards entries to `tracing` as events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl TagLogger for TracingLogger {
    fn tag_info(&self, trace: &TraceContext, tag: &str, fields: LogFields) {
        event!(
            Level::INFO,
            tag = tag,
            trace_id = %trace.trace_id,
            span_id = %trace.span_id,
            method = %fields.method,
            bind = ?fields.bind,
            reply = fields.reply.as_deref(),
            proc_time = fields.proc_time.as_deref(),
            "Command succeeded"
        );
    }

    fn tag_error(&self, trace: &TraceContext, tag: &str, fields: LogFields) {
        event!(
            Level::ERROR,
            tag = tag,
            trace_id = %trace.trace_id,
            span_id = %trace.span_id,
            method = %fields.method,
            err = fields.err.as_deref(),
            bind = ?fields.bind,
            proc_time = fields.proc_time.as_deref(),
            "Command failed"
        );
    }
}

/// Renders elapsed time as seconds with microsecond precision, like
/// `0.003421s`.
pub fn format_proc_time(elapsed: Duration) -> String {
    format!("{:.6}s", elapsed.as_secs_f64())
}
