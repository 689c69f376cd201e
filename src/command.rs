//! Command arguments and reply formatting.

use redis::{RedisWrite, ToRedisArgs, Value};

/// Substituted when a reply has no sensible string form.
pub const REPLY_PLACEHOLDER: &str = "<non-string reply>";

/// A single argument to a cache command.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Int(n)
    }
}

impl From<i32> for Arg {
    fn from(n: i32) -> Self {
        Arg::Int(n.into())
    }
}

impl From<f64> for Arg {
    fn from(n: f64) -> Self {
        Arg::Float(n)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(bytes: Vec<u8>) -> Self {
        Arg::Bytes(bytes)
    }
}

impl std::fmt::Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Str(s) => s.fmt(f),
            Arg::Int(n) => n.fmt(f),
            Arg::Float(n) => n.fmt(f),
            Arg::Bytes(bytes) => String::from_utf8_lossy(bytes).fmt(f),
        }
    }
}

impl ToRedisArgs for Arg {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        match self {
            Arg::Str(s) => out.write_arg(s.as_bytes()),
            Arg::Int(n) => out.write_arg(n.to_string().as_bytes()),
            Arg::Float(n) => out.write_arg(n.to_string().as_bytes()),
            Arg::Bytes(bytes) => out.write_arg(bytes),
        }
    }
}

/// Renders arguments the way they appear in command logs.
pub fn bind(args: &[Arg]) -> Vec<String> {
    args.iter().map(Arg::to_string).collect()
}

/// Best-effort conversion of a reply to text, for logging.
///
/// Never fails: replies without a string form become [REPLY_PLACEHOLDER].
pub fn reply_to_string(reply: &Value) -> String {
    match reply {
        Value::Okay => "OK".to_string(),
        Value::SimpleString(s) => s.clone(),
        Value::BulkString(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => REPLY_PLACEHOLDER.to_string(),
        },
        Value::Int(n) => n.to_string(),
        Value::Double(n) => n.to_string(),
        _ => REPLY_PLACEHOLDER.to_string(),
    }
}
