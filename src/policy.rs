//! Configuration options which can alter the behavior of the pool.

use tokio::time::Duration;

/// Policy which is applicable to a connection pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    /// The maximum number of idle connections retained by the pool.
    ///
    /// Connections returned while this many are already idle get closed.
    /// This does not bound the number of connections in use.
    pub max_idle: usize,

    /// Idle connections older than this are closed instead of being reused.
    pub idle_timeout: Duration,

    /// How long the liveness probe on a borrowed idle connection may run.
    pub health_check_timeout: Duration,

    /// An optional cap on the number of connections claimed at once.
    ///
    /// `None` leaves active connections unbounded.
    pub max_active: Option<usize>,

    /// How long a claim waits for a free slot when `max_active` is reached.
    pub claim_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_idle: 3,
            idle_timeout: Duration::from_secs(240),
            health_check_timeout: Duration::from_millis(200),
            max_active: None,
            claim_timeout: Duration::from_secs(1),
        }
    }
}
