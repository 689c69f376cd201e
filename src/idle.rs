//! The idle connections retained by a pool, and the counters describing them.

use crate::backend::Connection;
use crate::pool::Name;
#[cfg(feature = "probes")]
use crate::probes;

use debug_ignore::DebugIgnore;
use derive_where::derive_where;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{event, Level};

// A connection sitting in the pool, along with the moment it was returned.
#[derive_where(Debug)]
struct IdleConn<Conn: Connection> {
    conn: DebugIgnore<Conn>,
    since: Instant,
}

/// Describes the state of connections owned by a pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Connections currently claimed by callers.
    pub active: usize,

    /// Connections waiting in the pool for reuse.
    pub idle: usize,

    /// The total number of claims handed out so far.
    pub claims: usize,

    /// The total number of connections dialed so far.
    pub dials: usize,

    /// The total number of connections closed by the pool: expired,
    /// unhealthy, broken, or beyond the idle limit.
    pub discarded: usize,
}

/// Idle connections, most recently returned first.
///
/// The front of the queue is handed out first. Expired connections are
/// pruned from the back, where the oldest ones live.
#[derive_where(Debug)]
pub(crate) struct IdleList<Conn: Connection> {
    name: Name,
    max_idle: usize,
    conns: Mutex<VecDeque<IdleConn<Conn>>>,
    closed: AtomicBool,

    active: AtomicUsize,
    claims: AtomicUsize,
    dials: AtomicUsize,
    discarded: AtomicUsize,
}

impl<Conn: Connection> IdleList<Conn> {
    pub(crate) fn new(name: Name, max_idle: usize) -> Self {
        Self {
            name,
            max_idle,
            conns: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            claims: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    /// Takes the most recently returned connection which has not been idle
    /// for longer than `idle_timeout`.
    ///
    /// Expired connections encountered along the way are closed.
    pub(crate) fn pop(&self, idle_timeout: Duration) -> Option<Conn> {
        let now = Instant::now();
        let mut expired = vec![];
        let conn = {
            let mut conns = self.conns.lock().unwrap();
            while let Some(oldest) = conns.back() {
                if now.saturating_duration_since(oldest.since) < idle_timeout {
                    break;
                }
                expired.extend(conns.pop_back());
            }
            conns.pop_front().map(|idle| idle.conn.0)
        };

        if !expired.is_empty() {
            event!(
                Level::DEBUG,
                pool = %self.name,
                count = expired.len(),
                "Closing expired idle connections"
            );
            self.discarded.fetch_add(expired.len(), Ordering::Relaxed);
        }
        conn
    }

    /// Returns a claimed connection to the pool.
    ///
    /// Broken connections, connections returned after the pool was
    /// terminated, and connections beyond the idle limit are closed.
    pub(crate) fn release(&self, conn: Conn, broken: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        #[cfg(feature = "probes")]
        probes::handle__returned!(|| self.name.as_str());

        if broken {
            event!(Level::DEBUG, pool = %self.name, "Closing broken connection");
            self.discard(conn);
            return;
        }

        // "close" sets the flag before draining under this lock, so checking
        // it here means nothing is parked after the drain.
        let evicted = {
            let mut conns = self.conns.lock().unwrap();
            if self.is_closed() {
                Some(conn)
            } else {
                conns.push_front(IdleConn {
                    conn: DebugIgnore(conn),
                    since: Instant::now(),
                });
                if conns.len() > self.max_idle {
                    conns.pop_back().map(|idle| idle.conn.0)
                } else {
                    None
                }
            }
        };

        if let Some(evicted) = evicted {
            event!(Level::TRACE, pool = %self.name, "Closing returned connection");
            self.discard(evicted);
        }
    }

    /// Closes a connection which will not return to the pool.
    pub(crate) fn discard(&self, conn: Conn) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        drop(conn);
    }

    /// Marks the list closed, and closes every idle connection.
    ///
    /// Returns false if the list was already closed.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let drained: Vec<_> = self.conns.lock().unwrap().drain(..).collect();
        self.discarded.fetch_add(drained.len(), Ordering::Relaxed);
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn claimed(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.claims.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dialed(&self) {
        self.dials.fetch_add(1, Ordering::Relaxed);
    }

    /// Samples the counters at a single point-in-time.
    ///
    /// Calling this function is racy, so its usage is recommended only for
    /// test environments and approximate heuristics.
    pub(crate) fn stats(&self) -> Stats {
        Stats {
            active: self.active.load(Ordering::Relaxed),
            idle: self.conns.lock().unwrap().len(),
            claims: self.claims.load(Ordering::Relaxed),
            dials: self.dials.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
