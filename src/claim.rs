//! Connections which are borrowed from the connection pool.

use crate::backend::Connection;
use crate::idle::IdleList;

use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

/// A [Connection] which is returned to the pool when dropped.
///
/// Note that this method implements [std::ops::Deref] for the
/// generic `Conn` type, and generally, clients should transparently
/// use a handle as a connection.
pub struct Handle<Conn: Connection> {
    inner: Option<Conn>,
    idle: Arc<IdleList<Conn>>,
    // Held until the connection is back in the pool, when the pool caps
    // active connections.
    permit: Option<OwnedSemaphorePermit>,
    broken: bool,
}

impl<Conn: Connection> Handle<Conn> {
    pub(crate) fn new(
        conn: Conn,
        idle: Arc<IdleList<Conn>>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        idle.claimed();
        Self {
            inner: Some(conn),
            idle,
            permit,
            broken: false,
        }
    }

    /// Marks the connection unusable, so it is closed when dropped instead
    /// of returning to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<Conn> std::ops::Deref for Handle<Conn>
where
    Conn: Send + 'static,
{
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref().unwrap()
    }
}

impl<Conn> std::ops::DerefMut for Handle<Conn>
where
    Conn: Send + 'static,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut().unwrap()
    }
}

impl<Conn: Connection> Drop for Handle<Conn> {
    fn drop(&mut self) {
        if let Some(conn) = self.inner.take() {
            self.idle.release(conn, self.broken);
        }
        // Only free the slot once the connection is idle again, so a waiting
        // claim can reuse it.
        drop(self.permit.take());
    }
}
