//! A pool which connects to one [backend] and vends out a [claim]

use crate::backend::{self, Backend, Connection};
use crate::claim;
use crate::idle::{IdleList, Stats};
use crate::policy::Policy;
#[cfg(feature = "probes")]
use crate::probes;
use crate::ClaimId;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to connect to backend")]
    Connect(#[from] backend::Error),

    #[error("All claims are in use")]
    AllClaimsUsed,

    #[error("Pool terminated")]
    Terminated,
}

impl Error {
    #[cfg(feature = "probes")]
    // Convert to a static string for USDT probes.
    const fn as_str(&self) -> &'static str {
        match self {
            Error::Connect(_) => "Connect",
            Error::AllClaimsUsed => "AllClaimsUsed",
            Error::Terminated => "Terminated",
        }
    }
}

/// The name of the pool
#[derive(Clone, Debug)]
pub(crate) struct Name(Arc<str>);

impl Name {
    pub(crate) fn new<S: Into<Arc<str>>>(name: S) -> Self {
        Self(name.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Manages a set of connections to a single backend
pub struct Pool<Conn: Connection> {
    name: Name,
    backend: Backend,
    backend_connector: backend::SharedConnector<Conn>,
    policy: Policy,
    idle: Arc<IdleList<Conn>>,
    active_limit: Option<Arc<Semaphore>>,
}

impl<Conn: Connection> std::fmt::Debug for Pool<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// A wrapper type indicating that the USDT probes could not be registered.
///
/// In this case, no probes will be available in the process. However, similar
/// to `std::sync::PoisonError`, this contains the pool itself. Applications
/// which don't care about a probe registration failure may still get access to
/// the pool
pub struct RegistrationError<Conn: Connection>(Pool<Conn>);

impl<Conn: Connection> std::fmt::Debug for RegistrationError<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationError").finish_non_exhaustive()
    }
}

impl<Conn: Connection> std::fmt::Display for RegistrationError<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "USDT probe registration failed".fmt(f)
    }
}

impl<Conn: Connection> RegistrationError<Conn> {
    /// Consume the error and get access to the contained pool.
    pub fn into_inner(self) -> Pool<Conn> {
        self.0
    }
}

impl<Conn: Connection> Pool<Conn> {
    /// Creates a new connection pool.
    ///
    /// - name: The name of this pool, for instrumentation.
    /// - backend: The server every connection in this pool talks to.
    /// - backend_connector: Describes how the connections to the backend
    /// should be made and validated.
    ///
    /// No connection is made until the first claim.
    ///
    /// ```no_run
    /// use kvpool::backend::Backend;
    /// use kvpool::connectors::redis::{RedisConnector, Timeouts};
    /// use kvpool::pool::Pool;
    /// use kvpool::policy::Policy;
    /// use std::sync::Arc;
    ///
    /// # async {
    /// let connector = Arc::new(RedisConnector::new(Timeouts::default(), None, 0));
    /// let pool = Pool::new(
    ///     "my-pool".to_string(),
    ///     Backend::new("127.0.0.1:6379"),
    ///     connector,
    ///     Policy::default(),
    /// )
    /// .unwrap();
    ///
    /// // Dials the backend, since nothing is idle yet.
    /// let connection = pool.claim().await.unwrap();
    /// # };
    /// ```
    ///
    /// # DTrace probe registration
    ///
    /// This constructor returns a `Result`, because it attempts to register the
    /// USDT probes it exposes, a fallible process. The `Err` variant of the
    /// returned result still allows callers to access the constructed `Pool`.
    ///
    /// Note that if the `"probes"` feauture is not enabled, this method is
    /// infallible.
    #[instrument(skip(backend_connector), name = "Pool::new")]
    pub fn new(
        name: String,
        backend: Backend,
        backend_connector: backend::SharedConnector<Conn>,
        policy: Policy,
    ) -> Result<Self, RegistrationError<Conn>> {
        let name = Name::new(name);
        let idle = Arc::new(IdleList::new(name.clone(), policy.max_idle));
        let active_limit = policy
            .max_active
            .map(|max_active| Arc::new(Semaphore::new(max_active)));

        let self_ = Self {
            name,
            backend,
            backend_connector,
            policy,
            idle,
            active_limit,
        };
        #[cfg(feature = "probes")]
        match usdt::register_probes() {
            Ok(_) => Ok(self_),
            Err(_) => Err(RegistrationError(self_)),
        }
        #[cfg(not(feature = "probes"))]
        Ok(self_)
    }

    /// Returns the name this pool was created with
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the backend this pool connects to
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Returns the policy this pool was created with
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Samples pool-wide stats
    pub fn stats(&self) -> Stats {
        self.idle.stats()
    }

    /// Terminates the connection pool
    ///
    /// Idle connections are closed immediately. Connections still claimed
    /// are closed when their handles are dropped.
    pub fn terminate(&self) -> Result<(), Error> {
        if !self.idle.close() {
            return Err(Error::Terminated);
        }
        if let Some(limit) = &self.active_limit {
            limit.close();
        }
        event!(Level::INFO, pool = %self.name, "Pool terminated");
        Ok(())
    }

    /// Acquires a handle to a connection within the connection pool.
    #[instrument(level = "debug", skip(self), err, name = "Pool::claim")]
    pub async fn claim(&self) -> Result<claim::Handle<Conn>, Error> {
        let id = ClaimId::new();
        #[cfg(feature = "probes")]
        probes::claim__start!(|| (self.name.as_str(), id.0));
        let res = self.do_claim(id).await;
        #[cfg(feature = "probes")]
        match &res {
            Ok(_) => probes::claim__done!(|| (self.name.as_str(), id.0)),
            Err(e) => probes::claim__failed!(|| (self.name.as_str(), id.0, e.as_str())),
        }
        res
    }

    // Acquiring a claim has two phases:
    //
    // 1. Idle connections are considered, most recently returned first. Each
    //    one must pass "Connector::is_valid" before it is handed out; those
    //    that fail are closed, and the next one is considered.
    // 2. If nothing idle remains, a new connection is dialed.
    #[cfg_attr(not(feature = "probes"), allow(unused_variables))]
    async fn do_claim(&self, id: ClaimId) -> Result<claim::Handle<Conn>, Error> {
        if self.idle.is_closed() {
            return Err(Error::Terminated);
        }
        let permit = self.acquire_permit().await?;

        while let Some(mut conn) = self.idle.pop(self.policy.idle_timeout) {
            #[cfg(feature = "probes")]
            probes::health__check__start!(|| (self.name.as_str(), id.0));

            let result = tokio::time::timeout(
                self.policy.health_check_timeout,
                self.backend_connector.is_valid(&mut conn),
            )
            .await;

            match result {
                Ok(Ok(())) => {
                    event!(Level::TRACE, pool = %self.name, "Reusing idle connection");
                    #[cfg(feature = "probes")]
                    probes::health__check__done!(|| (self.name.as_str(), id.0));
                    return Ok(claim::Handle::new(conn, self.idle.clone(), permit));
                }
                Ok(Err(err)) => {
                    event!(
                        Level::WARN,
                        pool = %self.name,
                        backend = %self.backend,
                        err = ?err,
                        "Idle connection failed health check"
                    );
                    #[cfg(feature = "probes")]
                    probes::health__check__failed!(|| (self.name.as_str(), id.0, err.as_str()));
                }
                Err(_) => {
                    event!(
                        Level::WARN,
                        pool = %self.name,
                        backend = %self.backend,
                        "Idle connection timed out during health check"
                    );
                    #[cfg(feature = "probes")]
                    probes::health__check__failed!(|| (self.name.as_str(), id.0, "Timeout"));
                }
            }
            self.idle.discard(conn);
        }

        let conn = self.connect(id).await?;
        Ok(claim::Handle::new(conn, self.idle.clone(), permit))
    }

    // Waits for room under "Policy::max_active", if the pool has a cap.
    async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, Error> {
        let Some(limit) = &self.active_limit else {
            return Ok(None);
        };
        let permit = tokio::time::timeout(self.policy.claim_timeout, limit.clone().acquire_owned())
            .await
            .map_err(|_| Error::AllClaimsUsed)?
            .map_err(|_| Error::Terminated)?;
        Ok(Some(permit))
    }

    #[cfg_attr(not(feature = "probes"), allow(unused_variables))]
    async fn connect(&self, id: ClaimId) -> Result<Conn, Error> {
        #[cfg(feature = "probes")]
        probes::connect__start!(|| (self.name.as_str(), id.0, &*self.backend.address));

        match self.backend_connector.connect(&self.backend).await {
            Ok(conn) => {
                event!(Level::DEBUG, pool = %self.name, backend = %self.backend, "Connected");
                #[cfg(feature = "probes")]
                probes::connect__done!(|| (self.name.as_str(), id.0, &*self.backend.address));
                self.idle.dialed();
                Ok(conn)
            }
            Err(err) => {
                event!(
                    Level::WARN,
                    pool = %self.name,
                    backend = %self.backend,
                    err = ?err,
                    "Failed to connect"
                );
                #[cfg(feature = "probes")]
                probes::connect__failed!(|| (
                    self.name.as_str(),
                    id.0,
                    &*self.backend.address,
                    err.as_str()
                ));
                Err(Error::Connect(err))
            }
        }
    }
}

impl<Conn: Connection> Drop for Pool<Conn> {
    fn drop(&mut self) {
        // Outstanding handles keep the idle list alive; make sure they close
        // their connections rather than parking them in a dead pool.
        self.idle.close();
    }
}
