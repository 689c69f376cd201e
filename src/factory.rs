//! Creates pools on demand from configuration.

use crate::backend::Backend;
use crate::config::{BackendConfig, ConfigRegistry, Settings};
use crate::connectors::redis::{RedisConnection, RedisConnector, Timeouts};
use crate::policy::Policy;
use crate::pool::{Pool, RegistrationError};
use crate::registry::PoolRegistry;
use crate::selector::SharedSelector;

use std::sync::Arc;
use thiserror::Error;
use tracing::{event, instrument, Level};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("No configuration for pool {0:?}")]
    ConfigNotFound(String),

    #[error("No host configured for pool {0:?}")]
    HostUnavailable(String),
}

/// A pool of cache connections, along with the settings it was built from.
///
/// Dereferences to the underlying [Pool].
#[derive(Debug)]
pub struct CachePool {
    settings: Settings,
    pool: Pool<RedisConnection>,
}

impl CachePool {
    /// The resolved settings, with defaults applied.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The server this pool is bound to.
    pub fn host(&self) -> &str {
        &self.settings.host
    }
}

impl std::ops::Deref for CachePool {
    type Target = Pool<RedisConnection>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

/// Resolves pool names to pools, creating each pool the first time its
/// name is requested.
pub struct PoolFactory {
    configs: Arc<ConfigRegistry>,
    pools: Arc<PoolRegistry>,
    selector: SharedSelector,
}

impl PoolFactory {
    pub fn new(
        configs: Arc<ConfigRegistry>,
        pools: Arc<PoolRegistry>,
        selector: SharedSelector,
    ) -> Self {
        Self {
            configs,
            pools,
            selector,
        }
    }

    pub fn configs(&self) -> &ConfigRegistry {
        &self.configs
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    /// Returns the pool registered for `name`, creating it if necessary.
    ///
    /// Creation picks one of the configured hosts and never dials; the first
    /// connection is made on the first claim.
    #[instrument(level = "debug", skip(self), err, name = "PoolFactory::get_or_create_pool")]
    pub fn get_or_create_pool(&self, name: &str) -> Result<Arc<CachePool>, Error> {
        let Some(config) = self.configs.get(name) else {
            return Err(Error::ConfigNotFound(name.to_string()));
        };
        self.pools
            .get_or_try_insert_with(name, || self.create_pool(name, config))
    }

    fn create_pool(&self, name: &str, config: &BackendConfig) -> Result<CachePool, Error> {
        let Some(host) = self.selector.select(&config.hosts) else {
            event!(Level::WARN, pool = name, "Pool has no hosts configured");
            return Err(Error::HostUnavailable(name.to_string()));
        };
        let settings = config.resolve(host);

        let connector = Arc::new(RedisConnector::new(
            Timeouts {
                connect: settings.connect_timeout,
                read: settings.read_timeout,
                write: settings.write_timeout,
            },
            settings.password.clone(),
            settings.db_index,
        ));
        let policy = Policy {
            max_idle: settings.max_idle,
            idle_timeout: settings.idle_timeout,
            health_check_timeout: settings.read_timeout + settings.write_timeout,
            ..Default::default()
        };

        let pool = Pool::new(
            name.to_string(),
            Backend::new(settings.host.as_str()),
            connector,
            policy,
        )
        .unwrap_or_else(|err| {
            event!(Level::WARN, pool = name, "{err}; continuing without probes");
            RegistrationError::into_inner(err)
        });

        event!(Level::INFO, pool = name, host = %settings.host, "Created pool");
        Ok(CachePool { settings, pool })
    }
}
