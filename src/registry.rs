//! The process-wide map from pool name to pool.

use crate::factory::CachePool;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Holds every pool created so far, by name.
///
/// Entries are added on first use and never removed. Lookup and insertion
/// happen under one lock, so concurrent first requests for a name create a
/// single pool.
#[derive(Debug)]
pub struct PoolRegistry<P = CachePool> {
    pools: Mutex<HashMap<String, Arc<P>>>,
}

impl<P> Default for PoolRegistry<P> {
    fn default() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }
}

impl<P> PoolRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    // The map is never left half-updated, so a panic elsewhere while the
    // lock was held doesn't invalidate it.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<P>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<Arc<P>> {
        self.lock().get(name).cloned()
    }

    /// Returns the pool registered under `name`, creating and registering it
    /// with `create` if there is none.
    ///
    /// `create` runs while the registry is locked and must not block. If it
    /// fails, nothing is registered.
    pub fn get_or_try_insert_with<E>(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<P, E>,
    ) -> Result<Arc<P>, E> {
        let mut pools = self.lock();
        if let Some(pool) = pools.get(name) {
            return Ok(pool.clone());
        }
        let pool = Arc::new(create()?);
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
