//! The interface for choosing which configured host a pool connects to.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Picks one host out of the configured candidates.
///
/// A pool is bound to the host chosen when it is created; the selector is
/// not consulted again for that pool.
pub trait HostSelector: Send + Sync {
    /// Returns one of `hosts`, or `None` if the list is empty.
    fn select<'a>(&self, hosts: &'a [String]) -> Option<&'a str>;
}

/// Helper type for anything that implements the HostSelector interface.
pub type SharedSelector = Arc<dyn HostSelector>;

/// Chooses uniformly at random.
///
/// By default this draws from the thread-local generator. A seeded selector
/// produces a repeatable sequence of choices.
#[derive(Debug, Default)]
pub struct RandomSelector {
    rng: Option<Mutex<StdRng>>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl HostSelector for RandomSelector {
    fn select<'a>(&self, hosts: &'a [String]) -> Option<&'a str> {
        if hosts.is_empty() {
            return None;
        }
        let index = match &self.rng {
            Some(rng) => rng.lock().unwrap().random_range(0..hosts.len()),
            None => rand::rng().random_range(0..hosts.len()),
        };
        Some(&hosts[index])
    }
}

/// Always chooses the host at a fixed position, wrapping around short lists.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedSelector {
    index: usize,
}

impl FixedSelector {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl HostSelector for FixedSelector {
    fn select<'a>(&self, hosts: &'a [String]) -> Option<&'a str> {
        if hosts.is_empty() {
            return None;
        }
        Some(&hosts[self.index % hosts.len()])
    }
}
