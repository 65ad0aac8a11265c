//! Location pool.
//!
//! A fixed catalog of candidate round locations. Each session draws a subset
//! of the catalog without replacement and marks one of them as the secret.

use rand::Rng;

use super::error::{SessionError, SessionResult};

/// Built-in location catalog.
pub const DEFAULT_LOCATIONS: [&str; 16] = [
    "Bank",
    "Hospital",
    "Military unit",
    "Casino",
    "Hollywood",
    "Titanic",
    "The Death Star",
    "Hotel",
    "Russian Railways",
    "Malibu Beach",
    "Police Station",
    "Restaurant",
    "University",
    "Lyceum",
    "SPA",
    "Plane",
];

/// Draw `k` items from `items` uniformly without replacement.
///
/// Picks a random index among the remaining candidates, moves it to the
/// output and shrinks the remaining set. Output order is draw order.
/// `k` larger than `items.len()` is clamped.
pub fn sample_without_replacement<T, R>(items: &[T], k: usize, rng: &mut R) -> Vec<T>
where
    T: Clone,
    R: Rng + ?Sized,
{
    let mut remaining: Vec<T> = items.to_vec();
    let k = k.min(remaining.len());
    let mut chosen = Vec::with_capacity(k);
    for _ in 0..k {
        let index = rng.random_range(0..remaining.len());
        chosen.push(remaining.swap_remove(index));
    }
    chosen
}

/// Catalog of candidate locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationPool {
    catalog: Vec<String>,
}

impl Default for LocationPool {
    fn default() -> Self {
        Self::new(DEFAULT_LOCATIONS.iter().map(|s| s.to_string()).collect())
    }
}

impl LocationPool {
    pub fn new(catalog: Vec<String>) -> Self {
        Self { catalog }
    }

    /// Number of locations in the catalog.
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Check whether a location belongs to the catalog.
    pub fn contains(&self, location: &str) -> bool {
        self.catalog.iter().any(|l| l == location)
    }

    /// Draw `k` distinct locations and pick one of them as the secret.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `k` is zero or exceeds the catalog size.
    pub fn sample<R>(&self, k: usize, rng: &mut R) -> SessionResult<(Vec<String>, String)>
    where
        R: Rng + ?Sized,
    {
        if k == 0 || k > self.catalog.len() {
            return Err(SessionError::InvalidArgument(format!(
                "cannot draw {} locations from a catalog of {}",
                k,
                self.catalog.len()
            )));
        }

        let chosen = sample_without_replacement(&self.catalog, k, rng);
        let secret = chosen[rng.random_range(0..chosen.len())].clone();
        Ok((chosen, secret))
    }
}
