//! Candidate ordering strategies

use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::copier::CopierId;

/// Orders placement and read candidates in place
#[derive(Clone)]
pub struct Shuffle(Arc<dyn Fn(&mut [CopierId]) + Send + Sync>);

impl Shuffle {
    /// Uniformly random order
    pub fn random() -> Self {
        Self::custom(|ids| ids.shuffle(&mut rand::thread_rng()))
    }

    /// Ascending by id; deterministic
    pub fn by_id() -> Self {
        Self::custom(|ids| ids.sort())
    }

    /// Descending by id; deterministic
    pub fn reversed() -> Self {
        Self::custom(|ids| {
            ids.sort();
            ids.reverse();
        })
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&mut [CopierId]) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, ids: &mut [CopierId]) {
        (self.0)(ids)
    }
}

impl Default for Shuffle {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Debug for Shuffle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Shuffle")
    }
}
