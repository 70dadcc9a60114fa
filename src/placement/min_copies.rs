//! Replication to a minimum number of backends

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{InFlight, PlacementGuard, PlannedProc, RegisterWrite};
use crate::chunk::Chunk;
use crate::copier::{Backends, CopierId};
use crate::error::{Error, Result};
use crate::pipeline::{DiscardChunks, DynProcer, Nop, ProcRef};

/// Ensures every chunk is held by at least `min` backends
///
/// Returns a pass-through stage plus one write per missing copy. Writes only
/// report errors, so the chunk is emitted exactly once.
pub struct MinCopies {
    min: usize,
    backends: Arc<Backends>,
    in_flight: InFlight,
}

impl MinCopies {
    pub fn new(min: usize, backends: Arc<Backends>) -> Self {
        Self {
            min,
            backends,
            in_flight: InFlight::default(),
        }
    }

    /// Placements whose stages have not drained yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }
}

#[async_trait]
impl DynProcer for MinCopies {
    #[instrument(skip(self, chunk), fields(num = chunk.num()))]
    async fn procs(&self, chunk: &Chunk) -> Result<Vec<ProcRef>> {
        let hash = chunk.require_hash()?;
        let size = chunk.bytes().await?.len() as u64;
        let guard = PlacementGuard::acquire(&self.backends, &[hash], &self.in_flight).await;

        let owners = self.backends.registry().owners(&hash);
        let have = owners.len();
        let mut procs = vec![PlannedProc::new(Arc::new(Nop), &guard)];
        if have >= self.min {
            debug!(%hash, have, "already replicated");
            return Ok(procs);
        }
        let missing = self.min - have;

        let mut candidates: Vec<CopierId> = self
            .backends
            .quota()
            .resources(size)
            .into_iter()
            .filter(|id| !owners.contains(id) && self.backends.get(id).is_some())
            .collect();
        if candidates.len() < missing {
            return Err(Error::InsufficientCopies {
                min: self.min,
                have,
                missing,
                available: candidates.len(),
            });
        }
        self.backends.shuffle().apply(&mut candidates);
        candidates.truncate(missing);
        debug!(%hash, have, targets = ?candidates, "placing copies");

        for id in &candidates {
            let copier = self.backends.require(id)?;
            let write = RegisterWrite::new(copier, self.backends.clone());
            procs.push(PlannedProc::new(
                Arc::new(DiscardChunks::new(Arc::new(write))),
                &guard,
            ));
        }
        Ok(procs)
    }

    async fn finish(&self) -> Result<()> {
        match self.in_flight.count() {
            0 => Ok(()),
            n => Err(Error::PlacementsInFlight(n)),
        }
    }
}
