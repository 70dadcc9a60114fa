//! Placement Engine
//!
//! Decides which backends receive a copy of each chunk and turns the
//! decision into pipeline stages.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      DynProcer impls                          │
//! │      MinCopies (replicas)          StripeProcer (groups)      │
//! └───────────────────────────────────────────────────────────────┘
//!          │                 │                     │
//!          ▼                 ▼                     ▼
//! ┌───────────────┐ ┌────────────────┐ ┌──────────────────────────┐
//! │ CopyRegistry  │ │  QuotaManager  │ │ place() + RoundRobin     │
//! │ hash → owners │ │ id → used/max  │ │ min / distinct placement │
//! │ per-hash lock │ │                │ │                          │
//! └───────────────┘ └────────────────┘ └──────────────────────────┘
//! ```
//!
//! A placement holds the per-hash lock of every hash it covers until all the
//! stages it returned have been drained, so decisions for one hash are
//! linearized and always see the writes of the previous decision.

pub mod min_copies;
pub mod quota;
pub mod registry;
pub mod shuffle;
pub mod stripe;
pub mod stripe_procer;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::chunk::{Chunk, Hash};
use crate::copier::{writer, Backends, CopierId, CopierRef};
use crate::pipeline::{on_drain, Proc, ProcRef, Res, ResStream};

pub use min_copies::MinCopies;
pub use quota::{Quota, QuotaManager, Usage};
pub use registry::{CopyList, CopyRegistry};
pub use shuffle::Shuffle;
pub use stripe::{place, Placement, RoundRobin, StripeItem};
pub use stripe_procer::StripeProcer;

/// Tracks placements that have not completed yet
#[derive(Debug, Default, Clone)]
pub(crate) struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-hash locks held for the duration of one placement
pub(crate) struct PlacementGuard {
    _locks: Vec<OwnedMutexGuard<()>>,
    in_flight: InFlight,
}

impl PlacementGuard {
    /// Lock every hash; callers pass them sorted to avoid lock-order cycles
    pub(crate) async fn acquire(
        backends: &Backends,
        hashes: &[Hash],
        in_flight: &InFlight,
    ) -> Arc<Self> {
        let mut locks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            locks.push(backends.registry().lock(hash).await);
        }
        in_flight.0.fetch_add(1, Ordering::SeqCst);
        Arc::new(Self {
            _locks: locks,
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for PlacementGuard {
    fn drop(&mut self) {
        self.in_flight.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A stage returned by a placement, keeping the placement locked while any
/// of its result streams is alive
pub(crate) struct PlannedProc {
    inner: ProcRef,
    target: Option<Chunk>,
    guard: Arc<PlacementGuard>,
}

impl PlannedProc {
    pub(crate) fn new(inner: ProcRef, guard: &Arc<PlacementGuard>) -> ProcRef {
        Arc::new(Self {
            inner,
            target: None,
            guard: guard.clone(),
        })
    }

    /// Run `inner` on `target` instead of the submitted chunk
    pub(crate) fn on(inner: ProcRef, target: Chunk, guard: &Arc<PlacementGuard>) -> ProcRef {
        Arc::new(Self {
            inner,
            target: Some(target),
            guard: guard.clone(),
        })
    }
}

#[async_trait]
impl Proc for PlannedProc {
    fn process(&self, chunk: Chunk) -> ResStream {
        let chunk = self.target.clone().unwrap_or(chunk);
        let guard = self.guard.clone();
        on_drain(self.inner.process(chunk), move || drop(guard))
    }
}

/// Writes to one backend, then registers the copy and charges its quota
pub(crate) struct RegisterWrite {
    copier: CopierRef,
    backends: Arc<Backends>,
}

impl RegisterWrite {
    pub(crate) fn new(copier: CopierRef, backends: Arc<Backends>) -> Self {
        Self { copier, backends }
    }
}

#[async_trait]
impl Proc for RegisterWrite {
    fn process(&self, chunk: Chunk) -> ResStream {
        let id: CopierId = self.copier.id().clone();
        let backends = self.backends.clone();
        writer(&self.copier)
            .process(chunk)
            .then(move |res| {
                let id = id.clone();
                let backends = backends.clone();
                async move {
                    let written = match res {
                        Res::Ok(written) => written,
                        failed => {
                            if let Some(e) = failed.error() {
                                warn!(copier = %id, error = %e, "write failed, not registering");
                            }
                            return failed;
                        }
                    };
                    let size = match written.bytes().await {
                        Ok(data) => data.len() as u64,
                        Err(e) => return Res::err(written, e),
                    };
                    let hash = match written.require_hash() {
                        Ok(hash) => hash,
                        Err(e) => return Res::err(written, e),
                    };
                    backends.registry().add(&hash, &id);
                    if !backends.quota().add_use(&id, size) {
                        debug!(copier = %id, "write landed on an untracked backend");
                    }
                    Res::Ok(written)
                }
            })
            .boxed()
    }
}

/// Emits a fixed list of chunks regardless of input
pub(crate) struct EmitChunks(Vec<Chunk>);

impl EmitChunks {
    pub(crate) fn new(chunks: Vec<Chunk>) -> Self {
        Self(chunks)
    }
}

impl Proc for EmitChunks {
    fn process(&self, _chunk: Chunk) -> ResStream {
        stream::iter(self.0.clone().into_iter().map(Res::Ok)).boxed()
    }
}
