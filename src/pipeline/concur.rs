//! Dynamic fan-out
//!
//! A [`DynProcer`] decides, per chunk, which stages should run on it (for
//! example one writer per chosen backend). [`Concur`] runs them concurrently
//! and merges their results.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tracing::debug;

use super::{defer, once, Proc, ProcRef, Res, ResStream};
use crate::chunk::Chunk;
use crate::concurrency::FinishOnce;
use crate::error::Result;

/// Maps one chunk to the stages to run on it
#[async_trait]
pub trait DynProcer: Send + Sync {
    /// Stages to run concurrently on `chunk`
    async fn procs(&self, chunk: &Chunk) -> Result<Vec<ProcRef>>;

    /// Check residual state once all chunks were submitted
    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs the stages chosen by a [`DynProcer`], at most `slots` at once
pub struct Concur {
    slots: usize,
    procer: Arc<dyn DynProcer>,
    finished: FinishOnce,
}

impl Concur {
    pub fn new(slots: usize, procer: Arc<dyn DynProcer>) -> Self {
        Self {
            slots: slots.max(1),
            procer,
            finished: FinishOnce::new(),
        }
    }
}

#[async_trait]
impl Proc for Concur {
    fn process(&self, chunk: Chunk) -> ResStream {
        let slots = self.slots;
        let procer = self.procer.clone();
        defer(async move {
            match procer.procs(&chunk).await {
                Ok(procs) => {
                    debug!(num = chunk.num(), procs = procs.len(), "fanning out");
                    stream::iter(procs)
                        .map(move |p| p.process(chunk.clone()))
                        .flatten_unordered(Some(slots))
                        .boxed()
                }
                Err(e) => once(Res::orphan(e)),
            }
        })
    }

    async fn finish(&self) -> Result<()> {
        self.finished.run(|| self.procer.finish()).await
    }
}
