//! Bounded in-flight work
//!
//! [`Backlog`] limits how many chunks are in flight through the wrapped
//! stage. A slot is taken before the stage is invoked and returned only once
//! its result stream has been drained, so slow consumers hold slots and
//! backpressure reaches the producer.

use async_trait::async_trait;

use super::{defer, on_drain, once, Proc, ProcRef, Res, ResStream};
use crate::chunk::Chunk;
use crate::concurrency::{FinishOnce, FirstErr, SlotPool};
use crate::error::Result;

/// Slot-bounded wrapper around a stage
pub struct Backlog {
    slots: SlotPool,
    inner: ProcRef,
    finished: FinishOnce,
}

impl Backlog {
    /// Allow at most `slots` chunks in flight through `inner`
    pub fn new(slots: usize, inner: ProcRef) -> Self {
        Self {
            slots: SlotPool::new(slots),
            inner,
            finished: FinishOnce::new(),
        }
    }

    /// Fully serialize `inner`
    pub fn mutex(inner: ProcRef) -> Self {
        Self::new(1, inner)
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.slots.outstanding()
    }
}

#[async_trait]
impl Proc for Backlog {
    fn process(&self, chunk: Chunk) -> ResStream {
        let slots = self.slots.clone();
        let inner = self.inner.clone();
        defer(async move {
            match slots.acquire().await {
                Ok(slot) => on_drain(inner.process(chunk), move || drop(slot)),
                Err(e) => once(Res::err(chunk, e)),
            }
        })
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| async {
                let mut first = FirstErr::new();
                first.record(self.slots.check_returned());
                first.record(self.inner.finish().await);
                first.into_result()
            })
            .await
    }
}
