//! Pipeline Module
//!
//! Composable chunk-processing stages and the combinators that wire them
//! together.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!   Chunk ──────▶ │ Proc::process(chunk) ──▶ stream of Res       │
//!                 │                                              │
//!                 │ Chain ─ Cascade ─ Backlog ─ Pool ─ Concur    │
//!                 │ Filter ─ OnEnd ─ DiscardChunks ─ Sort ─ Group│
//!                 └──────────────────────────────────────────────┘
//!                                  │
//!                         Proc::finish() once all
//!                         chunks were submitted
//! ```
//!
//! Every stage returns a `'static` result stream: implementations clone the
//! `Arc`-shared state they need into the stream instead of borrowing `self`.
//! A stage may optionally declare the `recover` and `end` capabilities (see
//! [`Capabilities`]); a [`Chain`] resolves them once when it is built.

pub mod backlog;
pub mod cascade;
pub mod chain;
pub mod concur;
pub mod filter;
pub mod order;
pub mod pool;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Future, StreamExt};

use crate::chunk::Chunk;
use crate::concurrency::FirstErr;
use crate::error::{Error, Result};

pub use backlog::Backlog;
pub use cascade::Cascade;
pub use chain::Chain;
pub use concur::{Concur, DynProcer};
pub use filter::{DiscardChunks, Filter, OnEnd};
pub use order::{Group, Sort};
pub use pool::Pool;

// =============================================================================
// Results
// =============================================================================

/// Outcome of applying one stage to one chunk
#[derive(Debug, Clone)]
pub enum Res {
    /// A produced chunk
    Ok(Chunk),
    /// A failure, tagged with the chunk it applied to when known
    Err { chunk: Option<Chunk>, error: Error },
}

impl Res {
    /// Failure attributed to `chunk`
    pub fn err(chunk: Chunk, error: Error) -> Self {
        Res::Err {
            chunk: Some(chunk),
            error,
        }
    }

    /// Failure without an attributable chunk
    pub fn orphan(error: Error) -> Self {
        Res::Err { chunk: None, error }
    }

    /// True for failures
    pub fn is_err(&self) -> bool {
        matches!(self, Res::Err { .. })
    }

    /// The produced or failing chunk
    pub fn chunk(&self) -> Option<&Chunk> {
        match self {
            Res::Ok(c) => Some(c),
            Res::Err { chunk, .. } => chunk.as_ref(),
        }
    }

    /// The error, if this is a failure
    pub fn error(&self) -> Option<&Error> {
        match self {
            Res::Ok(_) => None,
            Res::Err { error, .. } => Some(error),
        }
    }

    /// Convert into a plain result
    pub fn into_result(self) -> Result<Chunk> {
        match self {
            Res::Ok(c) => Ok(c),
            Res::Err { error, .. } => Err(error),
        }
    }
}

impl From<Result<Chunk>> for Res {
    fn from(r: Result<Chunk>) -> Self {
        match r {
            Ok(c) => Res::Ok(c),
            Err(e) => Res::orphan(e),
        }
    }
}

/// Asynchronous stream of results
pub type ResStream = BoxStream<'static, Res>;

/// Shared handle to a stage
pub type ProcRef = Arc<dyn Proc>;

// =============================================================================
// Proc
// =============================================================================

/// Optional capabilities a stage can declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Offered failures from earlier stages via [`Proc::recover`]
    pub recover: bool,
    /// Notified via [`Proc::end`] once a chunk's downstream fan-out completed
    pub end: bool,
}

/// A composable pipeline stage
#[async_trait]
pub trait Proc: Send + Sync {
    /// Process one chunk
    fn process(&self, chunk: Chunk) -> ResStream;

    /// Flush buffered state once all chunks were submitted
    async fn finish(&self) -> Result<()> {
        Ok(())
    }

    /// Capabilities this stage implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Chance to turn an upstream failure into success
    fn recover(&self, chunk: Chunk, error: Error) -> ResStream {
        once(Res::err(chunk, error))
    }

    /// Called with the chunk this stage saw and every downstream result
    async fn end(&self, _chunk: &Chunk, _results: &[Res]) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Stream Helpers
// =============================================================================

/// Stream of a single result
pub fn once(res: Res) -> ResStream {
    stream::iter(Some(res)).boxed()
}

/// Stream of a single result produced by a future
pub fn once_async<F>(fut: F) -> ResStream
where
    F: Future<Output = Res> + Send + 'static,
{
    stream::once(fut).boxed()
}

/// Stream produced by a future
pub fn defer<F>(fut: F) -> ResStream
where
    F: Future<Output = ResStream> + Send + 'static,
{
    stream::once(fut).flatten().boxed()
}

/// Stream with no results
pub fn empty() -> ResStream {
    stream::empty().boxed()
}

/// Run `f` once the stream is exhausted or dropped
pub fn on_drain<F>(results: ResStream, f: F) -> ResStream
where
    F: FnOnce() + Send + 'static,
{
    struct Guard<F: FnOnce()>(Option<F>);
    impl<F: FnOnce()> Drop for Guard<F> {
        fn drop(&mut self) {
            if let Some(f) = self.0.take() {
                f();
            }
        }
    }

    let guard = Guard(Some(f));
    stream::unfold((results, guard), |(mut results, guard)| async move {
        let next = results.next().await?;
        Some((next, (results, guard)))
    })
    .boxed()
}

/// Drain a stream into a vector
pub async fn collect(results: ResStream) -> Vec<Res> {
    results.collect().await
}

// =============================================================================
// Nop
// =============================================================================

/// Passes every chunk through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Nop;

impl Proc for Nop {
    fn process(&self, chunk: Chunk) -> ResStream {
        once(Res::Ok(chunk))
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Drive `chunks` through `proc` one after another.
///
/// Each result stream is fully drained before the next chunk is submitted.
/// `finish` always runs. Returns every produced chunk, or the first error.
pub async fn drive<I>(proc: &dyn Proc, chunks: I) -> Result<Vec<Chunk>>
where
    I: IntoIterator<Item = Chunk>,
{
    let mut first = FirstErr::new();
    let mut out = Vec::new();

    for chunk in chunks {
        let mut results = proc.process(chunk);
        while let Some(res) = results.next().await {
            match res {
                Res::Ok(c) => out.push(c),
                Res::Err { error, .. } => first.record_err(error),
            }
        }
    }

    first.record(proc.finish().await);
    first.into_result().map(|_| out)
}
