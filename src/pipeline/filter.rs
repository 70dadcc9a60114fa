//! Result rewriting stages

use std::sync::Arc;

use async_trait::async_trait;
use futures::{future, stream, StreamExt};

use super::{Proc, ProcRef, Res, ResStream};
use crate::chunk::Chunk;
use crate::error::{Error, Result};

type FilterFn = Arc<dyn Fn(Res) -> Res + Send + Sync>;

/// Rewrites every result of the wrapped stage
pub struct Filter {
    inner: ProcRef,
    f: FilterFn,
}

impl Filter {
    pub fn new<F>(inner: ProcRef, f: F) -> Self
    where
        F: Fn(Res) -> Res + Send + Sync + 'static,
    {
        Self {
            inner,
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl Proc for Filter {
    fn process(&self, chunk: Chunk) -> ResStream {
        let f = self.f.clone();
        self.inner.process(chunk).map(move |r| f(r)).boxed()
    }

    async fn finish(&self) -> Result<()> {
        self.inner.finish().await
    }
}

type EndFn = Arc<dyn Fn(&Chunk, Option<&Error>) + Send + Sync>;

struct EndState {
    chunk: Chunk,
    first: Option<Error>,
    callback: Option<EndFn>,
}

impl Drop for EndState {
    fn drop(&mut self) {
        if let Some(cb) = self.callback.take() {
            cb(&self.chunk, self.first.as_ref());
        }
    }
}

/// Invokes a callback once per result stream, when it ends
///
/// The callback receives the input chunk and the first error the stream
/// carried. A stream dropped before exhaustion still triggers it.
pub struct OnEnd {
    inner: ProcRef,
    callback: EndFn,
}

impl OnEnd {
    pub fn new<F>(inner: ProcRef, callback: F) -> Self
    where
        F: Fn(&Chunk, Option<&Error>) + Send + Sync + 'static,
    {
        Self {
            inner,
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl Proc for OnEnd {
    fn process(&self, chunk: Chunk) -> ResStream {
        let state = EndState {
            chunk: chunk.clone(),
            first: None,
            callback: Some(self.callback.clone()),
        };
        stream::unfold(
            (self.inner.process(chunk), state),
            |(mut results, mut state)| async move {
                let res = results.next().await?;
                if state.first.is_none() {
                    state.first = res.error().cloned();
                }
                Some((res, (results, state)))
            },
        )
        .boxed()
    }

    async fn finish(&self) -> Result<()> {
        self.inner.finish().await
    }
}

/// Drops successful chunks and forwards only errors
pub struct DiscardChunks {
    inner: ProcRef,
}

impl DiscardChunks {
    pub fn new(inner: ProcRef) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Proc for DiscardChunks {
    fn process(&self, chunk: Chunk) -> ResStream {
        self.inner
            .process(chunk)
            .filter(|r| future::ready(r.is_err()))
            .boxed()
    }

    async fn finish(&self) -> Result<()> {
        self.inner.finish().await
    }
}
