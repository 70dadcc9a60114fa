//! Ordered writer

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::chunk::{Chunk, Series};
use crate::concurrency::FinishOnce;
use crate::error::{Error, Result};
use crate::pipeline::{defer, empty, once, Proc, Res, ResStream};

struct JoinState<W> {
    writer: Option<W>,
    series: Series<Bytes>,
    written: u64,
}

/// Writes payloads to `W` in `num` order
///
/// Out-of-order chunks are buffered until their predecessors arrive.
/// Successful chunks are consumed; only errors are emitted.
pub struct Join<W> {
    state: Arc<Mutex<JoinState<W>>>,
    finished: FinishOnce,
}

impl<W> Join<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            state: Arc::new(Mutex::new(JoinState {
                writer: Some(writer),
                series: Series::new(),
                written: 0,
            })),
            finished: FinishOnce::new(),
        }
    }

    /// Bytes written so far
    pub async fn written(&self) -> u64 {
        self.state.lock().await.written
    }

    /// Take the writer back, typically after `finish`
    pub async fn take(&self) -> Option<W> {
        self.state.lock().await.writer.take()
    }
}

async fn write_ready<W>(state: &mut JoinState<W>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let ready = state.series.drain_ready();
    let writer = state.writer.as_mut().ok_or(Error::PipelineClosed)?;
    let mut written = 0;
    for data in ready {
        writer.write_all(&data).await?;
        written += data.len() as u64;
    }
    state.written += written;
    Ok(())
}

#[async_trait]
impl<W> Proc for Join<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn process(&self, chunk: Chunk) -> ResStream {
        let state = self.state.clone();
        defer(async move {
            let data = match chunk.bytes().await {
                Ok(data) => data,
                Err(e) => return once(Res::err(chunk, e)),
            };
            let mut state = state.lock().await;
            let outcome = match state.series.insert(chunk.num(), data) {
                Ok(()) => write_ready(&mut *state).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => empty(),
                Err(e) => once(Res::err(chunk, e)),
            }
        })
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| async {
                let mut state = self.state.lock().await;
                state.series.check_complete()?;
                if let Some(writer) = state.writer.as_mut() {
                    writer.flush().await?;
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::drive;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_writes_in_order() {
        let join = Join::new(Vec::new());
        let chunks = vec![
            Chunk::new(2, b"c".to_vec()),
            Chunk::new(0, b"a".to_vec()),
            Chunk::new(1, b"b".to_vec()),
        ];
        assert!(drive(&join, chunks).await.unwrap().is_empty());
        assert_eq!(join.written().await, 3);
        assert_eq!(join.take().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_gap_fails_finish() {
        let join = Join::new(Vec::new());
        assert_matches!(
            drive(&join, vec![Chunk::new(1, b"b".to_vec())]).await,
            Err(Error::IncompleteSeries { buffered: 1, next: 0 })
        );
        assert!(join.take().await.unwrap().is_empty());
    }
}
