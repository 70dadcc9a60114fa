//! Index Module
//!
//! The index records, per stored chunk, one `<hex-hash> <decimal-size>` line.
//! [`IndexWriter`] produces it from the results of an encode pipeline;
//! [`IndexScanner`] turns it back into reference chunks that seed the decode
//! pipeline.
//!
//! Lines for one input chunk are written only once its whole downstream
//! fan-out completed, sorted by descendant `num`. Input chunks are written in
//! input order, so line `i` of the index is the descendant with position `i`
//! whenever the stages below the writer number their output densely.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::chunk::{Chunk, Hash, Series};
use crate::concurrency::FinishOnce;
use crate::error::{Error, Result};
use crate::pipeline::{once, Capabilities, Proc, Res, ResStream};

struct IndexState<W> {
    writer: Option<W>,
    pending: Series<Vec<String>>,
    lines: u64,
}

/// Pass-through stage recording every finalized descendant
pub struct IndexWriter<W> {
    state: Arc<Mutex<IndexState<W>>>,
    finished: FinishOnce,
}

impl<W> IndexWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            state: Arc::new(Mutex::new(IndexState {
                writer: Some(writer),
                pending: Series::new(),
                lines: 0,
            })),
            finished: FinishOnce::new(),
        }
    }

    /// Lines written so far
    pub async fn lines(&self) -> u64 {
        self.state.lock().await.lines
    }

    /// Take the writer back, typically after `finish`
    pub async fn take(&self) -> Option<W> {
        self.state.lock().await.writer.take()
    }
}

/// Format one index line
pub fn format_line(hash: &Hash, size: u64) -> String {
    format!("{} {}\n", hash.to_hex(), size)
}

async fn line_for(chunk: &Chunk) -> Result<(u64, String)> {
    let hash = chunk.require_hash()?;
    let size = match chunk.target_size() {
        Some(size) => size,
        None => chunk.bytes().await?.len() as u64,
    };
    Ok((chunk.num(), format_line(&hash, size)))
}

#[async_trait]
impl<W> Proc for IndexWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn process(&self, chunk: Chunk) -> ResStream {
        once(Res::Ok(chunk))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            end: true,
            ..Default::default()
        }
    }

    async fn end(&self, chunk: &Chunk, results: &[Res]) -> Result<()> {
        let mut lines = Vec::new();
        for res in results {
            if let Res::Ok(descendant) = res {
                lines.push(line_for(descendant).await?);
            }
        }
        lines.sort_by_key(|(num, _)| *num);

        let mut state = self.state.lock().await;
        state
            .pending
            .insert(chunk.num(), lines.into_iter().map(|(_, l)| l).collect())?;
        let ready = state.pending.drain_ready();
        let writer = state.writer.as_mut().ok_or(Error::PipelineClosed)?;
        let mut written = 0;
        for line in ready.iter().flatten() {
            writer.write_all(line.as_bytes()).await?;
            written += 1;
        }
        state.lines += written;
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| async {
                let mut state = self.state.lock().await;
                state.pending.check_complete()?;
                if let Some(writer) = state.writer.as_mut() {
                    writer.flush().await?;
                }
                debug!(lines = state.lines, "index complete");
                Ok(())
            })
            .await
    }
}

/// Reads an index back into reference chunks
///
/// Blank lines are skipped. Entry `i` becomes chunk `i` carrying the hash and
/// the recorded size as target size, with no payload.
pub struct IndexScanner<R> {
    reader: R,
}

impl<R> IndexScanner<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub async fn scan(self) -> Result<Vec<Chunk>> {
        let mut lines = self.reader.lines();
        let mut chunks = Vec::new();
        let mut line_no = 0;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            chunks.push(parse_line(chunks.len() as u64, line_no, &line)?);
        }
        Ok(chunks)
    }
}

/// Parse one index line into the reference chunk at position `num`
pub fn parse_line(num: u64, line_no: usize, line: &str) -> Result<Chunk> {
    let bad = |reason: String| Error::Index {
        line: line_no,
        reason,
    };
    let mut fields = line.split_whitespace();
    let (Some(hex), Some(size), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(bad("expected `<hash> <size>`".to_string()));
    };
    let hash: Hash = hex.parse().map_err(|e: Error| bad(e.to_string()))?;
    let size: u64 = size
        .parse()
        .map_err(|e| bad(format!("invalid size {:?}: {}", size, e)))?;
    Ok(Chunk::reference(num, hash, Some(size)))
}
