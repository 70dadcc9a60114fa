//! Store Module
//!
//! Wires the stages into the two pipelines a store runs:
//!
//! ```text
//! put:  input ─▶ Split ─▶ Checksum ─▶ IndexWriter ─▶ [ParityEncode]
//!         ─▶ [Compress] ─▶ Checksum ─▶ Concur(MinCopies)
//!                                    or Group ─▶ Concur(StripeProcer)
//!
//! get:  IndexScanner ─▶ MultiReader(verified) ─▶ [Compress::decode]
//!         ─▶ [Group ─▶ ParityDecode] ─▶ Join ─▶ output
//! ```
//!
//! With parity enabled each chunk's shards are placed together as one stripe
//! so their first copies land on distinct backends where possible.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite};
use tracing::{info, instrument};

use crate::chunk::Chunk;
use crate::config::StoreConfig;
use crate::copier::{Backends, CopierId, CopierRef, DirCopier, MultiReader};
use crate::ec::{ParityDecode, ParityEncode};
use crate::error::{Error, Result};
use crate::index::{IndexScanner, IndexWriter};
use crate::pipeline::{drive, Chain, Concur, Group, ProcRef};
use crate::placement::{MinCopies, Shuffle, StripeProcer, Usage};
use crate::stages::{Checksum, Compress, Join, Split};

/// Outcome of a `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutSummary {
    /// Chunks placed (shards when erasure coding)
    pub stored: usize,
    /// Lines written to the index
    pub index_lines: u64,
}

/// Inventory of one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReport {
    pub id: CopierId,
    pub blobs: usize,
    pub bytes: u64,
    /// `None` once the backend was evicted for reaching its quota
    pub usage: Option<Usage>,
}

/// A configured set of backends plus the pipelines over them
pub struct Store {
    config: StoreConfig,
    backends: Arc<Backends>,
}

impl Store {
    /// Open every configured directory backend and load its inventory
    #[instrument(skip(config), fields(backends = config.backends.len()))]
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backends = Arc::new(Backends::new(Shuffle::random()));
        for backend in &config.backends {
            let copier: CopierRef = Arc::new(DirCopier::new(backend.id.as_str(), &backend.path));
            backends.add(copier, backend.quota());
        }
        let blobs = backends.load().await?;
        info!(blobs, copies = backends.registry().len(), "store opened");
        Ok(Self { config, backends })
    }

    /// Use an already populated backend set
    pub fn with_backends(config: StoreConfig, backends: Arc<Backends>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backends })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backends(&self) -> &Arc<Backends> {
        &self.backends
    }

    fn placement(&self) -> Result<Vec<ProcRef>> {
        let slots = self.config.slots;
        let min = self.config.min_copies;
        Ok(match self.config.parity {
            Some(parity) => vec![
                Arc::new(Group::new(parity.total())?) as ProcRef,
                Arc::new(Concur::new(
                    slots,
                    Arc::new(StripeProcer::new(min, 1, self.backends.clone())?),
                )),
            ],
            None => vec![Arc::new(Concur::new(
                slots,
                Arc::new(MinCopies::new(min, self.backends.clone())),
            )) as ProcRef],
        })
    }

    /// Store everything `input` yields and write its index to `index`
    #[instrument(skip_all)]
    pub async fn put<R, W>(&self, input: R, index: W) -> Result<(PutSummary, W)>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(IndexWriter::new(index));
        let mut stages: Vec<ProcRef> = vec![
            Arc::new(Split::new(self.config.chunk_size)) as ProcRef,
            Arc::new(Checksum::compute()),
            writer.clone(),
        ];
        if let Some(parity) = self.config.parity {
            stages.push(Arc::new(ParityEncode::new(parity.data, parity.parity)?));
        }
        if self.config.compress {
            stages.push(Arc::new(Compress::encode()));
        }
        stages.push(Arc::new(Checksum::compute()));
        stages.extend(self.placement()?);

        let stored = drive(&Chain::new(stages), vec![Chunk::from_reader(0, input)]).await?;
        let summary = PutSummary {
            stored: stored.len(),
            index_lines: writer.lines().await,
        };
        info!(stored = summary.stored, lines = summary.index_lines, "put complete");
        let index = writer.take().await.ok_or(Error::PipelineClosed)?;
        Ok((summary, index))
    }

    /// Rebuild the stream described by `index` into `output`
    #[instrument(skip_all)]
    pub async fn get<R, W>(&self, index: R, output: W) -> Result<(u64, W)>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let refs = IndexScanner::new(index).scan().await?;
        let join = Arc::new(Join::new(output));

        let mut stages: Vec<ProcRef> =
            vec![Arc::new(MultiReader::verified(self.backends.clone()))];
        if self.config.compress {
            stages.push(Arc::new(Compress::decode()));
        }
        if let Some(parity) = self.config.parity {
            stages.push(Arc::new(Group::new(parity.total())?));
            stages.push(Arc::new(ParityDecode::new(parity.data, parity.parity)?));
        }
        stages.push(join.clone());

        drive(&Chain::new(stages), refs).await?;
        let written = join.written().await;
        info!(written, "get complete");
        let output = join.take().await.ok_or(Error::PipelineClosed)?;
        Ok((written, output))
    }

    /// Per-backend inventory, sorted by id
    pub async fn ls(&self) -> Result<Vec<BackendReport>> {
        let mut reports = Vec::new();
        for id in self.backends.ids() {
            let Some(copier) = self.backends.get(&id) else {
                continue;
            };
            let listing = copier.ls().await?;
            reports.push(BackendReport {
                blobs: listing.len(),
                bytes: listing.iter().map(|(_, size)| size).sum(),
                usage: self.backends.quota().usage(&id),
                id,
            });
        }
        Ok(reports)
    }
}
