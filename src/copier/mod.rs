//! Storage Backends
//!
//! A copier stores immutable blobs keyed by content hash. The core only needs
//! four operations (`id`, `ls`, `put`, `get`); the pipeline sees a copier
//! through its [`writer`] and [`reader`] stages.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────────────────────────┐
//!              │                Backends                  │
//!              │  copiers by id · CopyRegistry · Quotas   │
//!              └──────────────────────────────────────────┘
//!                  │                │               │
//!             MemCopier         DirCopier       (custom)
//! ```

pub mod dir;
pub mod mem;
pub mod multi_reader;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::chunk::{Chunk, Hash};
use crate::error::{Error, Result};
use crate::placement::{CopyRegistry, Quota, QuotaManager, Shuffle};
use crate::pipeline::{once_async, Proc, ProcRef, Res, ResStream};

pub use dir::DirCopier;
pub use mem::MemCopier;
pub use multi_reader::MultiReader;

// =============================================================================
// Identity
// =============================================================================

/// Stable identity of a storage backend
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CopierId(String);

impl CopierId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CopierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CopierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CopierId({})", self.0)
    }
}

impl From<&str> for CopierId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// Copier
// =============================================================================

/// A storage backend holding blobs by content hash
#[async_trait]
pub trait Copier: Send + Sync {
    /// Backend identity
    fn id(&self) -> &CopierId;

    /// Every stored hash with its size in bytes
    async fn ls(&self) -> Result<Vec<(Hash, u64)>>;

    /// Store `data` under `hash`; afterwards `ls` lists it
    async fn put(&self, hash: Hash, data: Bytes) -> Result<()>;

    /// Return exactly the bytes stored under `hash`
    async fn get(&self, hash: Hash) -> Result<Bytes>;
}

/// Shared handle to a backend
pub type CopierRef = Arc<dyn Copier>;

struct Writer(CopierRef);

#[async_trait]
impl Proc for Writer {
    fn process(&self, chunk: Chunk) -> ResStream {
        let copier = self.0.clone();
        once_async(async move {
            let stored = async {
                let hash = chunk.require_hash()?;
                let data = chunk.bytes().await?;
                copier.put(hash, data).await
            };
            match stored.await {
                Ok(()) => Res::Ok(chunk),
                Err(e) => Res::err(chunk, e),
            }
        })
    }
}

struct Reader(CopierRef);

#[async_trait]
impl Proc for Reader {
    fn process(&self, chunk: Chunk) -> ResStream {
        let copier = self.0.clone();
        once_async(async move {
            let loaded = async {
                let hash = chunk.require_hash()?;
                copier.get(hash).await
            };
            match loaded.await {
                Ok(data) => Res::Ok(chunk.with_data(data)),
                Err(e) => Res::err(chunk, e),
            }
        })
    }
}

/// Stage storing each chunk's payload under its hash
pub fn writer(copier: &CopierRef) -> ProcRef {
    Arc::new(Writer(copier.clone()))
}

/// Stage replacing each chunk's payload with the stored bytes for its hash
pub fn reader(copier: &CopierRef) -> ProcRef {
    Arc::new(Reader(copier.clone()))
}

// =============================================================================
// Backends
// =============================================================================

/// The live backend set with its placement state
pub struct Backends {
    copiers: DashMap<CopierId, CopierRef>,
    registry: Arc<CopyRegistry>,
    quota: Arc<QuotaManager>,
    shuffle: Shuffle,
}

impl Backends {
    /// Empty set using `shuffle` to order placement candidates
    pub fn new(shuffle: Shuffle) -> Self {
        Self::with_quota(shuffle, QuotaManager::new())
    }

    /// Empty set with a preconfigured quota manager (e.g. with an observer)
    pub fn with_quota(shuffle: Shuffle, quota: QuotaManager) -> Self {
        Self {
            copiers: DashMap::new(),
            registry: Arc::new(CopyRegistry::new()),
            quota: Arc::new(quota),
            shuffle,
        }
    }

    /// Add or replace a backend with a fresh quota
    pub fn add(&self, copier: CopierRef, quota: Quota) {
        let id = copier.id().clone();
        info!(copier = %id, ?quota, "adding backend");
        self.quota.add(id.clone(), quota);
        self.copiers.insert(id, copier);
    }

    /// Backend by id
    pub fn get(&self, id: &CopierId) -> Option<CopierRef> {
        self.copiers.get(id).map(|c| c.value().clone())
    }

    /// Every backend id, sorted
    pub fn ids(&self) -> Vec<CopierId> {
        let mut ids: Vec<CopierId> = self.copiers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn registry(&self) -> &Arc<CopyRegistry> {
        &self.registry
    }

    pub fn quota(&self) -> &Arc<QuotaManager> {
        &self.quota
    }

    pub fn shuffle(&self) -> &Shuffle {
        &self.shuffle
    }

    /// Seed the registry and quota usage from every backend's inventory.
    ///
    /// A backend whose listing fails is logged and skipped; its copies stay
    /// unknown until written again.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize> {
        let copiers: Vec<CopierRef> = self.copiers.iter().map(|e| e.value().clone()).collect();
        let mut total = 0;
        for copier in copiers {
            let listing = match copier.ls().await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(copier = %copier.id(), error = %e, "listing failed");
                    continue;
                }
            };
            let bytes: u64 = listing.iter().map(|(_, size)| size).sum();
            self.registry
                .load(copier.id(), listing.iter().map(|(hash, _)| *hash));
            self.quota.add_use(copier.id(), bytes);
            info!(copier = %copier.id(), blobs = listing.len(), bytes, "loaded backend");
            total += listing.len();
        }
        Ok(total)
    }

    /// Backend for `id`, or an error naming it
    pub(crate) fn require(&self, id: &CopierId) -> Result<CopierRef> {
        self.get(id).ok_or_else(|| Error::Backend {
            copier: id.to_string(),
            reason: "unknown backend".into(),
        })
    }
}
