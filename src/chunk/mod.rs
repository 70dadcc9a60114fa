//! Chunk Data Model
//!
//! A [`Chunk`] is the unit of work flowing through every pipeline stage: a
//! position in an ordered series, a payload, an optional content hash, the
//! expected decoded size, and a mutable metadata side-channel.
//!
//! Cloning a chunk yields the same logical chunk (shared metadata). Deriving
//! a chunk with new data via [`Chunk::with_data`] forks the metadata so the
//! two can be mutated independently.

pub mod hash;
pub mod series;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;

use crate::error::{Error, Result};

pub use hash::{Hash, HASH_LEN};
pub use series::Series;

// =============================================================================
// Payload
// =============================================================================

type Loader = BoxFuture<'static, Result<Bytes>>;

/// Payload whose source is read at most once, on first access
pub struct LazyData {
    loader: Mutex<Option<Loader>>,
    value: OnceCell<Result<Bytes>>,
}

impl LazyData {
    async fn load(&self) -> Result<Bytes> {
        self.value
            .get_or_init(|| async {
                let loader = self.loader.lock().take();
                match loader {
                    Some(fut) => fut.await,
                    None => Err(Error::DataConsumed),
                }
            })
            .await
            .clone()
    }
}

/// Chunk payload
#[derive(Clone, Default)]
pub enum Data {
    /// No payload (index references, aggregates)
    #[default]
    Empty,
    /// Materialized in-memory buffer
    Buf(Bytes),
    /// Read lazily from a source
    Lazy(Arc<LazyData>),
}

impl Data {
    /// Wrap a future producing the payload; it runs at most once
    pub fn lazy<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = Result<Bytes>> + Send + 'static,
    {
        Data::Lazy(Arc::new(LazyData {
            loader: Mutex::new(Some(fut.boxed())),
            value: OnceCell::new(),
        }))
    }

    /// Read an entire `AsyncRead` lazily
    pub fn from_reader<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Data::lazy(async move {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }

    /// Materialize the payload
    pub async fn bytes(&self) -> Result<Bytes> {
        match self {
            Data::Empty => Ok(Bytes::new()),
            Data::Buf(b) => Ok(b.clone()),
            Data::Lazy(lazy) => lazy.load().await,
        }
    }

    /// Payload length if known without reading
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            Data::Empty => Some(0),
            Data::Buf(b) => Some(b.len() as u64),
            Data::Lazy(lazy) => match lazy.value.get() {
                Some(Ok(b)) => Some(b.len() as u64),
                _ => None,
            },
        }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Empty => write!(f, "Empty"),
            Data::Buf(b) => write!(f, "Buf({} bytes)", b.len()),
            Data::Lazy(lazy) => match lazy.value.get() {
                Some(Ok(b)) => write!(f, "Lazy({} bytes)", b.len()),
                Some(Err(_)) => write!(f, "Lazy(failed)"),
                None => write!(f, "Lazy(pending)"),
            },
        }
    }
}

impl From<Bytes> for Data {
    fn from(b: Bytes) -> Self {
        Data::Buf(b)
    }
}

impl From<Vec<u8>> for Data {
    fn from(v: Vec<u8>) -> Self {
        Data::Buf(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Data {
    fn from(s: &'static [u8]) -> Self {
        Data::Buf(Bytes::from_static(s))
    }
}

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Clone, Default)]
struct MetaState {
    group: Option<Vec<Chunk>>,
    error: Option<Error>,
    values: BTreeMap<String, String>,
}

/// Per-chunk mutable side-channel for ephemeral run state
#[derive(Debug, Clone, Default)]
pub struct Meta(Arc<Mutex<MetaState>>);

impl Meta {
    /// Sibling group attached by a grouping stage
    pub fn group(&self) -> Option<Vec<Chunk>> {
        self.0.lock().group.clone()
    }

    /// Attach a sibling group
    pub fn set_group(&self, members: Vec<Chunk>) {
        self.0.lock().group = Some(members);
    }

    /// Error seen earlier in the pipeline
    pub fn error(&self) -> Option<Error> {
        self.0.lock().error.clone()
    }

    /// Record an error seen earlier in the pipeline
    pub fn set_error(&self, error: Error) {
        self.0.lock().error = Some(error);
    }

    /// Free-form value
    pub fn get(&self, key: &str) -> Option<String> {
        self.0.lock().values.get(key).cloned()
    }

    /// Set a free-form value
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.0.lock().values.insert(key.into(), value.into());
    }

    /// Independent copy
    pub fn fork(&self) -> Meta {
        Meta(Arc::new(Mutex::new(self.0.lock().clone())))
    }
}

// =============================================================================
// Chunk
// =============================================================================

/// Unit of work: content plus per-run metadata
#[derive(Debug, Clone)]
pub struct Chunk {
    num: u64,
    data: Data,
    hash: Option<Hash>,
    target_size: Option<u64>,
    meta: Meta,
}

impl Chunk {
    /// Create a chunk at position `num`
    pub fn new(num: u64, data: impl Into<Data>) -> Self {
        Self {
            num,
            data: data.into(),
            hash: None,
            target_size: None,
            meta: Meta::default(),
        }
    }

    /// Create a chunk whose payload is read lazily from `reader`
    pub fn from_reader<R>(num: u64, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(num, Data::from_reader(reader))
    }

    /// Create a payload-less reference to stored content
    pub fn reference(num: u64, hash: Hash, target_size: Option<u64>) -> Self {
        Self {
            num,
            data: Data::Empty,
            hash: Some(hash),
            target_size,
            meta: Meta::default(),
        }
    }

    /// Create an aggregate chunk exposing `members` as its group
    pub fn aggregate(num: u64, members: Vec<Chunk>) -> Self {
        let target_size = members.first().and_then(|c| c.target_size);
        let chunk = Self {
            num,
            data: Data::Empty,
            hash: None,
            target_size,
            meta: Meta::default(),
        };
        chunk.meta.set_group(members);
        chunk
    }

    /// Position in the series
    pub fn num(&self) -> u64 {
        self.num
    }

    /// Content hash, if a checksum stage has set it
    pub fn hash(&self) -> Option<Hash> {
        self.hash
    }

    /// Content hash, or an error naming the chunk
    pub fn require_hash(&self) -> Result<Hash> {
        self.hash.ok_or(Error::MissingHash { num: self.num })
    }

    /// Expected decoded size
    pub fn target_size(&self) -> Option<u64> {
        self.target_size
    }

    /// Payload handle
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Metadata side-channel
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Members if this is a group aggregate
    pub fn group(&self) -> Option<Vec<Chunk>> {
        self.meta.group()
    }

    /// Materialize the payload
    pub async fn bytes(&self) -> Result<Bytes> {
        self.data.bytes().await
    }

    /// Payload length if known without reading
    pub fn len_hint(&self) -> Option<u64> {
        self.data.len_hint()
    }

    /// Derived chunk with a new payload and forked metadata
    pub fn with_data(&self, data: impl Into<Data>) -> Chunk {
        Chunk {
            num: self.num,
            data: data.into(),
            hash: self.hash,
            target_size: self.target_size,
            meta: self.meta.fork(),
        }
    }

    /// Same chunk at a different position
    pub fn with_num(mut self, num: u64) -> Self {
        self.num = num;
        self
    }

    /// Same chunk with its content hash set
    pub fn with_hash(mut self, hash: Hash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Same chunk with its expected decoded size set
    pub fn with_target_size(mut self, size: u64) -> Self {
        self.target_size = Some(size);
        self
    }
}
