//! Ordering stages
//!
//! Fan-out loses ordering across chunks. [`Sort`] restores a contiguous
//! series; [`Group`] reassembles fixed-size sibling buckets for stages that
//! need every sibling at once (erasure decode).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tracing::debug;

use super::{once, Capabilities, Proc, Res, ResStream};
use crate::chunk::{Chunk, Series};
use crate::concurrency::FinishOnce;
use crate::error::{Error, Result};

// =============================================================================
// Sort
// =============================================================================

/// Releases chunks in `num` order
pub struct Sort {
    series: Mutex<Series<Chunk>>,
    finished: FinishOnce,
}

impl Sort {
    /// Sort a series starting at 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Sort a series whose first position is `base`
    pub fn starting_at(base: u64) -> Self {
        Self {
            series: Mutex::new(Series::starting_at(base)),
            finished: FinishOnce::new(),
        }
    }
}

impl Default for Sort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Proc for Sort {
    fn process(&self, chunk: Chunk) -> ResStream {
        let mut series = self.series.lock();
        if let Err(e) = series.insert(chunk.num(), chunk.clone()) {
            return once(Res::err(chunk, e));
        }
        let ready: Vec<Res> = series.drain_ready().into_iter().map(Res::Ok).collect();
        stream::iter(ready).boxed()
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| async { self.series.lock().check_complete() })
            .await
    }
}

// =============================================================================
// Group
// =============================================================================

#[derive(Debug, Default)]
struct Buckets {
    open: HashMap<u64, Vec<Chunk>>,
    emitted: HashSet<u64>,
}

/// Bundles every `size` consecutive chunks into one aggregate
///
/// Chunk `n` belongs to bucket `n / size`. A complete bucket is emitted as
/// `Chunk::aggregate(bucket, members)` with members sorted by `num`.
#[derive(Debug)]
pub struct Group {
    size: u64,
    buckets: Mutex<Buckets>,
    finished: FinishOnce,
}

impl Group {
    /// Group `size` chunks per bucket; `size` must be at least 1
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("group size must be at least 1".into()));
        }
        Ok(Self {
            size: size as u64,
            buckets: Mutex::new(Buckets::default()),
            finished: FinishOnce::new(),
        })
    }

    /// Members per bucket
    pub fn size(&self) -> usize {
        self.size as usize
    }

    fn add(&self, chunk: Chunk) -> ResStream {
        let num = chunk.num();
        let bucket = num / self.size;

        let mut state = self.buckets.lock();
        if state.emitted.contains(&bucket) {
            return once(Res::err(chunk, Error::GroupOverflow { bucket, num }));
        }
        let members = state.open.entry(bucket).or_default();
        if members.iter().any(|c| c.num() == num) {
            return once(Res::err(chunk, Error::GroupOverflow { bucket, num }));
        }
        members.push(chunk);
        if (members.len() as u64) < self.size {
            return super::empty();
        }

        let mut members = state.open.remove(&bucket).unwrap_or_default();
        state.emitted.insert(bucket);
        drop(state);

        members.sort_by_key(Chunk::num);
        let first = bucket * self.size;
        let contiguous = members
            .iter()
            .enumerate()
            .all(|(i, c)| c.num() == first + i as u64);
        if !contiguous {
            return once(Res::orphan(Error::NonContiguousGroup { bucket }));
        }
        once(Res::Ok(Chunk::aggregate(bucket, members)))
    }
}

#[async_trait]
impl Proc for Group {
    fn process(&self, chunk: Chunk) -> ResStream {
        self.add(chunk)
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| async {
                let state = self.buckets.lock();
                if state.open.is_empty() {
                    return Ok(());
                }
                let mut buckets: Vec<u64> = state.open.keys().copied().collect();
                buckets.sort_unstable();
                Err(Error::IncompleteGroups { buckets })
            })
            .await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            recover: true,
            end: false,
        }
    }

    fn recover(&self, chunk: Chunk, error: Error) -> ResStream {
        debug!(num = chunk.num(), error = %error, "group member failed, keeping it as missing");
        chunk.meta().set_error(error);
        self.add(chunk)
    }
}
