//! In-memory backend with fault injection

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{Copier, CopierId};
use crate::chunk::Hash;
use crate::error::{Error, Result};

/// Backend keeping blobs in a concurrent map
///
/// Faults can be injected to exercise failover: failing every read or write,
/// corrupting a stored blob, or deleting it behind the registry's back.
pub struct MemCopier {
    id: CopierId,
    blobs: DashMap<Hash, Bytes>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemCopier {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: CopierId::new(id),
            blobs: DashMap::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make every read fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Flip the first byte of a stored blob
    pub fn corrupt(&self, hash: &Hash) -> bool {
        match self.blobs.get_mut(hash) {
            Some(mut blob) => {
                let mut data = blob.to_vec();
                match data.first_mut() {
                    Some(b) => *b ^= 0xff,
                    None => data.push(0),
                }
                *blob = Bytes::from(data);
                true
            }
            None => false,
        }
    }

    /// Drop a stored blob
    pub fn delete(&self, hash: &Hash) -> bool {
        self.blobs.remove(hash).is_some()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blobs.contains_key(hash)
    }

    /// Stored hashes
    pub fn hashes(&self) -> Vec<Hash> {
        self.blobs.iter().map(|e| *e.key()).collect()
    }

    /// Number of read attempts
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Copier for MemCopier {
    fn id(&self) -> &CopierId {
        &self.id
    }

    async fn ls(&self) -> Result<Vec<(Hash, u64)>> {
        Ok(self
            .blobs
            .iter()
            .map(|e| (*e.key(), e.value().len() as u64))
            .collect())
    }

    async fn put(&self, hash: Hash, data: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Backend {
                copier: self.id.to_string(),
                reason: "injected write failure".into(),
            });
        }
        self.blobs.insert(hash, data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, hash: Hash) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Backend {
                copier: self.id.to_string(),
                reason: "injected read failure".into(),
            });
        }
        self.blobs
            .get(&hash)
            .map(|b| b.value().clone())
            .ok_or_else(|| Error::NotFound {
                copier: self.id.to_string(),
                hash,
            })
    }
}
