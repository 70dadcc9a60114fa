//! Failover reads across every backend holding a hash

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{reader, Backends, CopierId};
use crate::chunk::Chunk;
use crate::error::Error;
use crate::pipeline::{once, Cascade, Chain, OnEnd, Proc, ProcRef, Res, ResStream};
use crate::stages::Checksum;

/// Reads a chunk from any backend known to hold it
///
/// Owners are snapshotted from the registry and shuffled, then tried in turn.
/// An owner whose read fails is removed from the registry. With verification
/// enabled a copy whose bytes do not match the hash counts as a failed read.
pub struct MultiReader {
    backends: Arc<Backends>,
    verify: bool,
}

impl MultiReader {
    pub fn new(backends: Arc<Backends>) -> Self {
        Self {
            backends,
            verify: false,
        }
    }

    /// Verify every copy before accepting it
    pub fn verified(backends: Arc<Backends>) -> Self {
        Self {
            backends,
            verify: true,
        }
    }

    fn alternative(&self, id: &CopierId) -> Option<ProcRef> {
        let copier = self.backends.get(id)?;
        let read: ProcRef = if self.verify {
            Arc::new(Chain::new(vec![reader(&copier), Arc::new(Checksum::verify())]))
        } else {
            reader(&copier)
        };

        let registry = self.backends.registry().clone();
        let owner = id.clone();
        let on_end = OnEnd::new(read, move |chunk, err| {
            let (Some(err), Some(hash)) = (err, chunk.hash()) else {
                return;
            };
            if registry.remove(&hash, &owner) {
                warn!(copier = %owner, %hash, error = %err, "dropping failed copy from registry");
            }
        });
        Some(Arc::new(on_end))
    }
}

#[async_trait]
impl Proc for MultiReader {
    fn process(&self, chunk: Chunk) -> ResStream {
        let hash = match chunk.require_hash() {
            Ok(hash) => hash,
            Err(e) => return once(Res::err(chunk, e)),
        };

        let mut owners: Vec<CopierId> = self
            .backends
            .registry()
            .owners(&hash)
            .into_iter()
            .collect();
        self.backends.shuffle().apply(&mut owners);

        let alternatives: Vec<ProcRef> = owners
            .iter()
            .filter_map(|id| self.alternative(id))
            .collect();
        if alternatives.is_empty() {
            return once(Res::err(chunk, Error::NoDataAvailable(hash)));
        }
        debug!(num = chunk.num(), %hash, owners = alternatives.len(), "reading");

        Cascade::new(alternatives).process(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Hash;
    use crate::copier::{Copier, CopierRef, MemCopier};
    use crate::pipeline::collect;
    use crate::placement::{Quota, Shuffle};
    use assert_matches::assert_matches;
    use bytes::Bytes;

    async fn setup() -> (Arc<Backends>, Vec<Arc<MemCopier>>, Hash) {
        let backends = Arc::new(Backends::new(Shuffle::by_id()));
        let hash = Hash::of(b"payload");
        let mut mems = Vec::new();
        for id in ["a", "b", "c"] {
            let mem = Arc::new(MemCopier::new(id));
            mem.put(hash, Bytes::from_static(b"payload")).await.unwrap();
            backends.add(mem.clone() as CopierRef, Quota::Unlimited);
            mems.push(mem);
        }
        backends.load().await.unwrap();
        (backends, mems, hash)
    }

    #[tokio::test]
    async fn test_fails_over_and_prunes() {
        let (backends, mems, hash) = setup().await;
        mems[0].fail_reads(true);
        mems[1].corrupt(&hash);

        let reader = MultiReader::verified(backends.clone());
        let results = collect(reader.process(Chunk::reference(0, hash, Some(7)))).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk().unwrap().bytes().await.unwrap(), "payload");
        let owners = backends.registry().owners(&hash);
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec![CopierId::new("c")]);
    }

    #[tokio::test]
    async fn test_no_owners_contacts_nobody() {
        let (backends, mems, _) = setup().await;
        let unknown = Hash::of(b"unknown");
        let reader = MultiReader::new(backends);
        let results = collect(reader.process(Chunk::reference(0, unknown, None))).await;

        assert_matches!(results[0].error(), Some(Error::NoDataAvailable(h)) if *h == unknown);
        assert!(mems.iter().all(|m| m.reads() == 0));
    }
}
