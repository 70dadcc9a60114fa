//! Stripe placement as a dynamic fan-out

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::instrument;

use super::stripe::{place, RoundRobin, StripeItem};
use super::{EmitChunks, InFlight, PlacementGuard, PlannedProc, RegisterWrite};
use crate::chunk::{Chunk, Hash};
use crate::copier::{Backends, CopierId};
use crate::error::{Error, Result};
use crate::pipeline::{DiscardChunks, DynProcer, ProcRef};

/// Places a chunk, or every member of a group aggregate, with anti-affinity
///
/// Emits each member as an individual chunk and writes every missing copy.
pub struct StripeProcer {
    min: usize,
    distinct: usize,
    backends: Arc<Backends>,
    cursor: Mutex<RoundRobin>,
    in_flight: InFlight,
}

impl StripeProcer {
    /// `min` copies per item, the first `distinct` of them exclusive to it
    pub fn new(min: usize, distinct: usize, backends: Arc<Backends>) -> Result<Self> {
        if min == 0 {
            return Err(Error::Config("stripe needs at least one copy".into()));
        }
        Ok(Self {
            min,
            distinct: distinct.min(min),
            backends,
            cursor: Mutex::new(RoundRobin::new()),
            in_flight: InFlight::default(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }
}

#[async_trait]
impl DynProcer for StripeProcer {
    #[instrument(skip(self, chunk), fields(num = chunk.num()))]
    async fn procs(&self, chunk: &Chunk) -> Result<Vec<ProcRef>> {
        let members = chunk.group().unwrap_or_else(|| vec![chunk.clone()]);
        if let Some(err) = members.iter().find_map(|m| m.meta().error()) {
            return Err(err);
        }

        let mut total = 0u64;
        let mut hashes = Vec::with_capacity(members.len());
        for member in &members {
            hashes.push(member.require_hash()?);
            total += member.bytes().await?.len() as u64;
        }
        let mut lock_order: Vec<Hash> = hashes.clone();
        lock_order.sort();
        lock_order.dedup();
        let guard = PlacementGuard::acquire(&self.backends, &lock_order, &self.in_flight).await;

        let eligible: BTreeSet<CopierId> = self
            .backends
            .quota()
            .resources(total)
            .into_iter()
            .filter(|id| self.backends.get(id).is_some())
            .collect();
        let items: Vec<StripeItem> = hashes
            .iter()
            .map(|hash| StripeItem {
                hash: *hash,
                existing: self.backends.registry().owners(hash),
            })
            .collect();
        let placements = {
            let mut cursor = self.cursor.lock();
            place(&items, &eligible, &mut cursor, self.min, self.distinct)?
        };

        let mut procs = vec![PlannedProc::new(
            Arc::new(EmitChunks::new(members.clone())),
            &guard,
        )];
        for (member, placement) in members.iter().zip(&placements) {
            for id in &placement.assigned {
                let copier = self.backends.require(id)?;
                let write = RegisterWrite::new(copier, self.backends.clone());
                procs.push(PlannedProc::on(
                    Arc::new(DiscardChunks::new(Arc::new(write))),
                    member.clone(),
                    &guard,
                ));
            }
        }
        Ok(procs)
    }

    async fn finish(&self) -> Result<()> {
        match self.in_flight.count() {
            0 => Ok(()),
            n => Err(Error::PlacementsInFlight(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copier::{CopierRef, MemCopier};
    use crate::pipeline::{collect, drive, Concur, Proc};
    use crate::placement::{Quota, Shuffle};
    use assert_matches::assert_matches;

    fn setup(n: usize) -> Arc<Backends> {
        let backends = Arc::new(Backends::new(Shuffle::by_id()));
        for i in 0..n {
            let mem: CopierRef = Arc::new(MemCopier::new(format!("s{}", i)));
            backends.add(mem, Quota::Unlimited);
        }
        backends
    }

    fn shard(num: u64, data: &[u8]) -> Chunk {
        Chunk::new(num, data.to_vec()).with_hash(Hash::of(data))
    }

    #[tokio::test]
    async fn test_group_members_spread_over_backends() {
        let backends = setup(4);
        let store = Concur::new(
            4,
            Arc::new(StripeProcer::new(1, 1, backends.clone()).unwrap()),
        );
        let members = vec![shard(0, b"a"), shard(1, b"b"), shard(2, b"c")];
        let out = drive(&store, vec![Chunk::aggregate(0, members)]).await.unwrap();

        let mut nums: Vec<u64> = out.iter().map(Chunk::num).collect();
        nums.sort();
        assert_eq!(nums, vec![0, 1, 2]);

        let mut owners = BTreeSet::new();
        for data in [b"a", b"b", b"c"] {
            let held = backends.registry().owners(&Hash::of(data));
            assert_eq!(held.len(), 1);
            owners.extend(held);
        }
        assert_eq!(owners.len(), 3);
    }

    #[tokio::test]
    async fn test_plain_chunk_is_one_item() {
        let backends = setup(3);
        let store = Concur::new(
            4,
            Arc::new(StripeProcer::new(2, 2, backends.clone()).unwrap()),
        );
        drive(&store, vec![shard(5, b"solo")]).await.unwrap();
        assert_eq!(backends.registry().owners(&Hash::of(b"solo")).len(), 2);
    }

    #[tokio::test]
    async fn test_member_error_fails_placement() {
        let backends = setup(3);
        let store = Concur::new(4, Arc::new(StripeProcer::new(1, 1, backends).unwrap()));
        let broken = shard(1, b"b");
        broken.meta().set_error(Error::Internal("lost".into()));
        let agg = Chunk::aggregate(0, vec![shard(0, b"a"), broken]);

        let results = collect(store.process(agg)).await;
        assert_eq!(results.len(), 1);
        assert_matches!(results[0].error(), Some(Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_not_enough_targets() {
        let backends = setup(1);
        let store = Concur::new(4, Arc::new(StripeProcer::new(2, 1, backends).unwrap()));
        let results = collect(store.process(shard(0, b"x"))).await;
        assert_matches!(results[0].error(), Some(Error::NotEnoughTargets { .. }));
        assert!(store.finish().await.is_ok());
    }
}
