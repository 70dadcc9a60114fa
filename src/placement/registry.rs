//! Copy registry: which backends hold which hash
//!
//! Membership under-approximates the truth: an owner is added only after a
//! successful write and removed after a failed read.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::chunk::Hash;
use crate::copier::CopierId;

/// Owners of one hash plus its placement lock
#[derive(Default)]
pub struct CopyList {
    lock: Arc<Mutex<()>>,
    owners: RwLock<BTreeSet<CopierId>>,
}

/// Hash → owner set, sharded by hash
#[derive(Default)]
pub struct CopyRegistry {
    entries: DashMap<Hash, Arc<CopyList>>,
}

impl CopyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, hash: &Hash) -> Arc<CopyList> {
        self.entries.entry(*hash).or_default().clone()
    }

    /// Record every hash listed by `id`
    pub fn load(&self, id: &CopierId, hashes: impl IntoIterator<Item = Hash>) {
        for hash in hashes {
            self.add(&hash, id);
        }
    }

    /// Snapshot of the backends holding `hash`
    pub fn owners(&self, hash: &Hash) -> BTreeSet<CopierId> {
        match self.entries.get(hash) {
            Some(list) => list.owners.read().clone(),
            None => BTreeSet::new(),
        }
    }

    /// Record a copy; true if it was not known
    pub fn add(&self, hash: &Hash, id: &CopierId) -> bool {
        self.entry(hash).owners.write().insert(id.clone())
    }

    /// Forget a copy; true if it was known
    pub fn remove(&self, hash: &Hash, id: &CopierId) -> bool {
        match self.entries.get(hash) {
            Some(list) => list.owners.write().remove(id),
            None => false,
        }
    }

    /// Take the placement lock for `hash`
    pub async fn lock(&self, hash: &Hash) -> OwnedMutexGuard<()> {
        let lock = self.entry(hash).lock.clone();
        lock.lock_owned().await
    }

    /// Number of known hashes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of hashes `id` is known to hold
    pub fn held_by(&self, id: &CopierId) -> usize {
        self.entries
            .iter()
            .filter(|e| e.value().owners.read().contains(id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_add_remove_owners() {
        let registry = CopyRegistry::new();
        let hash = Hash::of(b"x");
        let a = CopierId::new("a");

        assert!(registry.owners(&hash).is_empty());
        assert!(registry.add(&hash, &a));
        assert!(!registry.add(&hash, &a));
        assert_eq!(registry.held_by(&a), 1);
        assert!(registry.remove(&hash, &a));
        assert!(!registry.remove(&hash, &a));
        assert!(!registry.remove(&Hash::of(b"y"), &a));
    }

    #[tokio::test]
    async fn test_lock_is_per_hash() {
        let registry = Arc::new(CopyRegistry::new());
        let x = Hash::of(b"x");
        let held = registry.lock(&x).await;

        // A different hash is not blocked.
        let _other = registry.lock(&Hash::of(b"y")).await;

        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _g = registry.lock(&x).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());
        drop(held);
        contender.await.unwrap();
    }
}
