//! Placement Integration Tests
//!
//! Replication convergence, anti-affinity and quota handling across a live
//! backend set.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use bytes::Bytes;
use chunkvault::chunk::{Chunk, Hash};
use chunkvault::copier::{Backends, Copier, CopierId, CopierRef, MemCopier, MultiReader};
use chunkvault::error::{Error, ErrorClass};
use chunkvault::pipeline::{collect, drive, Concur, Proc};
use chunkvault::placement::{MinCopies, Quota, QuotaManager, Shuffle, StripeProcer};

fn hashed(num: u64, data: &[u8]) -> Chunk {
    Chunk::new(num, data.to_vec()).with_hash(Hash::of(data))
}

fn mem(id: &str) -> Arc<MemCopier> {
    Arc::new(MemCopier::new(id))
}

#[tokio::test]
async fn test_new_backend_closes_shortfall() {
    let backends = Arc::new(Backends::new(Shuffle::by_id()));
    backends.add(mem("a") as CopierRef, Quota::Unlimited);
    let store = Concur::new(4, Arc::new(MinCopies::new(2, backends.clone())));

    let results = collect(store.process(hashed(0, b"payload"))).await;
    let err = results
        .iter()
        .find_map(|r| r.error())
        .expect("shortfall expected");
    assert_eq!(err.class(), ErrorClass::Shortfall);
    assert!(backends.registry().owners(&Hash::of(b"payload")).is_empty());

    backends.add(mem("b") as CopierRef, Quota::Unlimited);
    drive(&store, vec![hashed(0, b"payload")]).await.expect("placement");
    assert_eq!(backends.registry().owners(&Hash::of(b"payload")).len(), 2);
}

#[tokio::test]
async fn test_failover_read_repairs_on_next_placement() {
    let backends = Arc::new(Backends::new(Shuffle::by_id()));
    let mems = [mem("a"), mem("b"), mem("c")];
    for m in &mems {
        backends.add(m.clone() as CopierRef, Quota::Unlimited);
    }
    let store = Concur::new(4, Arc::new(MinCopies::new(2, backends.clone())));
    let hash = Hash::of(b"payload");
    drive(&store, vec![hashed(0, b"payload")]).await.expect("placement");

    // Break one copy; a verified read fails over and forgets it.
    let broken = mems.iter().find(|m| m.contains(&hash)).expect("a copy");
    broken.corrupt(&hash);
    let out = drive(
        &MultiReader::verified(backends.clone()),
        vec![Chunk::reference(0, hash, None)],
    )
    .await
    .expect("read");
    assert_eq!(out[0].bytes().await.expect("payload"), "payload");

    // Owners are tried in id order, so the broken copy was read and forgotten.
    assert_eq!(broken.reads(), 1);
    assert!(!backends.registry().owners(&hash).contains(broken.id()));
    assert_eq!(backends.registry().owners(&hash).len(), 1);

    drive(&store, vec![hashed(0, b"payload")]).await.expect("repair");
    assert_eq!(backends.registry().owners(&hash).len(), 2);
}

#[tokio::test]
async fn test_stripe_members_on_distinct_backends() {
    let backends = Arc::new(Backends::new(Shuffle::by_id()));
    for i in 0..6 {
        backends.add(mem(&format!("s{}", i)) as CopierRef, Quota::Unlimited);
    }
    let stripe = Concur::new(
        8,
        Arc::new(StripeProcer::new(2, 2, backends.clone()).expect("stripe")),
    );
    let members = vec![hashed(0, b"x"), hashed(1, b"y"), hashed(2, b"z")];
    let out = drive(&stripe, vec![Chunk::aggregate(0, members)])
        .await
        .expect("placement");
    assert_eq!(out.len(), 3);

    let mut all = BTreeSet::new();
    for data in [b"x", b"y", b"z"] {
        let owners = backends.registry().owners(&Hash::of(data));
        assert_eq!(owners.len(), 2);
        all.extend(owners);
    }
    assert_eq!(all.len(), 6);
}

#[tokio::test]
async fn test_loaded_usage_evicts_full_backend() {
    let updates = Arc::new(AtomicUsize::new(0));
    let seen = updates.clone();
    let quota = QuotaManager::with_observer(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    let backends = Arc::new(Backends::with_quota(Shuffle::by_id(), quota));

    let full = mem("a");
    full.put(Hash::of(b"old!"), Bytes::from_static(b"old!"))
        .await
        .expect("seed");
    backends.add(full.clone() as CopierRef, Quota::Limited(4));
    let spare = mem("b");
    backends.add(spare.clone() as CopierRef, Quota::Unlimited);

    assert_eq!(backends.load().await.expect("load"), 1);
    assert!(backends.quota().usage(&CopierId::new("a")).is_none());
    assert_eq!(backends.quota().resources(1), vec![CopierId::new("b")]);

    // Known content is not written again; new content avoids the full backend.
    let store = Concur::new(4, Arc::new(MinCopies::new(1, backends.clone())));
    drive(&store, vec![hashed(0, b"old!"), hashed(1, b"new")])
        .await
        .expect("placement");
    assert_eq!(full.writes(), 1);
    assert!(spare.contains(&Hash::of(b"new")));
    assert!(!spare.contains(&Hash::of(b"old!")));
    assert!(updates.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_missing_hash_is_invalid() {
    let backends = Arc::new(Backends::new(Shuffle::by_id()));
    backends.add(mem("a") as CopierRef, Quota::Unlimited);
    let store = Concur::new(4, Arc::new(MinCopies::new(1, backends)));
    let results = collect(store.process(Chunk::new(0, b"raw".to_vec()))).await;
    assert_matches!(results[0].error(), Some(Error::MissingHash { num: 0 }));
}
