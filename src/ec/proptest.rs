//! Property-Based Tests for Erasure Coding
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: decode(encode(data)) = data
//! 2. **Fault Tolerance**: any pattern of up to m lost shards is recoverable
//! 3. **Failure Mode**: m + 1 lost shards is an error, never wrong data
//! 4. **Determinism**: same input always produces same shards

use proptest::prelude::*;

use super::codec::ParityCodec;

/// k: 1-6 data shards, m: 1-3 parity shards
fn config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=6, 1usize..=3)
}

fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2000)
}

fn wrap(shards: Vec<Vec<u8>>) -> Vec<Option<Vec<u8>>> {
    shards.into_iter().map(Some).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_roundtrip_no_loss(
        (k, m) in config_strategy(),
        data in data_strategy(),
    ) {
        let codec = ParityCodec::new(k, m)?;
        let shards = codec.encode(&data)?;
        prop_assert_eq!(shards.len(), k + m);
        prop_assert!(shards.iter().all(|s| s.len() == codec.shard_size(data.len())));

        let recovered = codec.decode(&mut wrap(shards), data.len())?;
        prop_assert_eq!(recovered, data);
    }

    /// Recovery works regardless of WHICH shards are lost.
    #[test]
    fn prop_any_erasure_pattern(
        (k, m) in config_strategy(),
        data in data_strategy(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 0..=3),
    ) {
        let codec = ParityCodec::new(k, m)?;
        let mut shards = wrap(codec.encode(&data)?);

        let mut lost: Vec<usize> = picks.iter().map(|p| p.index(k + m)).collect();
        lost.sort_unstable();
        lost.dedup();
        lost.truncate(m);
        for &i in &lost {
            shards[i] = None;
        }

        let recovered = codec.decode(&mut shards, data.len())?;
        prop_assert_eq!(recovered, data, "k={} m={} lost={:?}", k, m, lost);
    }

    #[test]
    fn prop_too_many_erasures_fails(
        (k, m) in config_strategy(),
        data in data_strategy(),
    ) {
        let codec = ParityCodec::new(k, m)?;
        let mut shards = wrap(codec.encode(&data)?);
        for shard in shards.iter_mut().take(m + 1) {
            *shard = None;
        }
        prop_assert!(codec.decode(&mut shards, data.len()).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_data_shards_hold_payload_prefix(
        (k, m) in config_strategy(),
        data in data_strategy(),
    ) {
        let codec = ParityCodec::new(k, m)?;
        let shards = codec.encode(&data)?;
        let joined: Vec<u8> = shards[..k].concat();
        prop_assert!(joined.len() >= data.len());
        prop_assert_eq!(&joined[..data.len()], data.as_slice());
    }

    #[test]
    fn prop_encoding_deterministic(
        (k, m) in config_strategy(),
        data in data_strategy(),
    ) {
        let first = ParityCodec::new(k, m)?.encode(&data)?;
        let second = ParityCodec::new(k, m)?.encode(&data)?;
        prop_assert_eq!(first, second);
    }
}
