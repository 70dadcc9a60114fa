//! Erasure coding pipeline stages

use std::collections::HashMap;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tracing::{debug, warn};

use super::codec::ParityCodec;
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::pipeline::{defer, once, once_async, Proc, Res, ResStream};

/// Splits each payload into `k + m` shards
///
/// Shard `i` of chunk `n` is emitted at position `n * (k + m) + i` with the
/// original payload length as its target size, so a `Group(k + m)` further
/// down reassembles exactly one chunk's shards.
pub struct ParityEncode {
    codec: ParityCodec,
}

impl ParityEncode {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        Ok(Self {
            codec: ParityCodec::new(data_shards, parity_shards)?,
        })
    }
}

#[async_trait]
impl Proc for ParityEncode {
    fn process(&self, chunk: Chunk) -> ResStream {
        let codec = self.codec.clone();
        defer(async move {
            let encoded = match chunk.bytes().await {
                Ok(data) => codec.encode(&data).map(|shards| (data.len() as u64, shards)),
                Err(e) => Err(e),
            };
            let (len, shards) = match encoded {
                Ok(encoded) => encoded,
                Err(e) => return once(Res::err(chunk, e)),
            };
            let total = codec.total_shards();
            let base = match chunk
                .num()
                .checked_mul(total as u64)
                .filter(|b| b.checked_add(total as u64 - 1).is_some())
            {
                Some(base) => base,
                None => {
                    let num = chunk.num();
                    return once(Res::err(
                        chunk,
                        Error::ShardPositionOverflow { num, shards: total },
                    ));
                }
            };
            let out: Vec<Res> = shards
                .into_iter()
                .enumerate()
                .map(|(i, shard)| {
                    Res::Ok(Chunk::new(base + i as u64, shard).with_target_size(len))
                })
                .collect();
            stream::iter(out).boxed()
        })
    }
}

/// Rebuilds payloads from `Group(k + m)` aggregates
///
/// Members carrying an error in their metadata, or whose length differs from
/// the most common member length, count as lost.
pub struct ParityDecode {
    codec: ParityCodec,
}

impl ParityDecode {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        Ok(Self {
            codec: ParityCodec::new(data_shards, parity_shards)?,
        })
    }
}

async fn decode(codec: &ParityCodec, chunk: &Chunk) -> Result<Chunk> {
    let total = codec.total_shards();
    let members = match chunk.group() {
        Some(members) if members.len() == total => members,
        _ => {
            return Err(Error::NotAGroup {
                num: chunk.num(),
                expected: total,
            })
        }
    };

    let mut payloads: Vec<Option<Vec<u8>>> = Vec::with_capacity(total);
    for member in &members {
        if let Some(e) = member.meta().error() {
            debug!(num = member.num(), error = %e, "treating shard as missing");
            payloads.push(None);
            continue;
        }
        payloads.push(member.bytes().await.ok().map(|b| b.to_vec()));
    }

    let mut lengths: HashMap<usize, usize> = HashMap::new();
    for p in payloads.iter().flatten() {
        *lengths.entry(p.len()).or_default() += 1;
    }
    let majority = lengths
        .into_iter()
        .max_by_key(|&(len, count)| (count, len))
        .map(|(len, _)| len);
    for p in payloads.iter_mut() {
        if p.as_ref().map(Vec::len) != majority && p.is_some() {
            warn!(bucket = chunk.num(), "dropping shard with odd length");
            *p = None;
        }
    }

    let target = members
        .iter()
        .find(|m| m.meta().error().is_none())
        .and_then(Chunk::target_size)
        .or(chunk.target_size());
    let shard_len = majority.unwrap_or(0);
    let original = target.map_or(shard_len * codec.data_shards(), |t| t as usize);

    let data = codec.decode(&mut payloads, original)?;
    Ok(Chunk::new(chunk.num(), data).with_target_size(original as u64))
}

#[async_trait]
impl Proc for ParityDecode {
    fn process(&self, chunk: Chunk) -> ResStream {
        let codec = self.codec.clone();
        once_async(async move {
            match decode(&codec, &chunk).await {
                Ok(decoded) => Res::Ok(decoded),
                Err(e) => Res::err(chunk, e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{drive, Chain, Group, ProcRef};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    async fn shards(data: &'static [u8]) -> Vec<Chunk> {
        drive(&ParityEncode::new(2, 1).unwrap(), vec![Chunk::new(1, data)])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_encode_numbers_and_sizes() {
        let out = shards(b"hello").await;
        let nums: Vec<u64> = out.iter().map(Chunk::num).collect();
        assert_eq!(nums, vec![3, 4, 5]);
        assert!(out.iter().all(|c| c.target_size() == Some(5)));
        assert_eq!(out[0].bytes().await.unwrap(), "hel");
    }

    #[tokio::test]
    async fn test_decode_with_lost_and_odd_shards() {
        let members = shards(b"hello").await;
        members[0].meta().set_error(Error::Internal("lost".into()));
        let agg = Chunk::aggregate(1, members);
        let out = drive(&ParityDecode::new(2, 1).unwrap(), vec![agg]).await.unwrap();
        assert_eq!(out[0].num(), 1);
        assert_eq!(out[0].bytes().await.unwrap(), "hello");

        let mut members = shards(b"hello").await;
        members[2] = members[2].with_data(b"toolong".to_vec());
        let agg = Chunk::aggregate(1, members);
        let out = drive(&ParityDecode::new(2, 1).unwrap(), vec![agg]).await.unwrap();
        assert_eq!(out[0].bytes().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_too_many_losses() {
        let members = shards(b"hello").await;
        members[0].meta().set_error(Error::Internal("lost".into()));
        members[1].meta().set_error(Error::Internal("lost".into()));
        let out = drive(&ParityDecode::new(2, 1).unwrap(), vec![Chunk::aggregate(1, members)]).await;
        assert_matches!(
            out,
            Err(Error::InsufficientShards {
                available: 1,
                required: 2
            })
        );
    }

    #[tokio::test]
    async fn test_encode_rejects_unnumberable_chunk() {
        let encode = ParityEncode::new(2, 1).unwrap();
        let out = drive(&encode, vec![Chunk::new(u64::MAX / 2, b"x".to_vec())]).await;
        assert_matches!(out, Err(Error::ShardPositionOverflow { shards: 3, .. }));
    }

    #[tokio::test]
    async fn test_rejects_non_group() {
        let out = drive(&ParityDecode::new(2, 1).unwrap(), vec![Chunk::new(0, b"x".to_vec())]).await;
        assert_matches!(out, Err(Error::NotAGroup { num: 0, expected: 3 }));
    }

    #[tokio::test]
    async fn test_encode_group_decode_chain() {
        let chain = Chain::new(vec![
            Arc::new(ParityEncode::new(3, 2).unwrap()) as ProcRef,
            Arc::new(Group::new(5).unwrap()),
            Arc::new(ParityDecode::new(3, 2).unwrap()),
        ]);
        let seeds = vec![
            Chunk::new(0, b"first payload".to_vec()),
            Chunk::new(1, b"second".to_vec()),
        ];
        let out = drive(&chain, seeds).await.unwrap();
        assert_eq!(out[0].bytes().await.unwrap(), "first payload");
        assert_eq!(out[1].bytes().await.unwrap(), "second");
    }
}
