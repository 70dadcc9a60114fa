//! Fixed-size splitter

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::sync::Mutex;

use crate::chunk::Chunk;
use crate::pipeline::{defer, once, Proc, Res, ResStream};

/// Splits payloads into pieces of at most `size` bytes
///
/// Output positions come from a running counter, so seeds submitted one after
/// another yield a single contiguous series. Each piece carries its own length
/// as target size. An empty payload yields nothing.
pub struct Split {
    size: usize,
    next: Arc<Mutex<u64>>,
}

impl Split {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            next: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl Proc for Split {
    fn process(&self, chunk: Chunk) -> ResStream {
        let size = self.size;
        let next = self.next.clone();
        defer(async move {
            // Held across the read so positions follow submission order.
            let mut next = next.lock().await;
            let data = match chunk.bytes().await {
                Ok(data) => data,
                Err(e) => return once(Res::err(chunk, e)),
            };
            let base = *next;
            let pieces: Vec<Res> = (0..data.len())
                .step_by(size)
                .enumerate()
                .map(|(i, start)| {
                    let end = (start + size).min(data.len());
                    Res::Ok(
                        Chunk::new(base + i as u64, data.slice(start..end))
                            .with_target_size((end - start) as u64),
                    )
                })
                .collect();
            *next += pieces.len() as u64;
            stream::iter(pieces).boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Data;
    use crate::pipeline::drive;

    #[tokio::test]
    async fn test_pieces_are_contiguous_across_seeds() {
        let split = Split::new(4);
        let seeds = vec![
            Chunk::new(0, b"abcdefghij".to_vec()),
            Chunk::from_reader(1, &b"klmno"[..]),
        ];
        let out = drive(&split, seeds).await.unwrap();

        let nums: Vec<u64> = out.iter().map(Chunk::num).collect();
        assert_eq!(nums, vec![0, 1, 2, 3, 4]);
        let mut joined = Vec::new();
        for c in &out {
            assert!(c.bytes().await.unwrap().len() <= 4);
            assert_eq!(c.target_size(), Some(c.bytes().await.unwrap().len() as u64));
            joined.extend_from_slice(&c.bytes().await.unwrap());
        }
        assert_eq!(joined, b"abcdefghijklmno");
    }

    #[tokio::test]
    async fn test_empty_payload_yields_nothing() {
        let out = drive(&Split::new(8), vec![Chunk::new(0, Data::Empty)])
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
