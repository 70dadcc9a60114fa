//! LZ4 compression stage
//!
//! Blocks carry their uncompressed size as a prefix, so decoding needs no
//! side information.

use async_trait::async_trait;

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::pipeline::{once_async, Proc, Res, ResStream};

/// Default LZ4 high-compression level
pub const DEFAULT_LEVEL: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encode,
    Decode,
}

/// Compresses or decompresses each chunk's payload
#[derive(Debug, Clone, Copy)]
pub struct Compress {
    direction: Direction,
    level: i32,
}

impl Compress {
    /// Compress payloads at the default level
    pub fn encode() -> Self {
        Self::encode_with_level(DEFAULT_LEVEL)
    }

    /// Compress payloads at a custom level
    pub fn encode_with_level(level: i32) -> Self {
        Self {
            direction: Direction::Encode,
            level,
        }
    }

    /// Decompress payloads
    pub fn decode() -> Self {
        Self {
            direction: Direction::Decode,
            level: DEFAULT_LEVEL,
        }
    }
}

/// Compress one block with its size prepended
pub fn compress_block(data: &[u8], level: i32) -> Result<Vec<u8>> {
    lz4::block::compress(
        data,
        Some(lz4::block::CompressionMode::HIGHCOMPRESSION(level)),
        true,
    )
    .map_err(|e| Error::CompressionFailed {
        algorithm: "LZ4".into(),
        reason: e.to_string(),
    })
}

/// Decompress a block produced by [`compress_block`]
pub fn decompress_block(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
        algorithm: "LZ4".into(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Proc for Compress {
    fn process(&self, chunk: Chunk) -> ResStream {
        let Compress { direction, level } = *self;
        once_async(async move {
            let converted = match chunk.bytes().await {
                Ok(data) => match direction {
                    Direction::Encode => compress_block(&data, level),
                    Direction::Decode => decompress_block(&data),
                },
                Err(e) => Err(e),
            };
            match converted {
                Ok(out) => Res::Ok(chunk.with_data(out)),
                Err(e) => Res::err(chunk, e),
            }
        })
    }
}
