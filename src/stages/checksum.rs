//! SHA-256 checksum stage

use async_trait::async_trait;

use crate::chunk::{Chunk, Hash};
use crate::error::{Error, Result};
use crate::pipeline::{once_async, Proc, Res, ResStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Compute,
    Verify,
}

/// Computes or verifies the content hash of each chunk
#[derive(Debug, Clone, Copy)]
pub struct Checksum {
    mode: Mode,
}

impl Checksum {
    /// Set each chunk's hash from its payload
    pub fn compute() -> Self {
        Self {
            mode: Mode::Compute,
        }
    }

    /// Fail chunks whose payload does not match their hash
    pub fn verify() -> Self {
        Self { mode: Mode::Verify }
    }
}

async fn apply(mode: Mode, chunk: &Chunk) -> Result<Option<Hash>> {
    let data = chunk.bytes().await?;
    let actual = Hash::of(&data);
    match mode {
        Mode::Compute => Ok(Some(actual)),
        Mode::Verify => {
            let expected = chunk.require_hash()?;
            if expected != actual {
                return Err(Error::ChecksumMismatch { expected, actual });
            }
            Ok(None)
        }
    }
}

#[async_trait]
impl Proc for Checksum {
    fn process(&self, chunk: Chunk) -> ResStream {
        let mode = self.mode;
        once_async(async move {
            match apply(mode, &chunk).await {
                Ok(Some(hash)) => Res::Ok(chunk.with_hash(hash)),
                Ok(None) => Res::Ok(chunk),
                Err(e) => Res::err(chunk, e),
            }
        })
    }
}
