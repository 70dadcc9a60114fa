//! Reed-Solomon Codec
//!
//! Splits a payload into `k` zero-padded data shards and computes `m` parity
//! shards with the `reed-solomon-erasure` crate. Any `k` of the `k + m`
//! shards are enough to rebuild the payload.

use std::sync::Arc;

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Erasure codec for a fixed `k + m` layout
#[derive(Clone)]
pub struct ParityCodec {
    rs: Arc<ReedSolomon>,
    data_shards: usize,
    parity_shards: usize,
}

impl ParityCodec {
    /// Create a codec with `data_shards` (k) and `parity_shards` (m)
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(Error::InvalidEcConfig(
                "data shards must be greater than 0".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(Error::InvalidEcConfig(
                "parity shards must be greater than 0".to_string(),
            ));
        }
        let rs = ReedSolomon::new(data_shards, parity_shards)
            .map_err(|e| Error::InvalidEcConfig(format!("Reed-Solomon setup failed: {}", e)))?;

        Ok(Self {
            rs: Arc::new(rs),
            data_shards,
            parity_shards,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Shard length for a payload of `len` bytes; never zero
    pub fn shard_size(&self, len: usize) -> usize {
        len.div_ceil(self.data_shards).max(1)
    }

    /// Split `data` into data shards followed by parity shards
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let shard_size = self.shard_size(data.len());
        let mut shards: Vec<Vec<u8>> = data
            .chunks(shard_size)
            .map(|piece| {
                let mut shard = piece.to_vec();
                shard.resize(shard_size, 0);
                shard
            })
            .collect();
        shards.resize(self.total_shards(), vec![0u8; shard_size]);

        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::EcEncodingFailed(e.to_string()))?;

        debug!(
            "Encoded {} bytes into {} shards of {} bytes",
            data.len(),
            self.total_shards(),
            shard_size
        );
        Ok(shards)
    }

    /// Check parity against data shards
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        self.check_count(shards.len())?;
        self.rs
            .verify(shards)
            .map_err(|e| Error::EcReconstructionFailed(e.to_string()))
    }

    /// Fill in every missing (`None`) shard
    #[instrument(skip(self, shards))]
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_count(shards.len())?;
        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_shards,
            });
        }
        self.rs
            .reconstruct(shards)
            .map_err(|e| Error::EcReconstructionFailed(e.to_string()))?;

        debug!(
            "Reconstructed shards from {}/{} available",
            available,
            self.total_shards()
        );
        Ok(())
    }

    /// Rebuild, verify and join the data shards, trimmed to `original_size`
    #[instrument(skip(self, shards))]
    pub fn decode(&self, shards: &mut [Option<Vec<u8>>], original_size: usize) -> Result<Vec<u8>> {
        self.reconstruct(shards)?;
        let full: Vec<Vec<u8>> = shards.iter_mut().filter_map(Option::take).collect();
        if !self.verify(&full)? {
            return Err(Error::EcReconstructionFailed(
                "parity does not match data shards".to_string(),
            ));
        }

        let mut data: Vec<u8> = full
            .into_iter()
            .take(self.data_shards)
            .flatten()
            .collect();
        data.truncate(original_size);
        Ok(data)
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count != self.total_shards() {
            return Err(Error::InvalidEcConfig(format!(
                "expected {} shards, got {}",
                self.total_shards(),
                count
            )));
        }
        Ok(())
    }
}
