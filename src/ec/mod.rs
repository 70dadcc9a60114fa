//! Erasure Coding Module
//!
//! Space-efficient redundancy: each payload becomes `k` data shards plus `m`
//! parity shards, and any `k` surviving shards rebuild it.
//!
//! # Architecture
//!
//! ```text
//!   Chunk n ──▶ ParityEncode(k, m) ──▶ shards n·(k+m) .. n·(k+m)+k+m-1
//!                                             │
//!                                   (compress, checksum, store)
//!                                             │
//!   Chunk n ◀── ParityDecode(k, m) ◀── Group(k+m) ◀── (read, verify)
//! ```
//!
//! - **Codec** (`codec.rs`): Reed-Solomon over GF(2^8) via the
//!   `reed-solomon-erasure` crate
//! - **Stages** (`stages.rs`): the encode/decode pipeline stages. A shard
//!   that failed upstream reaches the decoder as a group member with an error
//!   in its metadata and is treated as lost.
//!
//! # Usage
//!
//! ```rust
//! use chunkvault::ec::ParityCodec;
//!
//! let codec = ParityCodec::new(4, 2).unwrap();
//! let data = b"Hello, World!";
//! let mut shards: Vec<Option<Vec<u8>>> =
//!     codec.encode(data).unwrap().into_iter().map(Some).collect();
//! shards[0] = None;
//! shards[3] = None;
//!
//! assert_eq!(codec.decode(&mut shards, data.len()).unwrap(), data);
//! ```

pub mod codec;
pub mod stages;

#[cfg(test)]
mod proptest;

pub use codec::ParityCodec;
pub use stages::{ParityDecode, ParityEncode};
