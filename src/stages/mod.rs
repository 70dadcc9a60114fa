//! Transform stages
//!
//! Leaf [`Proc`](crate::pipeline::Proc) implementations that change chunk
//! payloads: hashing, compression, splitting a stream into chunks and
//! joining chunks back into a stream.

pub mod checksum;
pub mod compress;
pub mod join;
pub mod split;

pub use checksum::Checksum;
pub use compress::Compress;
pub use join::Join;
pub use split::Split;
