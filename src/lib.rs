//! chunkvault - Content-Addressed Chunk Replication
//!
//! Splits a data stream into content-addressed chunks and replicates them,
//! with configurable redundancy, across a dynamic set of unreliable,
//! quota-bounded storage backends. Erasure coding provides space-efficient
//! redundancy and identical content is only stored once.
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────┐    ┌────────────┐    ┌─────────────┐    ┌────────────┐
//!   │   stages   │───▶│     ec     │───▶│  placement  │───▶│   copier   │
//!   │ split/hash │    │ k+m shards │    │ min / stripe│    │ mem / dir  │
//!   └────────────┘    └────────────┘    └─────────────┘    └────────────┘
//!          ▲                                                      │
//!          └───────────── pipeline combinators ◀──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`chunk`] - Chunks, content hashes and ordered series
//! - [`concurrency`] - Slot pools, first-error reduction, memoized finish
//! - [`pipeline`] - The `Proc` stage trait and its combinators
//! - [`placement`] - Replica placement, quotas and the copy registry
//! - [`copier`] - Storage backends and failover reads
//! - [`ec`] - Reed-Solomon erasure coding
//! - [`stages`] - Checksum, compression, splitting and joining
//! - [`index`] - Index writer and scanner
//! - [`config`] - YAML store description
//! - [`store`] - The put/get pipelines over a configured store
//! - [`error`] - Error types

pub mod chunk;
pub mod concurrency;
pub mod config;
pub mod copier;
pub mod ec;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod placement;
pub mod stages;
pub mod store;

// Re-export commonly used types
pub use chunk::{Chunk, Data, Hash};
pub use config::StoreConfig;
pub use error::{Error, ErrorClass, Result};
pub use pipeline::{drive, Proc, ProcRef, Res};
pub use store::Store;
