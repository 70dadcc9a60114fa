//! Error types for chunkvault

use std::sync::Arc;

use thiserror::Error;

use crate::chunk::Hash;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], used to decide whether a failure can
/// be recovered locally (failover, reconstruction) or must abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Per-backend I/O failure or missing data
    Transient,
    /// Checksum mismatch
    Integrity,
    /// Not enough eligible backends to satisfy the redundancy scheme
    Shortfall,
    /// Leaked slots, unfinished series or placements detected at finish
    Accounting,
    /// Too few shards to reconstruct a payload
    Unrecoverable,
    /// Bad configuration or misuse of a stage
    Invalid,
}

/// Errors that can occur while processing chunks
///
/// Errors are cloned whenever a result stream fans out or a `finish` outcome
/// is memoized, so every variant is cheap to clone.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Backend does not hold the requested hash
    #[error("Backend {copier} has no data for {hash}")]
    NotFound { copier: String, hash: Hash },

    /// Backend failed an operation
    #[error("Backend {copier} failed: {reason}")]
    Backend { copier: String, reason: String },

    /// No backend is known to hold the requested hash
    #[error("No data available for {0}")]
    NoDataAvailable(Hash),

    /// Lazily-read payload was already consumed
    #[error("Chunk data already consumed")]
    DataConsumed,

    // =========================================================================
    // Integrity Errors
    // =========================================================================
    /// Stored bytes do not match their hash
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: Hash, actual: Hash },

    /// A stage needing a hash received a chunk without one
    #[error("Chunk {num} has no hash")]
    MissingHash { num: u64 },

    // =========================================================================
    // Redundancy Errors
    // =========================================================================
    /// Not enough eligible backends to reach the minimum copy count
    #[error(
        "Insufficient copies: min {min}, have {have}, missing {missing}, available {available}"
    )]
    InsufficientCopies {
        min: usize,
        have: usize,
        missing: usize,
        available: usize,
    },

    /// Stripe placement ran out of eligible locations
    #[error("Not enough target locations for {hash}: need {min}, found {found}")]
    NotEnoughTargets { hash: Hash, min: usize, found: usize },

    // =========================================================================
    // Accounting Errors
    // =========================================================================
    /// Backlog slots were not returned before finish
    #[error("{outstanding} of {total} slots not returned")]
    SlotsNotReturned { outstanding: usize, total: usize },

    /// Sorted series still holds chunks behind a gap
    #[error("Incomplete series: {buffered} chunks buffered, waiting for {next}")]
    IncompleteSeries { buffered: usize, next: u64 },

    /// Position was already released or is already pending
    #[error("Series position {num} already used (low-water mark {low_water})")]
    SeriesPositionUsed { num: u64, low_water: u64 },

    /// Group buckets left incomplete at finish
    #[error("Incomplete groups: {buckets:?}")]
    IncompleteGroups { buckets: Vec<u64> },

    /// Group bucket received a duplicate, or a member after completion
    #[error("Group bucket {bucket} overflow at chunk {num}")]
    GroupOverflow { bucket: u64, num: u64 },

    /// Group bucket members do not form a contiguous run
    #[error("Group bucket {bucket} is not contiguous")]
    NonContiguousGroup { bucket: u64 },

    /// Placements still hold their lock at finish
    #[error("{0} placements still in flight")]
    PlacementsInFlight(usize),

    /// Stage was used after finish
    #[error("Pipeline closed")]
    PipelineClosed,

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// EC encoding failed
    #[error("EC encoding failed: {0}")]
    EcEncodingFailed(String),

    /// EC reconstruction failed
    #[error("EC reconstruction failed: {0}")]
    EcReconstructionFailed(String),

    /// Insufficient shards for reconstruction
    #[error("Insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// Invalid EC configuration
    #[error("Invalid EC configuration: {0}")]
    InvalidEcConfig(String),

    /// Decode stage received something that is not a shard group
    #[error("Chunk {num} is not a group of {expected} shards")]
    NotAGroup { num: u64, expected: usize },

    /// Shard positions for a chunk do not fit in a `u64`
    #[error("Chunk {num} has no room for {shards} shard positions")]
    ShardPositionOverflow { num: u64, shards: usize },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Usage Errors
    // =========================================================================
    /// Malformed index line
    #[error("Index line {line}: {reason}")]
    Index { line: usize, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cascade without alternatives
    #[error("No alternatives to try")]
    NoAlternatives,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl Error {
    /// Classify the error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Io(_)
            | Error::NotFound { .. }
            | Error::Backend { .. }
            | Error::NoDataAvailable(_)
            | Error::DataConsumed => ErrorClass::Transient,
            Error::ChecksumMismatch { .. } | Error::DecompressionFailed { .. } => {
                ErrorClass::Integrity
            }
            Error::InsufficientCopies { .. } | Error::NotEnoughTargets { .. } => {
                ErrorClass::Shortfall
            }
            Error::SlotsNotReturned { .. }
            | Error::IncompleteSeries { .. }
            | Error::SeriesPositionUsed { .. }
            | Error::IncompleteGroups { .. }
            | Error::GroupOverflow { .. }
            | Error::NonContiguousGroup { .. }
            | Error::PlacementsInFlight(_) => ErrorClass::Accounting,
            Error::InsufficientShards { .. } | Error::EcReconstructionFailed(_) => {
                ErrorClass::Unrecoverable
            }
            Error::MissingHash { .. }
            | Error::PipelineClosed
            | Error::EcEncodingFailed(_)
            | Error::InvalidEcConfig(_)
            | Error::NotAGroup { .. }
            | Error::ShardPositionOverflow { .. }
            | Error::CompressionFailed { .. }
            | Error::Index { .. }
            | Error::Config(_)
            | Error::NoAlternatives
            | Error::Internal(_) => ErrorClass::Invalid,
        }
    }

    /// Whether retrying against another backend could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_transient() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_shard_shortage_is_permanent() {
        let err = Error::InsufficientShards {
            available: 1,
            required: 2,
        };
        assert_eq!(err.class(), ErrorClass::Unrecoverable);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_shortfall_message_names_counts() {
        let err = Error::InsufficientCopies {
            min: 3,
            have: 1,
            missing: 2,
            available: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("min 3"));
        assert!(msg.contains("have 1"));
        assert!(msg.contains("missing 2"));
        assert!(msg.contains("available 1"));
    }
}
