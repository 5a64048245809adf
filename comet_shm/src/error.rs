//! Error types for region and segment operations

use thiserror::Error;

/// Errors that can occur during region and segment operations
#[derive(Error, Debug)]
pub enum RegionError {
    /// Segment already exists
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment name is unknown
    #[error("No such segment: {name}")]
    NoSuchSegment {
        /// Segment name
        name: String,
    },

    /// Backing store exhausted
    #[error("Out of shared memory allocating {requested} bytes")]
    OutOfSharedMemory {
        /// Requested allocation size in bytes
        requested: usize,
    },

    /// Invalid segment size
    #[error("Invalid segment size: {size} bytes")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// Segment contents failed validation on attach
    #[error("Corrupt segment: {name}")]
    CorruptSegment {
        /// Segment name
        name: String,
    },

    /// Endpoint authentication handshake failed
    #[error("Endpoint authentication rejected")]
    AuthRejected,

    /// Malformed or unexpected endpoint traffic
    #[error("Endpoint protocol error: {detail}")]
    Protocol {
        /// Human-readable detail
        detail: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },
}

/// Result type for region operations
pub type RegionResult<T> = Result<T, RegionError>;
