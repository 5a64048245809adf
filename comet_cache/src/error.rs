//! Error types for cache tracker operations

use comet_shm::RegionError;
use thiserror::Error;

/// Errors that can occur during cache tracker operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Candidate value is not cacheable
    #[error("Value is not cacheable: {reason}")]
    UnsupportedKind {
        /// Why classification rejected the value
        reason: String,
    },

    /// Registry descriptor carries an unknown kind tag
    #[error("Unknown cacheable type: {tag}")]
    UnknownKind {
        /// Offending tag
        tag: String,
    },

    /// Key is not present in the cache
    #[error("Cache miss: {key}")]
    NotCached {
        /// Logical key
        key: String,
    },

    /// Device IPC handle cannot be opened on this device
    #[error("Device handle open failed on device {device_id}")]
    DeviceHandleOpenFailed {
        /// Device the open was attempted on
        device_id: u32,
    },

    /// Device IPC handle bytes are malformed
    #[error("Malformed device handle")]
    MalformedHandle,

    /// Coordinator channel closed
    #[error("Coordinator channel closed")]
    ChannelClosed,

    /// Region layer error
    #[error("Region error: {source}")]
    Region {
        /// Source region error
        #[from]
        source: RegionError,
    },
}

/// Result type for cache tracker operations
pub type CacheResult<T> = Result<T, CacheError>;
