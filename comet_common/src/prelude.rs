//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use comet_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use comet_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{CacheConfig, ConfigError, ConfigLoader, EndpointConfig, EvictionPolicy};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{SEGMENT_MAX_SIZE, SEGMENT_MIN_SIZE, SEGMENT_PREFIX, SHM_ROOT};

// ─── Value Model ────────────────────────────────────────────────────
pub use crate::value::{
    CachedValue, CandidateValue, DeviceNdArray, Dtype, HostNdArray, PayloadKind, Scalar,
    SequenceItem,
};
