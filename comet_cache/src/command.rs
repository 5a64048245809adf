//! Command and reply types for the coordinator channels.
//!
//! Clients push [`CacheCommand`]s onto the inbound channel; the coordinator
//! answers the two query commands on the outbound channel, in command
//! order. Everything else is fire-and-forget.

use comet::value::{Dtype, PayloadKind};
use serde::{Deserialize, Serialize};

/// Identity of a tracker client, stamped on LOCK so the coordinator can
/// drop stale locks when the client disappears.
pub type ClientId = u32;

/// A command on the coordinator's inbound channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheCommand {
    /// Query: is the key currently being populated?
    IsLocked {
        /// Logical key
        key: String,
    },
    /// Query: does the registry hold the key?
    IsInCache {
        /// Logical key
        key: String,
    },
    /// Claim a key for population. Caller-enforced precondition: key is
    /// neither locked nor present.
    Lock {
        /// Logical key
        key: String,
        /// Claiming client
        owner: ClientId,
    },
    /// Release a claim. No-op if absent.
    Unlock {
        /// Logical key
        key: String,
    },
    /// Publish a host-memory entry and release the claim.
    Put {
        /// Logical key
        key: String,
        /// Segment holding the payload
        segment_name: String,
        /// Payload kind (host array or sequence)
        kind: PayloadKind,
        /// Parameter name, for profiling
        parameter: String,
        /// Function name, for profiling
        function: String,
        /// Payload size in bytes
        size: usize,
        /// Element dtype; `None` for sequences
        dtype: Option<Dtype>,
        /// Array shape; empty for sequences
        shape: Vec<usize>,
        /// Publishing client (must hold the lock)
        owner: ClientId,
    },
    /// Publish a device-memory entry and release the claim.
    PutGpu {
        /// Logical key
        key: String,
        /// Base64-encoded device IPC handle
        handle_b64: String,
        /// Parameter name, for profiling
        parameter: String,
        /// Function name, for profiling
        function: String,
        /// Logical payload size in bytes
        size: usize,
        /// Element dtype
        dtype: Option<Dtype>,
        /// Array shape
        shape: Vec<usize>,
        /// Device ordinal the memory lives on
        device_id: u32,
        /// Publishing client (must hold the lock)
        owner: ClientId,
    },
    /// Record a successful retrieval.
    Get {
        /// Logical key
        key: String,
        /// Parameter name, for profiling
        parameter: String,
        /// Function name, for profiling
        function: String,
    },
    /// Delete an entry and release its segment. No-op if absent.
    Remove {
        /// Logical key
        key: String,
    },
    /// Maintenance: drop every lock stamped with this owner.
    Disconnect {
        /// Vanished client
        owner: ClientId,
    },
}

impl CacheCommand {
    /// Action name, for logging.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::IsLocked { .. } => "IS_LOCKED",
            Self::IsInCache { .. } => "IS_IN_CACHE",
            Self::Lock { .. } => "LOCK",
            Self::Unlock { .. } => "UNLOCK",
            Self::Put { .. } => "PUT",
            Self::PutGpu { .. } => "PUT_GPU",
            Self::Get { .. } => "GET",
            Self::Remove { .. } => "REMOVE",
            Self::Disconnect { .. } => "DISCONNECT",
        }
    }
}

/// A reply on the coordinator's outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheReply {
    /// Answer to `IsLocked` / `IsInCache`.
    Flag(bool),
}

impl CacheReply {
    /// Extract the boolean answer.
    pub const fn flag(self) -> bool {
        match self {
            Self::Flag(value) => value,
        }
    }
}
