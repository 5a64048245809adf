//! Tracing sink for cache activity.
//!
//! Two event families: scoped events bracketing an operation, emitted as
//! entered debug spans, and explicit size events carrying a byte count.
//! The worker's trace merger consumes both by name; the names are fixed.

use tracing::span::EnteredSpan;

/// Tracing target shared by every cache event.
pub const TARGET: &str = "comet_cache::events";

/// Scoped event: host-cache retrieval.
pub const RETRIEVE_OBJECT_FROM_CACHE: &str = "retrieve_object_from_cache";
/// Scoped event: device-cache retrieval.
pub const RETRIEVE_OBJECT_FROM_GPU_CACHE: &str = "retrieve_object_from_gpu_cache";
/// Scoped event: host-cache insertion.
pub const INSERT_OBJECT_INTO_CACHE: &str = "insert_object_into_cache";
/// Scoped event: device-cache insertion.
pub const INSERT_OBJECT_INTO_GPU_CACHE: &str = "insert_object_into_gpu_cache";
/// Scoped event: removal.
pub const REMOVE_OBJECT_FROM_CACHE: &str = "remove_object_from_cache";
/// Scoped event: device presence probe succeeded.
pub const CACHE_HIT_GPU: &str = "cache_hit_gpu";
/// Scoped event: device presence probe failed.
pub const CACHE_MISS_GPU: &str = "cache_miss_gpu";
/// Scoped event: device access check.
pub const CHECK_ACCESS_GPU: &str = "check_access_gpu";

/// Size event: bytes written into the cache.
pub const SERIALIZATION_CACHE_SIZE: &str = "serialization_cache_size";
/// Size event: bytes read out of the cache.
pub const DESERIALIZATION_CACHE_SIZE: &str = "deserialization_cache_size";

/// Open a scoped cache event; the span closes when the guard drops.
pub fn scoped(event: &'static str) -> EnteredSpan {
    tracing::debug_span!(target: TARGET, "cache_event", event).entered()
}

/// Emit an explicit size event.
pub fn emit_size(event: &'static str, size: usize) {
    tracing::debug!(target: TARGET, event, size, "cache size");
}
