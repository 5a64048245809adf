//! Shared constants for the COMET worker cache.

/// Root directory for file-backed shared memory segments.
pub const SHM_ROOT: &str = "/dev/shm";

/// Prefix for every segment file created by the region server.
pub const SEGMENT_PREFIX: &str = "comet";

/// Smallest segment payload the region server will allocate, in bytes.
pub const SEGMENT_MIN_SIZE: usize = 1;

/// Largest segment payload the region server will allocate, in bytes (1 GiB).
pub const SEGMENT_MAX_SIZE: usize = 1024 * 1024 * 1024;

/// Default IP address of the region endpoint.
pub const DEFAULT_ENDPOINT_IP: &str = "127.0.0.1";

/// Default port of the region endpoint.
pub const DEFAULT_ENDPOINT_PORT: u16 = 50000;

/// Default endpoint authentication key, agreed out of band.
pub const DEFAULT_AUTH_KEY: &[u8] = b"comet_cache";
