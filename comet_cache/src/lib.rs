//! # COMET Worker Object Cache
//!
//! Worker-side object cache tracker for the COMET task-execution runtime.
//! Recently-used task values live in named shared-memory segments so that
//! any executor on the node can reach them zero-copy; this crate tracks
//! them: a registry of entry descriptors with a hit log, a single-threaded
//! coordinator applying the insert/retrieve protocol and the eviction
//! policy, and the per-executor tracker client.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐ commands (FIFO)  ┌───────────────┐
//! │ Tracker      ├─────────────────►│ Coordinator   │
//! │ Client       │   query replies  │  registry     │
//! │ (executor)   │◄─────────────────┤  hit log      │
//! └─────┬────────┘                  │  lock set     │
//!       │ allocate / attach         └──────┬────────┘
//!       ▼                                  │ release on
//! ┌──────────────┐                         │ evict/remove
//! │ Region layer │◄────────────────────────┘
//! └──────────────┘
//! ```
//!
//! The cache is volatile and node-local: it lives and dies with the
//! worker, and a miss only costs recomputation.
//!
//! ## Thread Safety
//!
//! - **Coordinator**: single-threaded actor; owns all mutation
//! - **CacheTracker**: one per executor, not shared
//! - **RegistryView**: cheap clone-able read handle, dirty reads allowed

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod events;
pub mod profiler;
pub mod registry;
pub mod tracker;

pub use command::{CacheCommand, CacheReply, ClientId};
pub use coordinator::{Coordinator, CoordinatorHandle, SegmentRelease, spawn};
pub use device::{DeviceAllocation, DeviceMemory, HandlePool, SimDeviceFabric, SimDeviceMemory};
pub use error::{CacheError, CacheResult};
pub use profiler::Profiler;
pub use registry::{Descriptor, Registry, RegistryView, shared_registry};
pub use tracker::{CacheTracker, cache_key};

use comet::config::{CacheConfig, LogLevel};

/// Initialize tracing with a file appender in the configured log
/// directory. The `RUST_LOG` environment variable overrides the
/// configured level.
pub fn init_logging(config: &CacheConfig) -> std::io::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let directive = match config.log_level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    std::fs::create_dir_all(&config.log_dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_dir.join("comet_cache.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}
