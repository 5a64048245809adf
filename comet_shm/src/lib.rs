//! # COMET Shared-Memory Region Layer
//!
//! Named shared-memory segments for the COMET worker cache. A single
//! [`RegionServer`] per node owns every allocation; executor processes
//! reach it through the socket [`service`] (or in-process through
//! [`LocalRegion`]) to reserve segments, then attach directly by name to
//! fill or read payloads; the read path never touches the server.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────┐  Allocate/Release   ┌────────────────┐
//! │ Producer       ├────────────────────►│ Region Server  │
//! │ (tracker       │                     │  owns segments │
//! │  client)       │   name              │  /dev/shm/...  │
//! │                │◄────────────────────┤                │
//! └───────┬────────┘                     └────────────────┘
//!         │ attach rw, copy bytes                ▲
//!         ▼                                      │ release on
//! ┌────────────────┐  attach ro (by name)        │ shutdown
//! │ Consumers      ├─────────────────────────────┘
//! └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use comet_shm::{LocalRegion, RegionAllocator, SegmentBuffer, attach};
//!
//! # fn main() -> Result<(), comet_shm::RegionError> {
//! let mut region = LocalRegion::new();
//! let name = region.allocate_segment(4)?;
//!
//! let mut buffer = SegmentBuffer::attach(&name)?;
//! buffer.write_payload(&[1, 2, 3, 4])?;
//! drop(buffer);
//!
//! let mut view = attach(&name)?;
//! assert_eq!(view.payload(), &[1, 2, 3, 4]);
//! view.release();
//! # region.release(&name)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **RegionServer**: single owner; share behind a mutex
//! - **Attachment**: independent per caller; attach is idempotent
//! - **SegmentBuffer**: exclusive to the producing client until dropped

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod platform;
pub mod region;
pub mod segment;
pub mod sequence;
pub mod service;

pub use error::{RegionError, RegionResult};
pub use region::{RegionServer, attach};
pub use segment::{Attachment, SEGMENT_MAGIC, SegmentBuffer, SegmentHeader};
pub use sequence::{decode_sequence, encode_sequence};
pub use service::{LocalRegion, RegionAllocator, RegionClient, RegionService};

/// Initialize tracing with env-filter based configuration
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
