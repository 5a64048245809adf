//! Region server: ownership of named shared-memory allocations

use crate::error::{RegionError, RegionResult};
use crate::platform::{create_segment_mmap, get_current_pid};
use crate::segment::{
    Attachment, SegmentBuffer, SegmentHeader, segment_path, total_size, validate_payload_size,
};
use crate::sequence::encode_sequence;
use comet::consts::SEGMENT_PREFIX;
use comet::value::Scalar;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

// Distinguishes servers sharing a process, e.g. in tests.
static SERVER_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Record of a segment owned by the server.
#[derive(Debug, Clone)]
struct SegmentRecord {
    payload_len: usize,
}

/// Owner of every shared-memory allocation on the node.
///
/// Segments are created under uniquely generated names
/// (`comet_{pid}_{seq}`) and exist until released here or until
/// [`RegionServer::shutdown`]. Consumers attach directly by name through
/// [`attach`]; the server is only on the allocation path.
pub struct RegionServer {
    pid: u32,
    instance: u64,
    next_seq: u64,
    segments: HashMap<String, SegmentRecord>,
}

impl RegionServer {
    /// Create a server with an empty allocation table.
    pub fn new() -> Self {
        Self {
            pid: get_current_pid(),
            instance: SERVER_INSTANCE.fetch_add(1, Ordering::Relaxed),
            next_seq: 0,
            segments: HashMap::new(),
        }
    }

    fn next_name(&mut self) -> String {
        let name = format!(
            "{}_{}_{}_{}",
            SEGMENT_PREFIX, self.pid, self.instance, self.next_seq
        );
        self.next_seq += 1;
        name
    }

    /// Reserve a uniquely-named region for a payload of `size` bytes.
    ///
    /// Returns the name and a writable buffer for the producer to fill.
    /// Fails with [`RegionError::OutOfSharedMemory`] when the backing
    /// store is exhausted.
    pub fn allocate_segment(&mut self, size: usize) -> RegionResult<(String, SegmentBuffer)> {
        validate_payload_size(size)?;

        let name = self.next_name();
        let mut mmap = create_segment_mmap(&segment_path(&name), total_size(size))?;

        {
            let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut SegmentHeader) };
            *header = SegmentHeader::new(size);
        }

        self.segments
            .insert(name.clone(), SegmentRecord { payload_len: size });
        debug!(segment = %name, size, "allocated segment");

        Ok((name.clone(), SegmentBuffer::new(name, size, mmap)))
    }

    /// Reserve a region laid out as a fixed-width shareable sequence and
    /// fill it with the encoded elements.
    pub fn allocate_sequence(&mut self, items: &[Scalar]) -> RegionResult<(String, SegmentBuffer)> {
        let encoded = encode_sequence(items);
        let (name, mut buffer) = self.allocate_segment(encoded.len())?;
        buffer.write_payload(&encoded)?;
        Ok((name, buffer))
    }

    /// Release a segment back to the system, unlinking its backing file.
    ///
    /// Existing attachments in other address spaces stay valid until they
    /// are released; new attachments fail with
    /// [`RegionError::NoSuchSegment`].
    pub fn release(&mut self, name: &str) -> RegionResult<()> {
        if self.segments.remove(name).is_none() {
            return Err(RegionError::NoSuchSegment {
                name: name.to_string(),
            });
        }
        std::fs::remove_file(segment_path(name))?;
        debug!(segment = %name, "released segment");
        Ok(())
    }

    /// True if the server owns a segment with this name.
    pub fn owns(&self, name: &str) -> bool {
        self.segments.contains_key(name)
    }

    /// Number of live segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total payload bytes currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.segments.values().map(|r| r.payload_len).sum()
    }

    /// Release every segment the server still owns.
    pub fn shutdown(&mut self) {
        let names: Vec<String> = self.segments.keys().cloned().collect();
        for name in &names {
            let _ = std::fs::remove_file(segment_path(name));
        }
        self.segments.clear();
        if !names.is_empty() {
            info!(count = names.len(), "region server released all segments");
        }
    }
}

impl Default for RegionServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegionServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Attach read-only to a named segment.
///
/// The read path does not involve the server: the name is enough.
pub fn attach(name: &str) -> RegionResult<Attachment> {
    Attachment::open(name)
}
