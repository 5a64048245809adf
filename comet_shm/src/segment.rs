//! Segment layout, producer buffers and read-only attachments

use crate::error::{RegionError, RegionResult};
use crate::platform::{attach_segment_mmap, attach_segment_mmap_rw};
use comet::consts::{SEGMENT_MAX_SIZE, SEGMENT_MIN_SIZE, SHM_ROOT};
use memmap2::{Mmap, MmapMut};
use static_assertions::const_assert_eq;

/// Magic number identifying a COMET cache segment.
pub const SEGMENT_MAGIC: u64 = 0x434f_4d45_545f_5348; // "COMET_SH"

/// Segment header preceding the payload, cache-line aligned.
///
/// Cache segments are written once by the producing client before the entry
/// is published and are read-only afterwards, so the header carries no
/// version counter. `payload_len` is authoritative; the mapped file may be
/// longer.
#[repr(C, align(64))]
pub struct SegmentHeader {
    /// Magic number for validation
    pub magic: u64,
    /// Payload size in bytes
    pub payload_len: u64,
    /// Padding to a full cache line
    _padding: [u8; 48],
}

const_assert_eq!(std::mem::size_of::<SegmentHeader>(), 64);

impl SegmentHeader {
    /// Create a header for a payload of the given size.
    pub fn new(payload_len: usize) -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            payload_len: payload_len as u64,
            _padding: [0; 48],
        }
    }

    /// Validate header magic.
    pub fn validate(&self, name: &str) -> RegionResult<()> {
        if self.magic != SEGMENT_MAGIC {
            return Err(RegionError::CorruptSegment {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// Filesystem path of a named segment.
pub fn segment_path(name: &str) -> String {
    format!("{}/{}", SHM_ROOT, name)
}

/// Validate payload size constraints.
pub fn validate_payload_size(size: usize) -> RegionResult<()> {
    if size < SEGMENT_MIN_SIZE || size > SEGMENT_MAX_SIZE {
        return Err(RegionError::InvalidSize { size });
    }
    Ok(())
}

/// Total file size for a payload: header plus payload bytes.
pub fn total_size(payload_len: usize) -> usize {
    std::mem::size_of::<SegmentHeader>() + payload_len
}

/// Writable view of a freshly allocated segment.
///
/// Handed to the producing client to copy the payload bytes in; dropped
/// once the copy is complete. Not shared between processes while writable:
/// the entry only becomes visible to consumers after the registry PUT.
pub struct SegmentBuffer {
    name: String,
    payload_len: usize,
    mmap: MmapMut,
}

impl SegmentBuffer {
    pub(crate) fn new(name: String, payload_len: usize, mmap: MmapMut) -> Self {
        Self {
            name,
            payload_len,
            mmap,
        }
    }

    /// Attach read-write to an existing segment by name.
    ///
    /// This is the producer fill path after a remote allocation: the
    /// endpoint returns a name, the producer maps it and copies bytes in.
    pub fn attach(name: &str) -> RegionResult<Self> {
        let mmap = attach_segment_mmap_rw(&segment_path(name)).map_err(|e| match e {
            RegionError::Io { source } if source.kind() == std::io::ErrorKind::NotFound => {
                RegionError::NoSuchSegment {
                    name: name.to_string(),
                }
            }
            other => other,
        })?;
        let header = unsafe { &*(mmap.as_ptr() as *const SegmentHeader) };
        header.validate(name)?;
        let payload_len = header.payload_len as usize;

        Ok(Self {
            name: name.to_string(),
            payload_len,
            mmap,
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload size in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Mutable payload slice.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let offset = std::mem::size_of::<SegmentHeader>();
        &mut self.mmap[offset..offset + self.payload_len]
    }

    /// Copy `bytes` into the payload. Lengths must match exactly.
    pub fn write_payload(&mut self, bytes: &[u8]) -> RegionResult<()> {
        if bytes.len() != self.payload_len {
            return Err(RegionError::InvalidSize { size: bytes.len() });
        }
        self.payload_mut().copy_from_slice(bytes);
        Ok(())
    }
}

/// Read-only attachment to a named segment.
///
/// Valid for the caller's address space; idempotent across concurrent
/// attachers. The caller must release it when done with the view, either
/// explicitly via [`Attachment::release`] or by dropping it.
pub struct Attachment {
    name: String,
    payload_len: usize,
    mmap: Option<Mmap>,
}

impl Attachment {
    /// Attach read-only to a named segment, validating its header.
    pub fn open(name: &str) -> RegionResult<Self> {
        let mmap = attach_segment_mmap(&segment_path(name)).map_err(|e| match e {
            RegionError::Io { source } if source.kind() == std::io::ErrorKind::NotFound => {
                RegionError::NoSuchSegment {
                    name: name.to_string(),
                }
            }
            other => other,
        })?;

        if mmap.len() < std::mem::size_of::<SegmentHeader>() {
            return Err(RegionError::CorruptSegment {
                name: name.to_string(),
            });
        }
        let header = unsafe { &*(mmap.as_ptr() as *const SegmentHeader) };
        header.validate(name)?;

        let payload_len = header.payload_len as usize;
        if total_size(payload_len) > mmap.len() {
            return Err(RegionError::CorruptSegment {
                name: name.to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            payload_len,
            mmap: Some(mmap),
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload size in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Read-only payload slice.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Attachment::release`].
    pub fn payload(&self) -> &[u8] {
        let mmap = self.mmap.as_ref().expect("attachment released");
        let offset = std::mem::size_of::<SegmentHeader>();
        &mmap[offset..offset + self.payload_len]
    }

    /// Release the attachment, unmapping the segment from this address
    /// space. Releasing twice is a no-op.
    pub fn release(&mut self) {
        self.mmap = None;
    }

    /// True once the mapping has been released.
    pub fn is_released(&self) -> bool {
        self.mmap.is_none()
    }
}
