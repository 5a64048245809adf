//! Cacheable value model.
//!
//! Defines the payload kinds the cache supports, the element dtypes of host
//! and device arrays, and the scalar element model of shareable sequences.
//! Classification of executor-provided values into these types happens in
//! the tracker client; this module only carries the data.

use serde::{Deserialize, Serialize};

/// Element dtype of an N-dimensional array.
///
/// `Object` marks arrays of arbitrary boxed elements; such arrays are never
/// cacheable and are rejected at classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// Boolean, one byte per element.
    Bool,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
    /// Arbitrary boxed elements. Not cacheable.
    Object,
}

impl Dtype {
    /// Size of one element in bytes, `None` for [`Dtype::Object`].
    pub const fn size_of(self) -> Option<usize> {
        match self {
            Self::Bool | Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::Object => None,
        }
    }
}

/// Discriminator among the cacheable payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayloadKind {
    /// Contiguous N-dimensional host buffer.
    HostArray = 0,
    /// Externally-allocated device memory, referenced by IPC handle.
    DeviceArray = 1,
    /// Ordered-mutable scalar sequence.
    SequenceList = 2,
    /// Ordered-immutable scalar sequence.
    SequenceTuple = 3,
}

impl PayloadKind {
    /// String tag carried in channel messages and registry descriptors.
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::HostArray => "SharedArray",
            Self::DeviceArray => "SharedDeviceArray",
            Self::SequenceList => "ShareableList",
            Self::SequenceTuple => "ShareableTuple",
        }
    }

    /// Parse a tag back into a kind. Returns `None` for unknown tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SharedArray" => Some(Self::HostArray),
            "SharedDeviceArray" => Some(Self::DeviceArray),
            "ShareableList" => Some(Self::SequenceList),
            "ShareableTuple" => Some(Self::SequenceTuple),
            _ => None,
        }
    }

    /// True for the kind whose bytes live outside host shared memory.
    pub const fn is_device(self) -> bool {
        matches!(self, Self::DeviceArray)
    }
}

/// A scalar sequence element.
///
/// These are the only element types a shareable sequence may hold; each
/// encodes to a fixed 9 bytes (1 tag byte + 8 payload bytes, little endian).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    /// Signed integer element.
    Int(i64),
    /// Floating point element.
    Float(f64),
    /// Boolean element.
    Bool(bool),
}

/// Raw sequence element as handed over by an executor.
///
/// `Nested` exists so callers can express what they actually hold; the
/// classifier rejects it, since nested sequences are not shareable.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceItem {
    /// A supported scalar element.
    Scalar(Scalar),
    /// A nested sequence. Never cacheable.
    Nested(Vec<SequenceItem>),
}

/// Contiguous N-dimensional host buffer with shape and dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct HostNdArray {
    /// Dimensions, outermost first. Empty for a 0-d array.
    pub shape: Vec<usize>,
    /// Element dtype.
    pub dtype: Dtype,
    /// Raw element bytes, C-contiguous.
    pub data: Vec<u8>,
}

impl HostNdArray {
    /// Total payload size in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Number of elements implied by the shape.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when `data` length agrees with `shape` and `dtype`.
    pub fn is_consistent(&self) -> bool {
        match self.dtype.size_of() {
            Some(width) => self.element_count() * width == self.data.len(),
            None => false,
        }
    }
}

/// Externally-allocated device buffer description.
///
/// The bytes never enter host shared memory; `ipc_token` is the opaque
/// process-local token the device layer exports into an IPC handle.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceNdArray {
    /// Dimensions, outermost first.
    pub shape: Vec<usize>,
    /// Element dtype.
    pub dtype: Dtype,
    /// Logical payload size in bytes.
    pub nbytes: usize,
    /// Device ordinal the memory lives on.
    pub device_id: u32,
    /// Opaque token identifying the allocation to the device layer.
    pub ipc_token: u64,
}

/// A candidate value offered for caching by an executor.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateValue {
    /// Host array candidate.
    Array(HostNdArray),
    /// Device array candidate.
    Device(DeviceNdArray),
    /// Mutable sequence candidate.
    List(Vec<SequenceItem>),
    /// Immutable sequence candidate.
    Tuple(Vec<SequenceItem>),
}

/// A value materialized out of the cache, owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    /// Host array copy.
    Array(HostNdArray),
    /// Device array view description (memory still owned by the device).
    Device(DeviceNdArray),
    /// Materialized mutable sequence.
    List(Vec<Scalar>),
    /// Materialized immutable sequence.
    Tuple(Vec<Scalar>),
}
