//! Per-executor cache tracker client.
//!
//! The tracker is the facade an executor talks to. It classifies candidate
//! values, runs the insert protocol against the region server and the
//! coordinator, and resolves retrievals through the registry view plus a
//! direct segment attach. Executor-facing failures are best-effort: a
//! value that cannot be cached or retrieved surfaces as a miss, never as a
//! task failure.

use crate::command::{CacheCommand, CacheReply, ClientId};
use crate::coordinator::CoordinatorHandle;
use crate::device::{DeviceMemory, HandlePool};
use crate::error::{CacheError, CacheResult};
use crate::events;
use crate::registry::RegistryView;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use comet::value::{
    CachedValue, CandidateValue, DeviceNdArray, Dtype, HostNdArray, PayloadKind, Scalar,
    SequenceItem,
};
use comet_shm::{Attachment, RegionAllocator, SegmentBuffer, attach, decode_sequence};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use tracing::debug;

/// Derive the logical cache key from an identifier path.
///
/// The key is the basename of the absolute file path the runtime would use
/// to persist the value: `/a/b/c.npy` becomes `c.npy`.
pub fn cache_key(identifier: &str) -> String {
    std::path::Path::new(identifier)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| identifier.to_string())
}

/// Classified payload, one variant per cacheable kind.
enum Payload {
    Host(HostNdArray),
    Device(DeviceNdArray),
    Sequence {
        items: Vec<Scalar>,
        kind: PayloadKind,
    },
}

/// Classify a candidate, rejecting anything that is not cacheable.
fn classify(candidate: CandidateValue) -> CacheResult<Payload> {
    match candidate {
        CandidateValue::Array(array) => {
            if array.dtype == Dtype::Object {
                return Err(CacheError::UnsupportedKind {
                    reason: "array element dtype is object".to_string(),
                });
            }
            if !array.is_consistent() {
                return Err(CacheError::UnsupportedKind {
                    reason: "array buffer disagrees with shape and dtype".to_string(),
                });
            }
            Ok(Payload::Host(array))
        }
        CandidateValue::Device(array) => {
            if array.dtype == Dtype::Object {
                return Err(CacheError::UnsupportedKind {
                    reason: "device array element dtype is object".to_string(),
                });
            }
            Ok(Payload::Device(array))
        }
        CandidateValue::List(items) => Ok(Payload::Sequence {
            items: scalars_only(items)?,
            kind: PayloadKind::SequenceList,
        }),
        CandidateValue::Tuple(items) => Ok(Payload::Sequence {
            items: scalars_only(items)?,
            kind: PayloadKind::SequenceTuple,
        }),
    }
}

fn scalars_only(items: Vec<SequenceItem>) -> CacheResult<Vec<Scalar>> {
    items
        .into_iter()
        .map(|item| match item {
            SequenceItem::Scalar(scalar) => Ok(scalar),
            SequenceItem::Nested(_) => Err(CacheError::UnsupportedKind {
                reason: "nested sequences are not shareable".to_string(),
            }),
        })
        .collect()
}

enum LockOutcome {
    Acquired,
    AlreadyLocked,
    AlreadyPresent,
}

/// Per-executor cache client.
pub struct CacheTracker {
    client_id: ClientId,
    region: Box<dyn RegionAllocator>,
    commands: Sender<CacheCommand>,
    replies: Arc<Mutex<Receiver<CacheReply>>>,
    registry: RegistryView,
    device: Arc<dyn DeviceMemory>,
    handles: HandlePool,
}

impl CacheTracker {
    /// Build a tracker from its wiring.
    pub fn new(
        client_id: ClientId,
        region: Box<dyn RegionAllocator>,
        commands: Sender<CacheCommand>,
        replies: Arc<Mutex<Receiver<CacheReply>>>,
        registry: RegistryView,
        device: Arc<dyn DeviceMemory>,
    ) -> Self {
        Self {
            client_id,
            region,
            commands,
            replies,
            registry,
            device,
            handles: HandlePool::new(),
        }
    }

    /// Build a tracker wired to a running coordinator.
    pub fn connect(
        client_id: ClientId,
        region: Box<dyn RegionAllocator>,
        coordinator: &CoordinatorHandle,
        device: Arc<dyn DeviceMemory>,
    ) -> Self {
        Self::new(
            client_id,
            region,
            coordinator.commands(),
            coordinator.replies(),
            coordinator.registry(),
            device,
        )
    }

    /// Client identity stamped on LOCK commands.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Offer a value for caching.
    ///
    /// Best effort: values that are not cacheable, keys being populated
    /// elsewhere, and allocation failures are all logged at debug level
    /// and skipped. Only a dead coordinator channel is an error.
    pub fn insert(
        &mut self,
        candidate: CandidateValue,
        identifier: &str,
        parameter: &str,
        function: &str,
    ) -> CacheResult<()> {
        let key = cache_key(identifier);
        let payload = match classify(candidate) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(key = %key, error = %e, "not inserting: value not cacheable");
                return Ok(());
            }
        };

        match self.try_lock(&key)? {
            LockOutcome::AlreadyLocked => {
                debug!(key = %key, "not inserting: being populated by another executor");
                return Ok(());
            }
            LockOutcome::AlreadyPresent => {
                debug!(key = %key, "not inserting: already cached");
                return Ok(());
            }
            LockOutcome::Acquired => {}
        }

        match self.publish(&key, payload, parameter, function) {
            // PUT consumed the lock in the coordinator.
            Ok(true) => Ok(()),
            // Nothing to cache; release the claim.
            Ok(false) => {
                debug!(key = %key, "not inserting: empty payload");
                self.send(CacheCommand::Unlock { key })
            }
            Err(e) => {
                debug!(key = %key, error = %e, "insert abandoned");
                self.send(CacheCommand::Unlock { key })
            }
        }
    }

    /// Retrieve a cached value.
    ///
    /// Returns the caller-owned value and, for host-memory kinds, the
    /// segment attachment the caller must release once done with the
    /// value. Device retrievals return no attachment; their handles are
    /// pooled until [`CacheTracker::close_device_handles`].
    pub fn retrieve(
        &mut self,
        identifier: &str,
        parameter: &str,
        function: &str,
    ) -> CacheResult<(CachedValue, Option<Attachment>)> {
        events::emit_size(events::DESERIALIZATION_CACHE_SIZE, 0);
        let key = cache_key(identifier);
        debug!(key = %key, "retrieving from cache");

        let descriptor = self.registry.get(&key).ok_or_else(|| CacheError::NotCached {
            key: key.clone(),
        })?;

        let (value, attachment, size) = match descriptor.kind {
            PayloadKind::HostArray => {
                let _span = events::scoped(events::RETRIEVE_OBJECT_FROM_CACHE);
                let attachment = self.attach_or_miss(&descriptor.segment_name, &key)?;
                let dtype = descriptor.dtype.ok_or_else(|| CacheError::UnknownKind {
                    tag: "host array descriptor without dtype".to_string(),
                })?;
                let data = attachment.payload().to_vec();
                let size = data.len();
                let array = HostNdArray {
                    shape: descriptor.shape.clone(),
                    dtype,
                    data,
                };
                (CachedValue::Array(array), Some(attachment), size)
            }
            PayloadKind::DeviceArray => {
                let _span = events::scoped(events::RETRIEVE_OBJECT_FROM_GPU_CACHE);
                let allocation = self
                    .handles
                    .get_or_open(self.device.as_ref(), &descriptor.segment_name)?;
                let dtype = descriptor.dtype.ok_or_else(|| CacheError::UnknownKind {
                    tag: "device array descriptor without dtype".to_string(),
                })?;
                let array = DeviceNdArray {
                    shape: descriptor.shape.clone(),
                    dtype,
                    nbytes: descriptor.size,
                    device_id: allocation.device_id,
                    ipc_token: allocation.token,
                };
                (CachedValue::Device(array), None, descriptor.size)
            }
            PayloadKind::SequenceList | PayloadKind::SequenceTuple => {
                let _span = events::scoped(events::RETRIEVE_OBJECT_FROM_CACHE);
                let attachment = self.attach_or_miss(&descriptor.segment_name, &key)?;
                let items = decode_sequence(attachment.payload())?;
                let size = attachment.payload_len();
                let value = if descriptor.kind == PayloadKind::SequenceList {
                    CachedValue::List(items)
                } else {
                    CachedValue::Tuple(items)
                };
                (value, Some(attachment), size)
            }
        };

        events::emit_size(events::DESERIALIZATION_CACHE_SIZE, size);
        self.send(CacheCommand::Get {
            key,
            parameter: parameter.to_string(),
            function: function.to_string(),
        })?;

        Ok((value, attachment))
    }

    /// Remove a cached value. No-op if absent.
    pub fn remove(&mut self, identifier: &str) -> CacheResult<()> {
        let _span = events::scoped(events::REMOVE_OBJECT_FROM_CACHE);
        let key = cache_key(identifier);
        debug!(key = %key, "removing from cache");
        self.send(CacheCommand::Remove { key })
    }

    /// Replace a cached value: remove, then insert under the same
    /// guarantees.
    pub fn replace(
        &mut self,
        candidate: CandidateValue,
        identifier: &str,
        parameter: &str,
        function: &str,
    ) -> CacheResult<()> {
        let key = cache_key(identifier);
        debug!(key = %key, "replacing in cache");
        self.remove(identifier)?;
        self.insert(candidate, identifier, parameter, function)
    }

    /// Presence probe against the registry view, without coordinator
    /// traffic. Device entries additionally require that this client's
    /// device can open the IPC handle; an unopenable handle is a miss.
    pub fn in_cache(&mut self, identifier: &str) -> bool {
        let key = cache_key(identifier);
        let Some(descriptor) = self.registry.get(&key) else {
            return false;
        };
        if !descriptor.kind.is_device() {
            return true;
        }

        let accessible = {
            let _span = events::scoped(events::CHECK_ACCESS_GPU);
            self.handles
                .probe(self.device.as_ref(), &descriptor.segment_name)
        };
        let _span = events::scoped(if accessible {
            events::CACHE_HIT_GPU
        } else {
            events::CACHE_MISS_GPU
        });
        accessible
    }

    /// Number of device handles currently pooled by this client.
    pub fn pooled_device_handles(&self) -> usize {
        self.handles.len()
    }

    /// Close every pooled device handle. Call at executor teardown.
    pub fn close_device_handles(&mut self) {
        self.handles.close_all(self.device.as_ref());
    }

    /// The guarded IS_LOCKED / IS_IN_CACHE / LOCK triple.
    ///
    /// The reply-receiver mutex is the node-local critical section: while
    /// held, no other client of this node can interleave its own triple,
    /// so two clients cannot both observe "not locked, not present".
    fn try_lock(&self, key: &str) -> CacheResult<LockOutcome> {
        let replies = self.replies.lock();

        self.send(CacheCommand::IsLocked {
            key: key.to_string(),
        })?;
        let is_locked = recv_flag(&replies)?;
        self.send(CacheCommand::IsInCache {
            key: key.to_string(),
        })?;
        let is_in_cache = recv_flag(&replies)?;

        if is_locked {
            Ok(LockOutcome::AlreadyLocked)
        } else if is_in_cache {
            Ok(LockOutcome::AlreadyPresent)
        } else {
            self.send(CacheCommand::Lock {
                key: key.to_string(),
                owner: self.client_id,
            })?;
            Ok(LockOutcome::Acquired)
        }
    }

    /// Dispatch a classified payload. Returns `Ok(true)` when a PUT was
    /// sent, `Ok(false)` for empty payloads.
    fn publish(
        &mut self,
        key: &str,
        payload: Payload,
        parameter: &str,
        function: &str,
    ) -> CacheResult<bool> {
        match payload {
            Payload::Host(array) => {
                events::emit_size(events::SERIALIZATION_CACHE_SIZE, 0);
                let size = array.nbytes();
                if size == 0 {
                    return Ok(false);
                }
                let _span = events::scoped(events::INSERT_OBJECT_INTO_CACHE);

                let segment_name = self.region.allocate_segment(size)?;
                if let Err(e) = self.fill_segment(&segment_name, &array.data) {
                    let _ = self.region.release(&segment_name);
                    return Err(e);
                }

                self.send(CacheCommand::Put {
                    key: key.to_string(),
                    segment_name,
                    kind: PayloadKind::HostArray,
                    parameter: parameter.to_string(),
                    function: function.to_string(),
                    size,
                    dtype: Some(array.dtype),
                    shape: array.shape,
                    owner: self.client_id,
                })?;
                events::emit_size(events::SERIALIZATION_CACHE_SIZE, size);
                Ok(true)
            }
            Payload::Device(array) => {
                events::emit_size(events::SERIALIZATION_CACHE_SIZE, 0);
                let size = array.nbytes;
                if size == 0 {
                    return Ok(false);
                }
                let _span = events::scoped(events::INSERT_OBJECT_INTO_GPU_CACHE);

                let handle = self.device.export(&array)?;
                self.send(CacheCommand::PutGpu {
                    key: key.to_string(),
                    handle_b64: BASE64.encode(&handle),
                    parameter: parameter.to_string(),
                    function: function.to_string(),
                    size,
                    dtype: Some(array.dtype),
                    shape: array.shape,
                    device_id: array.device_id,
                    owner: self.client_id,
                })?;
                events::emit_size(events::SERIALIZATION_CACHE_SIZE, size);
                Ok(true)
            }
            Payload::Sequence { items, kind } => {
                if items.is_empty() {
                    return Ok(false);
                }
                let _span = events::scoped(events::INSERT_OBJECT_INTO_CACHE);
                events::emit_size(events::SERIALIZATION_CACHE_SIZE, 0);

                let segment_name = self.region.allocate_sequence(&items)?;
                let size = comet_shm::sequence::encoded_len(items.len());
                self.send(CacheCommand::Put {
                    key: key.to_string(),
                    segment_name,
                    kind,
                    parameter: parameter.to_string(),
                    function: function.to_string(),
                    size,
                    dtype: None,
                    shape: vec![],
                    owner: self.client_id,
                })?;
                events::emit_size(events::SERIALIZATION_CACHE_SIZE, size);
                Ok(true)
            }
        }
    }

    fn fill_segment(&self, segment_name: &str, data: &[u8]) -> CacheResult<()> {
        let mut buffer = SegmentBuffer::attach(segment_name)?;
        buffer.write_payload(data)?;
        Ok(())
    }

    fn attach_or_miss(&self, segment_name: &str, key: &str) -> CacheResult<Attachment> {
        attach(segment_name).map_err(|e| {
            debug!(key, segment = segment_name, error = %e, "attach failed, reporting miss");
            CacheError::NotCached {
                key: key.to_string(),
            }
        })
    }

    fn send(&self, command: CacheCommand) -> CacheResult<()> {
        self.commands
            .send(command)
            .map_err(|_| CacheError::ChannelClosed)
    }
}

impl Drop for CacheTracker {
    fn drop(&mut self) {
        // Let the coordinator sweep any lock this client still holds.
        let _ = self.commands.send(CacheCommand::Disconnect {
            owner: self.client_id,
        });
    }
}

fn recv_flag(replies: &Receiver<CacheReply>) -> CacheResult<bool> {
    replies
        .recv()
        .map(CacheReply::flag)
        .map_err(|_| CacheError::ChannelClosed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_basename() {
        assert_eq!(cache_key("/a/b/c.npy"), "c.npy");
        assert_eq!(cache_key("c.npy"), "c.npy");
        assert_eq!(cache_key("/a/b/"), "b");
    }

    #[test]
    fn classify_rejects_object_dtype() {
        let candidate = CandidateValue::Array(HostNdArray {
            shape: vec![4],
            dtype: Dtype::Object,
            data: vec![],
        });
        assert!(matches!(
            classify(candidate),
            Err(CacheError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn classify_rejects_nested_sequences() {
        let candidate = CandidateValue::List(vec![
            SequenceItem::Scalar(Scalar::Int(1)),
            SequenceItem::Nested(vec![SequenceItem::Scalar(Scalar::Int(2))]),
        ]);
        assert!(matches!(
            classify(candidate),
            Err(CacheError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn classify_rejects_inconsistent_arrays() {
        let candidate = CandidateValue::Array(HostNdArray {
            shape: vec![3],
            dtype: Dtype::I32,
            data: vec![0; 11],
        });
        assert!(matches!(
            classify(candidate),
            Err(CacheError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn classify_keeps_sequence_mutability() {
        let list = classify(CandidateValue::List(vec![SequenceItem::Scalar(
            Scalar::Int(1),
        )]))
        .unwrap();
        assert!(matches!(
            list,
            Payload::Sequence {
                kind: PayloadKind::SequenceList,
                ..
            }
        ));

        let tuple = classify(CandidateValue::Tuple(vec![SequenceItem::Scalar(
            Scalar::Int(1),
        )]))
        .unwrap();
        assert!(matches!(
            tuple,
            Payload::Sequence {
                kind: PayloadKind::SequenceTuple,
                ..
            }
        ));
    }
}
