//! Device memory seam and the per-client opened-handle pool.
//!
//! Device arrays never enter host shared memory: the cache stores an
//! opaque inter-process handle exported by the owning executor and opened
//! lazily by retrieving clients. The [`DeviceMemory`] trait is the seam to
//! the device runtime; [`SimDeviceMemory`] is the process-local stand-in
//! used by tests and by deployments without device support.

use crate::error::{CacheError, CacheResult};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use comet::value::DeviceNdArray;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// An opened device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAllocation {
    /// Token identifying the allocation to the device layer.
    pub token: u64,
    /// Device the allocation lives on.
    pub device_id: u32,
}

/// Access to the device runtime's inter-process memory facilities.
pub trait DeviceMemory: Send + Sync {
    /// Device ordinal this handle-opener is bound to.
    fn device_id(&self) -> u32;

    /// Export an IPC handle for an externally-allocated device buffer.
    fn export(&self, array: &DeviceNdArray) -> CacheResult<Vec<u8>>;

    /// Open an IPC handle on this device.
    fn open(&self, handle: &[u8]) -> CacheResult<DeviceAllocation>;

    /// Close a previously opened handle.
    fn close(&self, allocation: DeviceAllocation);
}

/// Shared export table connecting the simulated devices of one node.
#[derive(Clone, Default)]
pub struct SimDeviceFabric {
    exported: Arc<Mutex<HashMap<u64, u32>>>,
}

impl SimDeviceFabric {
    /// Fresh fabric with no exported handles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle-opener bound to one device of this fabric.
    pub fn device(&self, device_id: u32) -> SimDeviceMemory {
        SimDeviceMemory {
            device_id,
            fabric: self.clone(),
        }
    }
}

/// Simulated device runtime bound to a single device.
///
/// Handles encode `(token, owning device)`; opening succeeds only on the
/// owning device, which models the peer-access failure a foreign device
/// observes with real IPC handles.
pub struct SimDeviceMemory {
    device_id: u32,
    fabric: SimDeviceFabric,
}

impl DeviceMemory for SimDeviceMemory {
    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn export(&self, array: &DeviceNdArray) -> CacheResult<Vec<u8>> {
        self.fabric
            .exported
            .lock()
            .insert(array.ipc_token, array.device_id);

        let mut handle = Vec::with_capacity(12);
        handle.extend_from_slice(&array.ipc_token.to_le_bytes());
        handle.extend_from_slice(&array.device_id.to_le_bytes());
        Ok(handle)
    }

    fn open(&self, handle: &[u8]) -> CacheResult<DeviceAllocation> {
        if handle.len() != 12 {
            return Err(CacheError::MalformedHandle);
        }
        let token = u64::from_le_bytes(handle[..8].try_into().expect("handle width"));
        let owner = u32::from_le_bytes(handle[8..].try_into().expect("handle width"));

        let known = self.fabric.exported.lock().get(&token).copied() == Some(owner);
        if !known || owner != self.device_id {
            return Err(CacheError::DeviceHandleOpenFailed {
                device_id: self.device_id,
            });
        }
        Ok(DeviceAllocation {
            token,
            device_id: owner,
        })
    }

    fn close(&self, _allocation: DeviceAllocation) {}
}

/// Per-client pool of opened device handles, keyed by the base64 handle.
///
/// Opened handles are kept until [`HandlePool::close_all`]; re-opening is
/// expensive and may fail, so retrievals and probes share the pool.
#[derive(Default)]
pub struct HandlePool {
    opened: HashMap<String, DeviceAllocation>,
}

impl HandlePool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opened allocation for a handle, opening and pooling it on first use.
    pub fn get_or_open(
        &mut self,
        device: &dyn DeviceMemory,
        handle_b64: &str,
    ) -> CacheResult<DeviceAllocation> {
        if let Some(allocation) = self.opened.get(handle_b64) {
            return Ok(*allocation);
        }
        let handle = BASE64
            .decode(handle_b64)
            .map_err(|_| CacheError::MalformedHandle)?;
        let allocation = device.open(&handle)?;
        self.opened.insert(handle_b64.to_string(), allocation);
        Ok(allocation)
    }

    /// Probe whether the handle is openable on this device. Pools the
    /// opened handle on success; failure reports a miss.
    pub fn probe(&mut self, device: &dyn DeviceMemory, handle_b64: &str) -> bool {
        match self.get_or_open(device, handle_b64) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "device handle probe failed");
                false
            }
        }
    }

    /// Number of pooled handles.
    pub fn len(&self) -> usize {
        self.opened.len()
    }

    /// True when nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty()
    }

    /// Close every pooled handle.
    pub fn close_all(&mut self, device: &dyn DeviceMemory) {
        for (_, allocation) in self.opened.drain() {
            device.close(allocation);
        }
    }
}
