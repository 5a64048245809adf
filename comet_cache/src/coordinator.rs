//! Cache coordinator: the single-threaded actor owning registry, hit log
//! and lock set.
//!
//! The coordinator drains the inbound command channel in strict FIFO
//! order. Only `IS_LOCKED` and `IS_IN_CACHE` produce replies, delivered in
//! command order on the outbound channel. Protocol errors are never
//! silently repaired: the offending command is dropped, logged and
//! counted.

use crate::command::{CacheCommand, CacheReply, ClientId};
use crate::profiler::Profiler;
use crate::registry::{Descriptor, Registry, RegistryView, shared_registry};
use comet::config::CacheConfig;
use comet::value::{Dtype, PayloadKind};
use comet_shm::RegionAllocator;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Segment disposal seam between the coordinator and the region server.
pub trait SegmentRelease: Send {
    /// Release a segment back to the server, best effort.
    fn release_segment(&mut self, name: &str);
}

impl SegmentRelease for comet_shm::LocalRegion {
    fn release_segment(&mut self, name: &str) {
        if let Err(e) = RegionAllocator::release(self, name) {
            debug!(segment = name, error = %e, "segment release failed");
        }
    }
}

impl SegmentRelease for comet_shm::RegionClient {
    fn release_segment(&mut self, name: &str) {
        if let Err(e) = RegionAllocator::release(self, name) {
            debug!(segment = name, error = %e, "segment release failed");
        }
    }
}

/// The coordinator actor.
pub struct Coordinator {
    config: CacheConfig,
    registry: Arc<RwLock<Registry>>,
    locks: HashMap<String, ClientId>,
    region: Box<dyn SegmentRelease>,
    profiler: Option<Profiler>,
    violations: u64,
}

impl Coordinator {
    /// Build a coordinator over a shared registry and a segment releaser.
    pub fn new(
        config: CacheConfig,
        registry: Arc<RwLock<Registry>>,
        region: Box<dyn SegmentRelease>,
    ) -> Self {
        let profiler = config.cache_profiler.then(Profiler::new);
        Self {
            config,
            registry,
            locks: HashMap::new(),
            region,
            profiler,
            violations: 0,
        }
    }

    /// Drain the command channel until every sender is gone, then return
    /// self for inspection.
    pub fn run(mut self, commands: Receiver<CacheCommand>, replies: Sender<CacheReply>) -> Self {
        while let Ok(command) = commands.recv() {
            self.handle(command, &replies);
        }
        debug!("coordinator channel closed, stopping");
        self
    }

    /// Apply a single command. Replies for the query commands go out on
    /// `replies` in command order.
    pub fn handle(&mut self, command: CacheCommand, replies: &Sender<CacheReply>) {
        match command {
            CacheCommand::IsLocked { key } => {
                let locked = self.locks.contains_key(&key);
                let _ = replies.send(CacheReply::Flag(locked));
            }
            CacheCommand::IsInCache { key } => {
                let present = self.registry.read().contains(&key);
                let _ = replies.send(CacheReply::Flag(present));
            }
            CacheCommand::Lock { key, owner } => self.lock(key, owner),
            CacheCommand::Unlock { key } => {
                self.locks.remove(&key);
            }
            CacheCommand::Put {
                key,
                segment_name,
                kind,
                parameter,
                function,
                size,
                dtype,
                shape,
                owner,
            } => {
                self.put(
                    key,
                    segment_name,
                    kind,
                    parameter,
                    function,
                    size,
                    dtype,
                    shape,
                    None,
                    owner,
                );
            }
            CacheCommand::PutGpu {
                key,
                handle_b64,
                parameter,
                function,
                size,
                dtype,
                shape,
                device_id,
                owner,
            } => {
                self.put(
                    key,
                    handle_b64,
                    PayloadKind::DeviceArray,
                    parameter,
                    function,
                    size,
                    dtype,
                    shape,
                    Some(device_id),
                    owner,
                );
            }
            CacheCommand::Get {
                key,
                parameter,
                function,
            } => self.get(&key, &parameter, &function),
            CacheCommand::Remove { key } => self.remove(&key),
            CacheCommand::Disconnect { owner } => self.disconnect(owner),
        }
    }

    /// Number of protocol violations observed so far.
    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Keys currently in the lock set.
    pub fn locked_keys(&self) -> Vec<String> {
        self.locks.keys().cloned().collect()
    }

    /// Profiler state, when profiling is enabled.
    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    fn violation(&mut self, action: &str, key: &str, reason: &str) {
        self.violations += 1;
        warn!(action, key, reason, "protocol violation, command dropped");
    }

    fn lock(&mut self, key: String, owner: ClientId) {
        if self.locks.contains_key(&key) {
            self.violation("LOCK", &key, "key already locked");
            return;
        }
        if self.registry.read().contains(&key) {
            self.violation("LOCK", &key, "key already present");
            return;
        }
        debug!(key = %key, owner, "locked for population");
        self.locks.insert(key, owner);
    }

    #[allow(clippy::too_many_arguments)]
    fn put(
        &mut self,
        key: String,
        segment_name: String,
        kind: PayloadKind,
        parameter: String,
        function: String,
        size: usize,
        dtype: Option<Dtype>,
        shape: Vec<usize>,
        device_id: Option<u32>,
        owner: ClientId,
    ) {
        match self.locks.get(&key) {
            Some(&holder) if holder == owner => {}
            Some(_) => {
                self.violation("PUT", &key, "lock held by a different client");
                return;
            }
            None => {
                self.violation("PUT", &key, "key not locked");
                return;
            }
        }
        if self.registry.read().contains(&key) {
            self.violation("PUT", &key, "key already present");
            return;
        }

        self.locks.remove(&key);
        let descriptor = Descriptor {
            segment_name,
            shape,
            dtype,
            size,
            hits: 0,
            kind,
            device_id,
        };
        self.registry.write().insert(key.clone(), descriptor);
        debug!(key = %key, tag = kind.as_tag(), size, "inserted cache entry");

        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_put(&function, &parameter, kind.as_tag(), &key);
        }

        self.enforce_capacity(kind.is_device(), &key);
    }

    fn get(&mut self, key: &str, parameter: &str, function: &str) {
        match self.registry.write().touch(key) {
            Some((hits, kind)) => {
                debug!(key, hits, "cache hit recorded");
                if let Some(profiler) = self.profiler.as_mut() {
                    profiler.record_get(function, parameter, kind.as_tag(), key);
                }
            }
            None => {
                // Evicted between the client's descriptor read and this
                // command; a miss, not an error.
                debug!(key, "GET for absent key ignored");
            }
        }
    }

    fn remove(&mut self, key: &str) {
        let removed = self.registry.write().remove(key);
        match removed {
            Some(descriptor) => {
                debug!(key, "removed cache entry");
                if !descriptor.kind.is_device() {
                    self.region.release_segment(&descriptor.segment_name);
                }
            }
            None => debug!(key, "REMOVE for absent key ignored"),
        }
    }

    fn disconnect(&mut self, owner: ClientId) {
        let before = self.locks.len();
        self.locks.retain(|_, holder| *holder != owner);
        let dropped = before - self.locks.len();
        if dropped > 0 {
            debug!(owner, dropped, "dropped locks of disconnected client");
        }
    }

    /// Evict least-hit entries of the matching budget until it fits. The
    /// entry admitted in this step is never selected.
    fn enforce_capacity(&mut self, device_budget: bool, admitted: &str) {
        let capacity = if device_budget {
            self.config.gpu_cache_size
        } else {
            self.config.size
        };

        loop {
            let victim = {
                let registry = self.registry.read();
                let total = if device_budget {
                    registry.device_bytes()
                } else {
                    registry.host_bytes()
                };
                if total <= capacity {
                    None
                } else {
                    registry
                        .eviction_order()
                        .into_iter()
                        .filter(|(key, _, kind)| {
                            kind.is_device() == device_budget && key != admitted
                        })
                        .map(|(key, _, _)| key)
                        .next()
                }
            };
            let Some(key) = victim else { break };

            if let Some(descriptor) = self.registry.write().remove(&key) {
                debug!(
                    key = %key,
                    hits = descriptor.hits,
                    size = descriptor.size,
                    "evicted cache entry"
                );
                if !descriptor.kind.is_device() {
                    self.region.release_segment(&descriptor.segment_name);
                }
            }
        }
    }
}

/// Running coordinator plus the handles clients need.
pub struct CoordinatorHandle {
    commands: Sender<CacheCommand>,
    replies: Arc<Mutex<Receiver<CacheReply>>>,
    registry: RegistryView,
    thread: JoinHandle<Coordinator>,
}

impl CoordinatorHandle {
    /// Clone of the inbound command sender.
    pub fn commands(&self) -> Sender<CacheCommand> {
        self.commands.clone()
    }

    /// Shared outbound reply receiver. The mutex around it doubles as the
    /// node-local critical section for the query triple.
    pub fn replies(&self) -> Arc<Mutex<Receiver<CacheReply>>> {
        Arc::clone(&self.replies)
    }

    /// Read-only registry handle.
    pub fn registry(&self) -> RegistryView {
        self.registry.clone()
    }

    /// Close the channel and wait for the actor. Every cloned command
    /// sender (i.e. every tracker client) must be dropped first.
    pub fn shutdown(self) -> Coordinator {
        let Self {
            commands, thread, ..
        } = self;
        drop(commands);
        thread.join().expect("coordinator thread panicked")
    }
}

/// Spawn the coordinator on its own thread.
pub fn spawn(config: CacheConfig, region: Box<dyn SegmentRelease>) -> CoordinatorHandle {
    let (registry, view) = shared_registry();
    let (command_tx, command_rx) = channel();
    let (reply_tx, reply_rx) = channel();

    let coordinator = Coordinator::new(config, registry, region);
    let thread = std::thread::spawn(move || coordinator.run(command_rx, reply_tx));

    CoordinatorHandle {
        commands: command_tx,
        replies: Arc::new(Mutex::new(reply_rx)),
        registry: view,
        thread,
    }
}
