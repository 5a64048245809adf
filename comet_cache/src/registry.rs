//! Cache registry and hit log.
//!
//! The registry maps logical keys to entry descriptors; the hit log is a
//! secondary index from hit count to the keys (and sizes) sitting at that
//! count, in bucket-arrival order. Both are mutated only from the
//! coordinator's thread; clients read through a [`RegistryView`].

use comet::value::{Dtype, PayloadKind};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Registry entry describing a cached value.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Server-scoped unique segment name. For device entries this is the
    /// base64-encoded IPC handle instead.
    pub segment_name: String,
    /// Array shape; empty for sequences.
    pub shape: Vec<usize>,
    /// Element dtype; `None` for sequences.
    pub dtype: Option<Dtype>,
    /// Payload size in bytes (logical size for device entries).
    pub size: usize,
    /// Monotonically increasing access counter.
    pub hits: u64,
    /// Payload kind.
    pub kind: PayloadKind,
    /// Device ordinal for device entries.
    pub device_id: Option<u32>,
}

/// One hit-log bucket entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HitEntry {
    /// Logical key.
    pub key: String,
    /// Entry payload size in bytes.
    pub size: usize,
}

/// Key-to-descriptor mapping plus the hit log.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Descriptor>,
    hit_log: BTreeMap<u64, Vec<HitEntry>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Descriptor for a key, cloned out.
    pub fn get(&self, key: &str) -> Option<Descriptor> {
        self.entries.get(key).cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry, registering it in its hit-log bucket.
    pub fn insert(&mut self, key: String, descriptor: Descriptor) {
        self.log_insert(descriptor.hits, &key, descriptor.size);
        self.entries.insert(key, descriptor);
    }

    /// Record a hit: increment the counter and move the key to the next
    /// bucket. Returns the new hit count and the entry kind, or `None` if
    /// the key is absent.
    pub fn touch(&mut self, key: &str) -> Option<(u64, PayloadKind)> {
        let descriptor = self.entries.get_mut(key)?;
        let old_hits = descriptor.hits;
        descriptor.hits += 1;
        let (hits, kind, size) = (descriptor.hits, descriptor.kind, descriptor.size);

        self.log_remove(old_hits, key);
        self.log_insert(hits, key, size);
        Some((hits, kind))
    }

    /// Remove an entry and its hit-log record.
    pub fn remove(&mut self, key: &str) -> Option<Descriptor> {
        let descriptor = self.entries.remove(key)?;
        self.log_remove(descriptor.hits, key);
        Some(descriptor)
    }

    /// Sum of sizes over host-kind entries.
    pub fn host_bytes(&self) -> usize {
        self.entries
            .values()
            .filter(|d| !d.kind.is_device())
            .map(|d| d.size)
            .sum()
    }

    /// Sum of sizes over device-kind entries.
    pub fn device_bytes(&self) -> usize {
        self.entries
            .values()
            .filter(|d| d.kind.is_device())
            .map(|d| d.size)
            .sum()
    }

    /// Keys in eviction order: ascending hit count, bucket-arrival order
    /// within a bucket.
    pub fn eviction_order(&self) -> Vec<(String, usize, PayloadKind)> {
        self.hit_log
            .values()
            .flatten()
            .filter_map(|entry| {
                self.entries
                    .get(&entry.key)
                    .map(|d| (entry.key.clone(), entry.size, d.kind))
            })
            .collect()
    }

    /// Diagnostic: hit log and entries agree. Every entry appears in
    /// exactly the bucket of its hit count, and no stray bucket entries
    /// exist.
    pub fn is_consistent(&self) -> bool {
        let logged: usize = self.hit_log.values().map(Vec::len).sum();
        if logged != self.entries.len() {
            return false;
        }
        self.entries.iter().all(|(key, descriptor)| {
            self.hit_log
                .get(&descriptor.hits)
                .is_some_and(|bucket| bucket.iter().any(|e| e.key == *key && e.size == descriptor.size))
        })
    }

    fn log_insert(&mut self, hits: u64, key: &str, size: usize) {
        self.hit_log.entry(hits).or_default().push(HitEntry {
            key: key.to_string(),
            size,
        });
    }

    fn log_remove(&mut self, hits: u64, key: &str) {
        if let Some(bucket) = self.hit_log.get_mut(&hits) {
            bucket.retain(|e| e.key != key);
            if bucket.is_empty() {
                self.hit_log.remove(&hits);
            }
        }
    }
}

/// Shared registry handles: the coordinator keeps the writable side, every
/// client gets a [`RegistryView`].
pub fn shared_registry() -> (Arc<RwLock<Registry>>, RegistryView) {
    let inner = Arc::new(RwLock::new(Registry::new()));
    let view = RegistryView {
        inner: Arc::clone(&inner),
    };
    (inner, view)
}

/// Read-only registry handle held by tracker clients.
///
/// Reads may race the coordinator's mutations; clients re-verify through
/// commands before mutating, so a dirty read only ever costs a wasted
/// attach attempt.
#[derive(Clone)]
pub struct RegistryView {
    inner: Arc<RwLock<Registry>>,
}

impl RegistryView {
    /// Descriptor for a key, if present.
    pub fn get(&self, key: &str) -> Option<Descriptor> {
        self.inner.read().get(key)
    }

    /// True if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().contains(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(segment: &str, size: usize) -> Descriptor {
        Descriptor {
            segment_name: segment.to_string(),
            shape: vec![size / 4],
            dtype: Some(Dtype::I32),
            size,
            hits: 0,
            kind: PayloadKind::HostArray,
            device_id: None,
        }
    }

    #[test]
    fn insert_and_get() {
        let mut registry = Registry::new();
        registry.insert("a.dat".to_string(), descriptor("comet_1_0", 16));

        assert!(registry.contains("a.dat"));
        let d = registry.get("a.dat").unwrap();
        assert_eq!(d.size, 16);
        assert_eq!(d.hits, 0);
        assert!(registry.is_consistent());
    }

    #[test]
    fn touch_moves_buckets() {
        let mut registry = Registry::new();
        registry.insert("a.dat".to_string(), descriptor("comet_1_0", 16));

        let (hits, kind) = registry.touch("a.dat").unwrap();
        assert_eq!(hits, 1);
        assert_eq!(kind, PayloadKind::HostArray);
        assert_eq!(registry.get("a.dat").unwrap().hits, 1);
        assert!(registry.is_consistent());

        assert!(registry.touch("missing").is_none());
    }

    #[test]
    fn remove_clears_hit_log() {
        let mut registry = Registry::new();
        registry.insert("a.dat".to_string(), descriptor("comet_1_0", 16));
        registry.touch("a.dat");

        let removed = registry.remove("a.dat").unwrap();
        assert_eq!(removed.hits, 1);
        assert!(registry.is_empty());
        assert!(registry.is_consistent());
        assert!(registry.remove("a.dat").is_none());
    }

    #[test]
    fn eviction_order_is_hits_then_fifo() {
        let mut registry = Registry::new();
        registry.insert("a.dat".to_string(), descriptor("comet_1_0", 16));
        registry.insert("b.dat".to_string(), descriptor("comet_1_1", 16));
        registry.insert("c.dat".to_string(), descriptor("comet_1_2", 16));
        registry.touch("a.dat");
        registry.touch("a.dat");
        registry.touch("c.dat");

        // b (0 hits) first, then c (1 hit), then a (2 hits)
        let order: Vec<String> = registry
            .eviction_order()
            .into_iter()
            .map(|(key, _, _)| key)
            .collect();
        assert_eq!(order, vec!["b.dat", "c.dat", "a.dat"]);
    }

    #[test]
    fn budget_sums_split_by_kind() {
        let mut registry = Registry::new();
        registry.insert("host.dat".to_string(), descriptor("comet_1_0", 32));
        let mut device = descriptor("aGFuZGxl", 64);
        device.kind = PayloadKind::DeviceArray;
        device.device_id = Some(0);
        registry.insert("gpu.dat".to_string(), device);

        assert_eq!(registry.host_bytes(), 32);
        assert_eq!(registry.device_bytes(), 64);
    }

    #[test]
    fn view_sees_coordinator_writes() {
        let (writable, view) = shared_registry();
        writable
            .write()
            .insert("a.dat".to_string(), descriptor("comet_1_0", 16));

        assert!(view.contains("a.dat"));
        assert_eq!(view.get("a.dat").unwrap().size, 16);
        assert_eq!(view.len(), 1);
    }
}

#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, u16),
        Touch(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), 1..4096u16).prop_map(|(k, s)| Op::Insert(k, s)),
            any::<u8>().prop_map(Op::Touch),
            any::<u8>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn hit_log_agrees_under_any_interleaving(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut registry = Registry::new();
            for op in ops {
                match op {
                    Op::Insert(k, size) => {
                        let key = format!("k{k}.dat");
                        if !registry.contains(&key) {
                            registry.insert(key.clone(), Descriptor {
                                segment_name: format!("comet_1_{k}"),
                                shape: vec![],
                                dtype: Some(Dtype::U8),
                                size: size as usize,
                                hits: 0,
                                kind: PayloadKind::HostArray,
                                device_id: None,
                            });
                        }
                    }
                    Op::Touch(k) => { registry.touch(&format!("k{k}.dat")); }
                    Op::Remove(k) => { registry.remove(&format!("k{k}.dat")); }
                }
                prop_assert!(registry.is_consistent());
            }
        }
    }
}
