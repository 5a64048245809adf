//! End-to-end scenarios for the worker cache: tracker clients against a
//! running coordinator and a live region layer.

use comet_cache::{
    CacheCommand, CacheTracker, CoordinatorHandle, SimDeviceFabric, spawn,
};
use comet::config::CacheConfig;
use comet::value::{
    CachedValue, CandidateValue, DeviceNdArray, Dtype, HostNdArray, Scalar, SequenceItem,
};
use comet_shm::{LocalRegion, attach};
use std::sync::Arc;

fn config(size: usize) -> CacheConfig {
    CacheConfig {
        size,
        gpu_cache_size: 1 << 20,
        ..CacheConfig::default()
    }
}

fn start(config: CacheConfig) -> (LocalRegion, CoordinatorHandle, SimDeviceFabric) {
    let region = LocalRegion::new();
    let handle = spawn(config, Box::new(region.clone()));
    (region, handle, SimDeviceFabric::new())
}

fn tracker(
    id: u32,
    region: &LocalRegion,
    handle: &CoordinatorHandle,
    fabric: &SimDeviceFabric,
    device_id: u32,
) -> CacheTracker {
    CacheTracker::connect(
        id,
        Box::new(region.clone()),
        handle,
        Arc::new(fabric.device(device_id)),
    )
}

/// Wait until every previously sent command is processed: the channels
/// are FIFO, so the reply to a query implies everything before it ran.
fn sync(handle: &CoordinatorHandle) {
    let replies = handle.replies();
    let guard = replies.lock();
    handle
        .commands()
        .send(CacheCommand::IsInCache {
            key: "__barrier__".to_string(),
        })
        .unwrap();
    guard.recv().unwrap();
}

fn is_locked(handle: &CoordinatorHandle, key: &str) -> bool {
    let replies = handle.replies();
    let guard = replies.lock();
    handle
        .commands()
        .send(CacheCommand::IsLocked {
            key: key.to_string(),
        })
        .unwrap();
    guard.recv().unwrap().flag()
}

fn i32_array(shape: Vec<usize>, values: &[i32]) -> HostNdArray {
    HostNdArray {
        shape,
        dtype: Dtype::I32,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

#[test]
fn insert_and_retrieve_host_array() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    let array = i32_array(vec![2, 2], &[1, 2, 3, 4]);
    tracker
        .insert(
            CandidateValue::Array(array.clone()),
            "/tmp/job1/x.npy",
            "p0",
            "f",
        )
        .unwrap();
    sync(&handle);

    let descriptor = handle.registry().get("x.npy").unwrap();
    assert_eq!(descriptor.size, 16);
    assert_eq!(descriptor.hits, 0);
    assert_eq!(descriptor.shape, vec![2, 2]);

    let (value, attachment) = tracker.retrieve("/tmp/job1/x.npy", "p0", "f").unwrap();
    assert_eq!(value, CachedValue::Array(array));
    let mut attachment = attachment.expect("host retrieval returns an attachment");
    attachment.release();

    sync(&handle);
    assert_eq!(handle.registry().get("x.npy").unwrap().hits, 1);

    drop(tracker);
    let coordinator = handle.shutdown();
    assert_eq!(coordinator.violations(), 0);
}

#[test]
fn concurrent_inserts_produce_one_entry() {
    let (region, handle, fabric) = start(config(1 << 20));

    let threads: Vec<_> = (0..2)
        .map(|id| {
            let mut t = tracker(id, &region, &handle, &fabric, 0);
            std::thread::spawn(move || {
                let array = i32_array(vec![2, 2], &[1, 2, 3, 4]);
                t.insert(CandidateValue::Array(array), "/tmp/x.npy", "p0", "f")
                    .unwrap();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    sync(&handle);

    assert_eq!(handle.registry().len(), 1);
    assert!(!is_locked(&handle, "x.npy"));

    let coordinator = handle.shutdown();
    assert!(coordinator.locked_keys().is_empty());
    assert_eq!(coordinator.violations(), 0);
}

#[test]
fn eviction_keeps_fresh_entry_over_hit_entry() {
    let (region, handle, fabric) = start(config(20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    tracker
        .insert(
            CandidateValue::Array(i32_array(vec![4], &[1, 2, 3, 4])),
            "x.npy",
            "p0",
            "f",
        )
        .unwrap();
    sync(&handle);
    let x_segment = handle.registry().get("x.npy").unwrap().segment_name;

    for _ in 0..2 {
        let (_, attachment) = tracker.retrieve("x.npy", "p0", "f").unwrap();
        drop(attachment);
    }
    sync(&handle);
    assert_eq!(handle.registry().get("x.npy").unwrap().hits, 2);

    tracker
        .insert(
            CandidateValue::Array(i32_array(vec![4], &[5, 6, 7, 8])),
            "y.npy",
            "p0",
            "f",
        )
        .unwrap();
    sync(&handle);

    // 32 bytes exceed the 20-byte budget; the fresh entry is protected,
    // so the older one goes despite its hits.
    assert!(!handle.registry().contains("x.npy"));
    assert!(handle.registry().contains("y.npy"));
    assert!(attach(&x_segment).is_err());

    // A GET racing the eviction is a miss, not a failure.
    assert!(tracker.retrieve("x.npy", "p0", "f").is_err());
}

#[test]
fn sequence_roundtrip_list_and_tuple() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    let items = vec![
        SequenceItem::Scalar(Scalar::Int(10)),
        SequenceItem::Scalar(Scalar::Int(20)),
        SequenceItem::Scalar(Scalar::Int(30)),
    ];

    tracker
        .insert(CandidateValue::List(items.clone()), "nums", "p0", "f")
        .unwrap();
    tracker
        .insert(CandidateValue::Tuple(items), "fixed", "p0", "f")
        .unwrap();
    sync(&handle);

    let expected = vec![Scalar::Int(10), Scalar::Int(20), Scalar::Int(30)];

    let (value, attachment) = tracker.retrieve("nums", "p0", "f").unwrap();
    assert_eq!(value, CachedValue::List(expected.clone()));
    drop(attachment);

    let (value, attachment) = tracker.retrieve("fixed", "p0", "f").unwrap();
    assert_eq!(value, CachedValue::Tuple(expected));
    drop(attachment);
}

#[test]
fn remove_invalidates_key_and_segment() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    tracker
        .insert(
            CandidateValue::Array(i32_array(vec![2, 2], &[1, 2, 3, 4])),
            "x.npy",
            "p0",
            "f",
        )
        .unwrap();
    sync(&handle);
    let segment = handle.registry().get("x.npy").unwrap().segment_name;

    tracker.remove("x.npy").unwrap();
    sync(&handle);

    assert!(!tracker.in_cache("x.npy"));
    assert!(attach(&segment).is_err());
}

#[test]
fn replace_swaps_value_and_releases_old_segment() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    let old = i32_array(vec![2], &[1, 2]);
    let new = i32_array(vec![2], &[8, 9]);

    tracker
        .insert(CandidateValue::Array(old), "x.npy", "p0", "f")
        .unwrap();
    sync(&handle);
    let old_segment = handle.registry().get("x.npy").unwrap().segment_name;

    tracker
        .replace(CandidateValue::Array(new.clone()), "x.npy", "p0", "f")
        .unwrap();
    sync(&handle);

    let (value, attachment) = tracker.retrieve("x.npy", "p0", "f").unwrap();
    assert_eq!(value, CachedValue::Array(new));
    drop(attachment);
    assert!(attach(&old_segment).is_err());
}

#[test]
fn device_entry_misses_on_foreign_device() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut owner = tracker(1, &region, &handle, &fabric, 0);
    let mut foreign = tracker(2, &region, &handle, &fabric, 1);

    let array = DeviceNdArray {
        shape: vec![4],
        dtype: Dtype::F32,
        nbytes: 16,
        device_id: 0,
        ipc_token: 42,
    };
    owner
        .insert(CandidateValue::Device(array), "d.npy", "p0", "f")
        .unwrap();
    sync(&handle);
    assert!(handle.registry().contains("d.npy"));

    // The foreign device cannot open the handle: miss, no mutation.
    assert!(!foreign.in_cache("d.npy"));
    assert_eq!(foreign.pooled_device_handles(), 0);
    sync(&handle);
    assert!(handle.registry().contains("d.npy"));

    // The owning device probes, pools the handle, and retrieves.
    assert!(owner.in_cache("d.npy"));
    assert_eq!(owner.pooled_device_handles(), 1);
    let (value, attachment) = owner.retrieve("d.npy", "p0", "f").unwrap();
    assert!(attachment.is_none());
    match value {
        CachedValue::Device(device) => {
            assert_eq!(device.device_id, 0);
            assert_eq!(device.nbytes, 16);
        }
        other => panic!("expected device value, got {other:?}"),
    }
    assert_eq!(owner.pooled_device_handles(), 1);

    owner.close_device_handles();
    assert_eq!(owner.pooled_device_handles(), 0);
}

#[test]
fn zero_byte_candidate_is_skipped_but_unlocked() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    tracker
        .insert(CandidateValue::List(vec![]), "empty", "p0", "f")
        .unwrap();
    sync(&handle);

    assert!(handle.registry().is_empty());
    assert!(!is_locked(&handle, "empty"));
}

#[test]
fn object_dtype_candidate_never_locks() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    tracker
        .insert(
            CandidateValue::Array(HostNdArray {
                shape: vec![4],
                dtype: Dtype::Object,
                data: vec![],
            }),
            "objs.npy",
            "p0",
            "f",
        )
        .unwrap();
    sync(&handle);

    assert!(handle.registry().is_empty());
    assert!(!is_locked(&handle, "objs.npy"));
}

#[test]
fn stale_lock_blocks_until_disconnect_sweep() {
    let (region, handle, fabric) = start(config(1 << 20));
    let mut tracker = tracker(1, &region, &handle, &fabric, 0);

    // A client that vanished mid-insert left its lock behind.
    handle
        .commands()
        .send(CacheCommand::Lock {
            key: "x.npy".to_string(),
            owner: 99,
        })
        .unwrap();
    sync(&handle);

    tracker
        .insert(
            CandidateValue::Array(i32_array(vec![2], &[1, 2])),
            "x.npy",
            "p0",
            "f",
        )
        .unwrap();
    sync(&handle);
    assert!(handle.registry().is_empty());

    // The coordinator sweeps the dead client's locks; inserts work again.
    handle
        .commands()
        .send(CacheCommand::Disconnect { owner: 99 })
        .unwrap();
    tracker
        .insert(
            CandidateValue::Array(i32_array(vec![2], &[1, 2])),
            "x.npy",
            "p0",
            "f",
        )
        .unwrap();
    sync(&handle);
    assert!(handle.registry().contains("x.npy"));
}
