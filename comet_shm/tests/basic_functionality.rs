//! Basic functionality tests for the COMET region layer

use comet::value::Scalar;
use comet_shm::{
    LocalRegion, RegionAllocator, RegionError, RegionResult, SegmentBuffer, attach,
    decode_sequence,
};

#[test]
fn test_basic_allocate_fill_read() -> RegionResult<()> {
    let mut region = LocalRegion::new();
    let payload = b"Hello, COMET!".to_vec();

    let name = region.allocate_segment(payload.len())?;
    let mut buffer = SegmentBuffer::attach(&name)?;
    buffer.write_payload(&payload)?;
    drop(buffer);

    let mut view = attach(&name)?;
    assert_eq!(view.payload(), &payload[..]);
    view.release();

    region.release(&name)?;
    Ok(())
}

#[test]
fn test_concurrent_attachers() -> RegionResult<()> {
    let mut region = LocalRegion::new();
    let payload = vec![0x5A; 512];

    let name = region.allocate_segment(payload.len())?;
    let mut buffer = SegmentBuffer::attach(&name)?;
    buffer.write_payload(&payload)?;
    drop(buffer);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let name = name.clone();
            let payload = payload.clone();
            std::thread::spawn(move || -> RegionResult<()> {
                let mut view = attach(&name)?;
                assert_eq!(view.payload(), &payload[..]);
                view.release();
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap()?;
    }

    region.release(&name)?;
    Ok(())
}

#[test]
fn test_sequence_roundtrip_via_region() -> RegionResult<()> {
    let mut region = LocalRegion::new();
    let items = vec![
        Scalar::Int(10),
        Scalar::Int(20),
        Scalar::Float(0.5),
        Scalar::Bool(true),
    ];

    let name = region.allocate_sequence(&items)?;
    let view = attach(&name)?;
    assert_eq!(decode_sequence(view.payload())?, items);
    drop(view);

    region.release(&name)?;
    Ok(())
}

#[test]
fn test_release_invalidates_name() -> RegionResult<()> {
    let mut region = LocalRegion::new();
    let name = region.allocate_segment(64)?;
    region.release(&name)?;

    assert!(matches!(
        attach(&name),
        Err(RegionError::NoSuchSegment { .. })
    ));
    Ok(())
}

#[test]
fn test_shutdown_releases_all_segments() -> RegionResult<()> {
    let region = LocalRegion::new();
    let mut handle = region.clone();

    let a = handle.allocate_segment(32)?;
    let b = handle.allocate_segment(32)?;

    region.shutdown();

    assert!(attach(&a).is_err());
    assert!(attach(&b).is_err());
    Ok(())
}

#[test]
fn test_attachment_survives_server_release() -> RegionResult<()> {
    // A view attached before release stays readable: the mapping holds the
    // file open even after the name is unlinked.
    let mut region = LocalRegion::new();
    let payload = vec![9u8; 128];

    let name = region.allocate_segment(payload.len())?;
    let mut buffer = SegmentBuffer::attach(&name)?;
    buffer.write_payload(&payload)?;
    drop(buffer);

    let view = attach(&name)?;
    region.release(&name)?;

    assert_eq!(view.payload(), &payload[..]);
    Ok(())
}
