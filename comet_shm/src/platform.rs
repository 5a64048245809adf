//! Linux-specific shared memory operations

use crate::error::{RegionError, RegionResult};
use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

/// Create a memory-mapped segment file, failing if it already exists.
pub fn create_segment_mmap(path: &str, size: usize) -> RegionResult<MmapMut> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)
        .map_err(|e| map_alloc_error(e, path, size))?;

    file.set_len(size as u64)
        .map_err(|e| map_alloc_error(e, path, size))?;

    let mmap = unsafe {
        MmapOptions::new()
            .populate()
            .map_mut(&file)
            .map_err(|e| map_alloc_error(e, path, size))?
    };

    Ok(mmap)
}

/// Attach read-write to an existing segment file (producer fill path).
pub fn attach_segment_mmap_rw(path: &str) -> RegionResult<MmapMut> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;

    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Attach read-only to an existing segment file.
pub fn attach_segment_mmap(path: &str) -> RegionResult<Mmap> {
    let file = OpenOptions::new().read(true).open(path)?;

    let mmap = unsafe { MmapOptions::new().map(&file)? };
    Ok(mmap)
}

/// Map allocation-path IO failures onto region errors.
///
/// ENOSPC/ENOMEM on `/dev/shm` mean the backing store is exhausted; an
/// existing file is a name collision.
fn map_alloc_error(e: std::io::Error, path: &str, size: usize) -> RegionError {
    match e.raw_os_error() {
        Some(code) if code == libc::ENOSPC || code == libc::ENOMEM => {
            RegionError::OutOfSharedMemory { requested: size }
        }
        _ if e.kind() == std::io::ErrorKind::AlreadyExists => RegionError::AlreadyExists {
            name: path.to_string(),
        },
        _ => RegionError::Io { source: e },
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_attach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg").to_string_lossy().to_string();

        let mut mmap = create_segment_mmap(&path, 128).unwrap();
        mmap[..4].copy_from_slice(b"data");
        drop(mmap);

        let ro = attach_segment_mmap(&path).unwrap();
        assert_eq!(&ro[..4], b"data");
    }

    #[test]
    fn create_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg").to_string_lossy().to_string();

        let _first = create_segment_mmap(&path, 128).unwrap();
        assert!(matches!(
            create_segment_mmap(&path, 128),
            Err(RegionError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn attach_missing_is_io_error() {
        let result = attach_segment_mmap("/nonexistent/path/seg");
        assert!(matches!(result, Err(RegionError::Io { .. })));
    }

    #[test]
    fn pid_is_nonzero() {
        assert!(get_current_pid() > 0);
    }
}
