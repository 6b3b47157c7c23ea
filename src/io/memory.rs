// In-memory block devices
//
// Behaves like a raw block device opened for direct I/O: misaligned offsets
// or lengths are rejected with EINVAL, reads past the end come back short,
// and writes at or past the end fail with ENOSPC.

use super::platform_specific::{PlatformIO, RawDevice};
use super::{IOError, IOResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One write that reached the medium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub offset: u64,
    pub len: usize,
    pub first_byte: u8,
}

pub struct MemoryDisk {
    data: Mutex<Vec<u8>>,
    min_alignment: usize,
    fail_writes: AtomicBool,
    fail_next: AtomicUsize,
    failed: AtomicUsize,
    write_log: Mutex<Vec<WriteRecord>>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryDisk {
    pub fn new(size: usize, min_alignment: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; size]),
            min_alignment: min_alignment.max(1),
            fail_writes: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            write_log: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        relock(&self.data).len()
    }

    pub fn min_alignment(&self) -> usize {
        self.min_alignment
    }

    /// Copy bytes out, bypassing alignment rules
    pub fn peek(&self, offset: usize, len: usize) -> Vec<u8> {
        let data = relock(&self.data);
        let end = (offset + len).min(data.len());
        data[offset.min(end)..end].to_vec()
    }

    /// Place bytes directly on the medium, bypassing alignment rules
    pub fn poke(&self, offset: usize, bytes: &[u8]) {
        let mut data = relock(&self.data);
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Make every subsequent write fail with EIO
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` aligned writes with EIO, then recover
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn pending_write_failures(&self) -> usize {
        self.fail_next.load(Ordering::SeqCst)
    }

    /// Writes rejected by injected faults so far
    pub fn failed_writes(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    fn injected_fault(&self) -> bool {
        let one_off = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let fault = one_off || self.fail_writes.load(Ordering::SeqCst);
        if fault {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fault
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        relock(&self.write_log).clone()
    }

    fn check_alignment(&self, offset: u64, len: usize) -> std::io::Result<()> {
        let align = self.min_alignment as u64;
        if offset % align != 0 || (len as u64) % align != 0 {
            return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(())
    }
}

struct MemoryHandle {
    disk: Arc<MemoryDisk>,
}

impl RawDevice for MemoryHandle {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.disk.check_alignment(offset, buffer.len())?;

        let data = relock(&self.disk.data);
        let size = data.len() as u64;
        if offset >= size {
            return Ok(0);
        }

        let start = offset as usize;
        let n = buffer.len().min(data.len() - start);
        buffer[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, bytes: &[u8], offset: u64) -> std::io::Result<usize> {
        self.disk.check_alignment(offset, bytes.len())?;

        if self.disk.injected_fault() {
            return Err(std::io::Error::from_raw_os_error(libc::EIO));
        }

        let mut data = relock(&self.disk.data);
        let size = data.len() as u64;
        if offset >= size {
            return Err(std::io::Error::from_raw_os_error(libc::ENOSPC));
        }

        let start = offset as usize;
        let n = bytes.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&bytes[..n]);
        drop(data);

        relock(&self.disk.write_log).push(WriteRecord {
            offset,
            len: n,
            first_byte: bytes.first().copied().unwrap_or(0),
        });
        Ok(n)
    }

    fn capacity(&self) -> std::io::Result<u64> {
        Ok(self.disk.size() as u64)
    }

    fn sync_data(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Registry of in-memory disks addressed by path
#[derive(Default)]
pub struct MemoryIO {
    disks: Mutex<HashMap<String, Arc<MemoryDisk>>>,
}

impl MemoryIO {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_disk(&self, path: &str, size: usize, min_alignment: usize) -> Arc<MemoryDisk> {
        let disk = Arc::new(MemoryDisk::new(size, min_alignment));
        relock(&self.disks).insert(path.to_string(), disk.clone());
        disk
    }

    pub fn disk(&self, path: &str) -> Option<Arc<MemoryDisk>> {
        relock(&self.disks).get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = relock(&self.disks).keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl PlatformIO for MemoryIO {
    fn open_device(&self, path: &str) -> IOResult<Box<dyn RawDevice>> {
        let disk = self
            .disk(path)
            .ok_or_else(|| IOError::OperationFailed(format!("Failed to open {}: no such disk", path)))?;
        Ok(Box::new(MemoryHandle { disk }))
    }

    fn platform_name(&self) -> &str {
        "in-memory"
    }
}
