// Canary markers
//
// Before erasing, a session-unique marker is written at regular offsets across
// the whole device and read back. After erasing, none of them may survive.

use crate::drives::Device;
use crate::error::{retry_blocking, FixedDelay};
use crate::EraseResult;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Marker bytes unique to one erase session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryPattern {
    bytes: Vec<u8>,
}

impl CanaryPattern {
    pub fn for_session(started: DateTime<Utc>) -> Self {
        let text = format!(
            "APPLIANCE-ERASE-CANARY {} END",
            started.to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        Self {
            bytes: text.into_bytes(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Offsets `0, spacing, 2*spacing, ...` at which a `len`-byte marker still fits.
pub fn canary_offsets(device_size: u64, len: usize, spacing: u64) -> Vec<u64> {
    let len = len as u64;
    let spacing = spacing.max(len).max(1);

    let mut offsets = Vec::new();
    let mut offset = 0u64;
    while offset.checked_add(len).is_some_and(|end| end <= device_size) {
        offsets.push(offset);
        match offset.checked_add(spacing) {
            Some(next) => offset = next,
            None => break,
        }
    }
    offsets
}

/// Write the marker at every canary offset and flush. Returns how many were written.
///
/// Each write gets one retry; a second failure is returned.
pub fn write_canaries(device: &mut Device, pattern: &CanaryPattern, spacing: u64) -> EraseResult<usize> {
    let offsets = canary_offsets(device.read_size()?, pattern.len(), spacing);
    let once_more = FixedDelay::new(2, Duration::ZERO);

    for &offset in &offsets {
        retry_blocking(&once_more, "canary-write", || {
            device.aligned_write(offset as i64, pattern.as_bytes())
        })?;
    }
    device.sync()?;

    tracing::info!(device = %device.path(), count = offsets.len(), "Wrote canaries");
    Ok(offsets.len())
}

/// Number of canary offsets currently holding the marker.
pub fn count_canaries(device: &mut Device, pattern: &CanaryPattern, spacing: u64) -> EraseResult<usize> {
    let offsets = canary_offsets(device.read_size()?, pattern.len(), spacing);

    let mut found = 0;
    for &offset in &offsets {
        if device.aligned_read(offset as i64, pattern.len())? == pattern.as_bytes() {
            found += 1;
        }
    }

    tracing::debug!(device = %device.path(), checked = offsets.len(), found, "Counted canaries");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryDisk, MemoryIO, MAX_ALIGNMENT, MIN_ALIGNMENT};
    use crate::EraseError;
    use chrono::TimeZone;
    use std::sync::Arc;

    const GIB: u64 = 1 << 30;

    fn device(size: usize) -> (Device, Arc<MemoryDisk>) {
        let io = Arc::new(MemoryIO::new());
        let disk = io.add_disk("/dev/mem0", size, 512);
        (Device::new("/dev/mem0", io), disk)
    }

    // aligned_write tries every alignment from MIN to MAX before giving up
    fn writes_per_attempt() -> usize {
        (MAX_ALIGNMENT / MIN_ALIGNMENT).trailing_zeros() as usize + 1
    }

    fn pattern() -> CanaryPattern {
        CanaryPattern::for_session(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_pattern_is_session_specific() {
        let a = pattern();
        let b = CanaryPattern::for_session(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap());
        assert_ne!(a, b);
        assert!(a.as_bytes().starts_with(b"APPLIANCE-ERASE-CANARY 2026-03-01T12:00:00"));
    }

    #[test]
    fn test_offsets_for_small_device() {
        assert_eq!(canary_offsets(4 << 20, 64, GIB), vec![0]);
    }

    #[test]
    fn test_offsets_stop_before_device_end() {
        assert_eq!(canary_offsets(3 * GIB, 64, GIB), vec![0, GIB, 2 * GIB]);
        assert_eq!(canary_offsets(2 * GIB + 63, 64, GIB), vec![0, GIB]);
        assert_eq!(canary_offsets(2 * GIB + 64, 64, GIB), vec![0, GIB, 2 * GIB]);
    }

    #[test]
    fn test_offsets_for_device_smaller_than_pattern() {
        assert!(canary_offsets(32, 64, GIB).is_empty());
    }

    #[test]
    fn test_spacing_never_overlaps_markers() {
        assert_eq!(canary_offsets(256, 64, 10), vec![0, 64, 128, 192]);
    }

    #[test]
    fn test_write_then_count_then_overwrite() {
        let (mut device, disk) = device(64 * 1024);
        let pattern = pattern();

        let written = write_canaries(&mut device, &pattern, 8192).unwrap();
        assert_eq!(written, 8);
        assert_eq!(count_canaries(&mut device, &pattern, 8192).unwrap(), 8);

        for offset in canary_offsets(64 * 1024, pattern.len(), 8192) {
            disk.poke(offset as usize, &vec![0u8; pattern.len()]);
        }
        assert_eq!(count_canaries(&mut device, &pattern, 8192).unwrap(), 0);
    }

    #[test]
    fn test_partial_erase_is_counted() {
        let (mut device, disk) = device(64 * 1024);
        let pattern = pattern();
        write_canaries(&mut device, &pattern, 8192).unwrap();

        disk.poke(0, &[0xFF; 8]);
        assert_eq!(count_canaries(&mut device, &pattern, 8192).unwrap(), 7);
    }

    #[test]
    fn test_persistent_write_failure_is_returned() {
        let (mut device, disk) = device(64 * 1024);
        disk.set_fail_writes(true);
        assert!(write_canaries(&mut device, &pattern(), 8192).is_err());
    }

    #[test]
    fn test_single_failed_write_is_retried() {
        let (mut device, disk) = device(64 * 1024);
        let pattern = pattern();

        // Exhausts the first aligned_write of the first canary, nothing more
        disk.fail_next_writes(writes_per_attempt());
        let written = write_canaries(&mut device, &pattern, 8192).unwrap();

        assert_eq!(written, 8);
        assert_eq!(disk.pending_write_failures(), 0);
        assert_eq!(disk.failed_writes(), writes_per_attempt());
        assert_eq!(disk.writes().len(), 8);
        assert_eq!(disk.writes()[0].offset, 0);
        assert_eq!(count_canaries(&mut device, &pattern, 8192).unwrap(), 8);
    }

    #[test]
    fn test_write_failing_twice_is_returned() {
        let (mut device, disk) = device(64 * 1024);

        disk.fail_next_writes(2 * writes_per_attempt());
        let result = write_canaries(&mut device, &pattern(), 8192);

        assert!(matches!(result, Err(EraseError::AlignmentFailure { offset: 0, .. })));
        assert_eq!(disk.pending_write_failures(), 0);
        assert!(disk.writes().is_empty());
    }
}
