// Physical device handle with dynamic alignment discovery
//
// Raw devices opened for direct I/O reject requests whose offset or length
// is not a multiple of some device/driver-specific block size. Rather than
// trusting what the kernel reports, the device starts at 512 bytes and
// doubles until a request succeeds, remembering the first value that works.

use super::raid::{self, RaidFormat, METADATA_TRAILER_SIZE};
use crate::io::{
    aligned_window, AlignedBuffer, AlignedWindow, PlatformIO, RawDevice, MAX_ALIGNMENT,
    MIN_ALIGNMENT,
};
use crate::{EraseError, EraseResult};
use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

/// One physical block device, exclusively owned by whoever holds it.
pub struct Device {
    path: String,
    io: Arc<dyn PlatformIO>,
    handle: Option<Box<dyn RawDevice>>,
    size: Option<u64>,
    /// 0 while unknown
    alignment: usize,
    raid_format: RaidFormat,
    metadata: Option<Vec<u8>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("raid_format", &self.raid_format)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

fn not_open() -> std::io::Error {
    std::io::Error::new(ErrorKind::NotConnected, "device is not open")
}

/// Translate a possibly end-relative offset into an absolute one.
fn resolve(offset: i64, device_size: u64) -> Option<u64> {
    if offset >= 0 {
        Some(offset as u64)
    } else {
        device_size.checked_sub(offset.unsigned_abs())
    }
}

impl Device {
    pub fn new(path: impl Into<String>, io: Arc<dyn PlatformIO>) -> Self {
        Self {
            path: path.into(),
            io,
            handle: None,
            size: None,
            alignment: 0,
            raid_format: RaidFormat::Unset,
            metadata: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Discovered alignment, or 0 if not yet known
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Seed alignment discovery with a starting value
    pub fn set_alignment_hint(&mut self, alignment: usize) {
        self.alignment = alignment;
    }

    pub fn raid_format(&self) -> RaidFormat {
        self.raid_format
    }

    pub(crate) fn assume_raid_format(&mut self, format: RaidFormat) {
        self.raid_format = format;
    }

    pub fn has_metadata_backup(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn open(&mut self) -> EraseResult<()> {
        if self.handle.is_none() {
            let handle = self.io.open_device(&self.path)?;
            tracing::debug!(device = %self.path, backend = self.io.platform_name(), "Opened device");
            self.handle = Some(handle);
        }
        Ok(())
    }

    /// Release the handle; cached size and alignment survive.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!(device = %self.path, "Closed device");
        }
    }

    pub fn sync(&mut self) -> EraseResult<()> {
        if let Some(handle) = self.handle.as_deref() {
            handle.sync_data()?;
        }
        Ok(())
    }

    /// Device capacity, cached until an alignment failure clears it.
    pub fn read_size(&mut self) -> EraseResult<u64> {
        if let Some(size) = self.size {
            return Ok(size);
        }

        self.open()?;
        let size = self.handle.as_deref().ok_or_else(not_open)?.capacity()?;
        self.size = Some(size);
        Ok(size)
    }

    /// Classify the device by the RAID metadata found in its trailer.
    ///
    /// Devices without a signature are `Unknown` when at least
    /// `size_threshold` bytes, otherwise they stay `Unset`.
    pub fn detect_raid_type(&mut self, size_threshold: u64) -> EraseResult<RaidFormat> {
        self.open()?;
        let trailer = self.aligned_read(-(METADATA_TRAILER_SIZE as i64), METADATA_TRAILER_SIZE)?;

        let format = match raid::detect_signature(&trailer) {
            Some(format) => format,
            None if self.read_size()? >= size_threshold => RaidFormat::Unknown,
            None => RaidFormat::Unset,
        };

        tracing::info!(device = %self.path, format = %format, "Detected RAID format");
        self.raid_format = format;
        Ok(format)
    }

    /// Read `size` bytes at `offset`; negative offsets count from the end.
    pub fn aligned_read(&mut self, offset: i64, size: usize) -> EraseResult<Vec<u8>> {
        self.open()?;
        let device_size = self.read_size()?;
        self.check_bounds(offset, size, device_size)?;

        let mut alignment = self.starting_alignment();
        while alignment <= MAX_ALIGNMENT {
            match self.read_window(offset, size, alignment, device_size) {
                Ok((buffer, window, _)) => {
                    self.alignment = alignment;
                    return Ok(buffer.as_slice()[window.lead..window.lead + size].to_vec());
                }
                Err(e) => tracing::debug!(
                    device = %self.path,
                    offset,
                    size,
                    alignment,
                    error = %e,
                    "Aligned read failed, widening alignment"
                ),
            }
            alignment *= 2;
        }

        Err(self.alignment_failure(offset, size))
    }

    /// Write `data` at `offset` via read-modify-write of the aligned window.
    pub fn aligned_write(&mut self, offset: i64, data: &[u8]) -> EraseResult<()> {
        self.open()?;
        let device_size = self.read_size()?;
        self.check_bounds(offset, data.len(), device_size)?;

        let mut alignment = self.starting_alignment();
        while alignment <= MAX_ALIGNMENT {
            match self.write_window(offset, data, alignment, device_size) {
                Ok((written, required)) => {
                    self.alignment = alignment;
                    if written < required {
                        return Err(EraseError::ShortWrite {
                            device: self.path.clone(),
                            written,
                            expected: required,
                        });
                    }
                    return Ok(());
                }
                Err(e) => tracing::debug!(
                    device = %self.path,
                    offset,
                    size = data.len(),
                    alignment,
                    error = %e,
                    "Aligned write failed, widening alignment"
                ),
            }
            alignment *= 2;
        }

        Err(self.alignment_failure(offset, data.len()))
    }

    /// True iff the aligned window for the request lies inside the device.
    pub fn in_range(&mut self, offset: i64, size: usize) -> EraseResult<bool> {
        let device_size = self.read_size()?;
        let window = aligned_window(offset, size, self.starting_alignment());

        Ok(match resolve(window.start, device_size) {
            Some(start) => start
                .checked_add(window.len as u64)
                .is_some_and(|end| end <= device_size),
            None => false,
        })
    }

    /// Positioned write straight to the handle, bypassing alignment discovery.
    ///
    /// `data` must already be suitably aligned in memory, offset and length.
    pub fn write_raw(&mut self, data: &[u8], offset: u64) -> std::io::Result<usize> {
        self.open()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.handle.as_deref().ok_or_else(not_open)?.write_at(data, offset)
    }

    /// Copy the format-specific metadata region into memory.
    pub fn backup(&mut self) -> EraseResult<()> {
        let region = match self.metadata_region()? {
            Some(region) => region,
            None => return Ok(()),
        };

        let data = self.aligned_read(region.offset, region.size)?;
        tracing::info!(
            device = %self.path,
            format = %self.raid_format,
            bytes = data.len(),
            "Backed up RAID metadata"
        );
        self.metadata = Some(data);
        Ok(())
    }

    /// Write the backed-up metadata region back and discard the buffer.
    pub fn restore(&mut self) -> EraseResult<()> {
        let region = match self.metadata_region()? {
            Some(region) => region,
            None => return Ok(()),
        };

        let data = match self.metadata.take() {
            Some(data) if !data.is_empty() => data,
            _ => {
                return Err(EraseError::NoData(format!(
                    "{}: no {} metadata was backed up",
                    self.path, self.raid_format
                )))
            }
        };

        if let Err(e) = self.aligned_write(region.offset, &data) {
            // Keep the buffer so a later attempt can still succeed
            self.metadata = Some(data);
            return Err(e);
        }
        self.sync()?;

        tracing::info!(device = %self.path, format = %self.raid_format, "Restored RAID metadata");
        Ok(())
    }

    fn metadata_region(&self) -> EraseResult<Option<raid::MetadataRegion>> {
        if self.raid_format == RaidFormat::Unset {
            return Err(EraseError::Unsupported(format!(
                "{}: RAID format has not been detected",
                self.path
            )));
        }
        Ok(self.raid_format.metadata_region())
    }

    fn starting_alignment(&self) -> usize {
        if self.alignment == 0 {
            MIN_ALIGNMENT
        } else {
            self.alignment
        }
    }

    fn alignment_failure(&mut self, offset: i64, size: usize) -> EraseError {
        tracing::warn!(device = %self.path, offset, size, "No working alignment up to {} bytes", MAX_ALIGNMENT);
        // Rediscover both on the next request
        self.alignment = 0;
        self.size = None;
        EraseError::AlignmentFailure {
            device: self.path.clone(),
            offset,
            size,
        }
    }

    fn check_bounds(&self, offset: i64, size: usize, device_size: u64) -> EraseResult<()> {
        let in_bounds = resolve(offset, device_size)
            .and_then(|start| start.checked_add(size as u64))
            .is_some_and(|end| end <= device_size);

        if in_bounds {
            Ok(())
        } else {
            Err(EraseError::OutOfBounds {
                device: self.path.clone(),
                offset,
                size,
                device_size,
            })
        }
    }

    /// Read the aligned window for a request at one alignment.
    ///
    /// A short read is tolerated only when everything past the requested
    /// range is padding.
    fn read_window(
        &self,
        offset: i64,
        size: usize,
        alignment: usize,
        device_size: u64,
    ) -> std::io::Result<(AlignedBuffer, AlignedWindow, usize)> {
        let window = aligned_window(offset, size, alignment);
        let start = resolve(window.start, device_size)
            .ok_or_else(|| std::io::Error::from(ErrorKind::InvalidInput))?;

        let mut buffer = AlignedBuffer::for_direct_io(window.len).map_err(std::io::Error::other)?;
        let handle = self.handle.as_deref().ok_or_else(not_open)?;
        let read = handle.read_at(buffer.as_mut_slice(), start)?;

        if read < window.required(size) {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("read {} of {} bytes", read, window.required(size)),
            ));
        }
        Ok((buffer, window, read))
    }

    /// Returns bytes written and bytes the request needed.
    fn write_window(
        &self,
        offset: i64,
        data: &[u8],
        alignment: usize,
        device_size: u64,
    ) -> std::io::Result<(usize, usize)> {
        let (mut buffer, window, read) = self.read_window(offset, data.len(), alignment, device_size)?;
        buffer.as_mut_slice()[window.lead..window.lead + data.len()].copy_from_slice(data);

        let start = resolve(window.start, device_size)
            .ok_or_else(|| std::io::Error::from(ErrorKind::InvalidInput))?;
        let handle = self.handle.as_deref().ok_or_else(not_open)?;
        let written = handle.write_at(&buffer.as_slice()[..read], start)?;

        Ok((written, window.required(data.len())))
    }
}

/// True iff the larger size is within `tolerance_pct` percent of the smaller.
pub fn size_match(a: u64, b: u64, tolerance_pct: f64) -> bool {
    let (small, large) = if a <= b { (a, b) } else { (b, a) };
    (large - small) as f64 <= small as f64 * tolerance_pct / 100.0
}
