// Pattern Overwrite Algorithm - fallback when the drive cannot erase itself
//
// Each pass fills the device front to back with one byte value. The end of
// the device is found by the write failing, not by the cached size, so a
// pass also covers any tail the size query missed.

use crate::drives::Device;
use crate::io::{align_up, AlignedBuffer, MAX_ALIGNMENT};
use crate::EraseResult;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub pattern: u8,
    pub bytes_written: u64,
    /// Error that ended the pass, normally end-of-device
    pub stopped_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverwriteReport {
    pub passes: Vec<PassReport>,
}

impl OverwriteReport {
    pub fn total_bytes(&self) -> u64 {
        self.passes.iter().map(|p| p.bytes_written).sum()
    }
}

pub struct PatternOverwrite;

impl PatternOverwrite {
    /// Run one pass per pattern byte, in order.
    ///
    /// `buffer_size` is rounded up to the largest direct I/O alignment.
    pub fn overwrite_device(
        device: &mut Device,
        patterns: &[u8],
        buffer_size: usize,
    ) -> EraseResult<OverwriteReport> {
        let mut buffer = AlignedBuffer::for_direct_io(align_up(buffer_size.max(1), MAX_ALIGNMENT))?;
        let mut report = OverwriteReport::default();

        for (pass, &pattern) in patterns.iter().enumerate() {
            tracing::info!(
                device = %device.path(),
                pass = pass + 1,
                total = patterns.len(),
                pattern = %format!("{:#04x}", pattern),
                "Starting overwrite pass"
            );
            buffer.fill(&[pattern]);

            let pass_report = Self::write_pass(device, &buffer, pattern);
            if pass_report.bytes_written == 0 {
                tracing::warn!(device = %device.path(), pass = pass + 1, "Overwrite pass wrote nothing");
            }
            if let Err(e) = device.sync() {
                tracing::warn!(device = %device.path(), error = %e, "Sync after overwrite pass failed");
            }

            tracing::info!(
                device = %device.path(),
                pass = pass + 1,
                bytes = pass_report.bytes_written,
                "Overwrite pass finished"
            );
            report.passes.push(pass_report);
        }

        Ok(report)
    }

    fn write_pass(device: &mut Device, buffer: &AlignedBuffer, pattern: u8) -> PassReport {
        let mut offset = 0u64;
        let stopped_by = loop {
            match device.write_raw(buffer.as_slice(), offset) {
                Ok(0) => break None,
                Ok(written) => offset += written as u64,
                Err(e) => break Some(e.to_string()),
            }
        };

        PassReport {
            pattern,
            bytes_written: offset,
            stopped_by,
        }
    }
}
