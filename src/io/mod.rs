pub mod aligned_buffer;
pub mod memory;
pub mod platform_specific;

// Re-exports
pub use aligned_buffer::AlignedBuffer;
pub use memory::{MemoryDisk, MemoryIO};
pub use platform_specific::{get_platform_io, LinuxIO, PlatformIO, RawDevice};

/// Smallest I/O alignment tried during discovery
pub const MIN_ALIGNMENT: usize = 512;

/// Alignment discovery gives up past this value
pub const MAX_ALIGNMENT: usize = 16 * 1024;

/// Result type for I/O operations
pub type IOResult<T> = Result<T, IOError>;

/// I/O specific errors
#[derive(Debug, thiserror::Error)]
pub enum IOError {
    #[error("I/O operation failed: {0}")]
    OperationFailed(String),

    #[error("Alignment error: {0}")]
    AlignmentError(String),

    #[error("Buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Aligned span covering a requested `(offset, size)` range.
///
/// `start` keeps the sign of the request: negative values are relative to
/// the end of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedWindow {
    pub start: i64,
    /// Bytes between `start` and the requested offset
    pub lead: usize,
    pub len: usize,
}

impl AlignedWindow {
    /// Bytes the window must deliver for the request to be satisfied.
    pub fn required(&self, size: usize) -> usize {
        self.lead + size
    }
}

/// Compute the aligned window for a request.
///
/// The start is rounded down to `alignment`; for negative offsets that means
/// toward more-negative values, so the window still begins at or before the
/// requested byte.
pub fn aligned_window(offset: i64, size: usize, alignment: usize) -> AlignedWindow {
    let align = alignment as i64;
    let start = offset.div_euclid(align) * align;
    let lead = (offset - start) as usize;
    let len = align_up(lead + size, alignment).max(alignment);

    AlignedWindow { start, lead, len }
}

pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
