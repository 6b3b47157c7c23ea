// Aligned buffers for direct I/O

use super::{IOError, IOResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Heap buffer whose start address is aligned for direct I/O.
///
/// The slice length is exactly what was requested; the allocation behind it
/// is rounded up to a whole number of `alignment` units.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
    alignment: usize,
}

impl AlignedBuffer {
    pub fn new(len: usize, alignment: usize) -> IOResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(IOError::AlignmentError(format!(
                "Alignment {} is not a power of 2",
                alignment
            )));
        }

        // Never hand a zero-sized layout to the allocator
        let capacity = super::align_up(len.max(1), alignment);
        let layout = Layout::from_size_align(capacity, alignment)
            .map_err(|e| IOError::AllocationFailed(e.to_string()))?;

        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            IOError::AllocationFailed(format!("Failed to allocate {} bytes", capacity))
        })?;

        Ok(Self {
            ptr,
            layout,
            len,
            alignment,
        })
    }

    /// Buffer aligned for any alignment discovery can settle on
    pub fn for_direct_io(len: usize) -> IOResult<Self> {
        Self::new(len, super::MAX_ALIGNMENT)
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Fill buffer with a repeating pattern
    pub fn fill(&mut self, pattern: &[u8]) {
        if pattern.is_empty() {
            return;
        }
        for (i, byte) in self.as_mut_slice().iter_mut().enumerate() {
            *byte = pattern[i % pattern.len()];
        }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}
