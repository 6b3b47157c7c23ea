// Platform-specific raw device access

use super::{IOError, IOResult};
use std::fs::File;
use std::io::{Seek, SeekFrom};

/// An open raw block device.
///
/// All I/O is positioned; the handle never relies on a shared file cursor.
pub trait RawDevice: Send {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize>;

    fn write_at(&self, data: &[u8], offset: u64) -> std::io::Result<usize>;

    /// Device capacity in bytes
    fn capacity(&self) -> std::io::Result<u64>;

    fn sync_data(&self) -> std::io::Result<()>;
}

/// Opens raw devices by path
pub trait PlatformIO: Send + Sync {
    fn open_device(&self, path: &str) -> IOResult<Box<dyn RawDevice>>;

    /// Get platform name
    fn platform_name(&self) -> &str;
}

// ============= LINUX IMPLEMENTATION =============

pub struct LinuxIO {
    direct_io: bool,
}

impl LinuxIO {
    pub fn new(direct_io: bool) -> Self {
        Self { direct_io }
    }
}

struct FileDevice {
    file: File,
}

impl RawDevice for FileDevice {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;

        // pread, no seeking
        self.file.read_at(buffer, offset)
    }

    fn write_at(&self, data: &[u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;

        self.file.write_at(data, offset)
    }

    fn capacity(&self) -> std::io::Result<u64> {
        // Works for block devices and regular files alike
        (&self.file).seek(SeekFrom::End(0))
    }

    fn sync_data(&self) -> std::io::Result<()> {
        self.file.sync_data()
    }
}

impl PlatformIO for LinuxIO {
    fn open_device(&self, path: &str) -> IOResult<Box<dyn RawDevice>> {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut opts = OpenOptions::new();
        opts.write(true).read(true);

        // O_DIRECT flag for bypassing page cache
        if self.direct_io {
            opts.custom_flags(libc::O_DIRECT | libc::O_SYNC);
        }

        let file = opts
            .open(path)
            .map_err(|e| IOError::OperationFailed(format!("Failed to open {}: {}", path, e)))?;

        Ok(Box::new(FileDevice { file }))
    }

    fn platform_name(&self) -> &str {
        if self.direct_io {
            "Linux (direct I/O)"
        } else {
            "Linux (buffered I/O)"
        }
    }
}

// ============= PLATFORM FACTORY =============

/// Get the appropriate platform I/O implementation
pub fn get_platform_io(direct_io: bool) -> Box<dyn PlatformIO> {
    Box::new(LinuxIO::new(direct_io))
}
