/// Mock drive infrastructure for testing
///
/// File-backed drives for the buffered Linux backend, plus helpers that lay
/// RAID trailers onto in-memory disks.

use appliance_wipe::drives::raid::{DDF_MAGIC, IMSM_SIGNATURE};
use appliance_wipe::io::{MemoryDisk, MemoryIO};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * 1024;

/// RAID format written into a mock drive's trailer
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub enum MockRaid {
    None,
    Imsm,
    Ddf,
}

fn trailer(raid: MockRaid) -> Option<(usize, Vec<u8>)> {
    match raid {
        MockRaid::None => None,
        // Offsets from the end of the device
        MockRaid::Imsm => Some((KIB, IMSM_SIGNATURE.to_vec())),
        MockRaid::Ddf => {
            let mut anchor = DDF_MAGIC.to_vec();
            anchor.resize(32, 0);
            anchor.extend_from_slice(b"02.00.00");
            Some((512, anchor))
        }
    }
}

/// Add an in-memory disk carrying `raid` metadata
pub fn memory_disk(io: &MemoryIO, path: &str, size: usize, raid: MockRaid) -> Arc<MemoryDisk> {
    let disk = io.add_disk(path, size, 512);
    if let Some((from_end, bytes)) = trailer(raid) {
        disk.poke(size - from_end, &bytes);
    }
    disk
}

/// Mock drive instance backed by a temporary file
pub struct MockDrive {
    pub temp_file: NamedTempFile,
    pub size: usize,
}

impl MockDrive {
    /// Create a drive filled with 0xAB to simulate user data
    pub fn new(size: usize, raid: MockRaid) -> std::io::Result<Self> {
        let mut temp_file = NamedTempFile::new()?;

        let chunk = vec![0xAB; MIB];
        let mut written = 0;
        while written < size {
            let n = (size - written).min(chunk.len());
            temp_file.write_all(&chunk[..n])?;
            written += n;
        }

        if let Some((from_end, bytes)) = trailer(raid) {
            temp_file.seek(SeekFrom::Start((size - from_end) as u64))?;
            temp_file.write_all(&bytes)?;
        }
        temp_file.flush()?;

        Ok(Self { temp_file, size })
    }

    pub fn path_str(&self) -> String {
        self.temp_file.path().to_string_lossy().into_owned()
    }

    pub fn read_at(&self, offset: usize, len: usize) -> std::io::Result<Vec<u8>> {
        let mut file = std::fs::File::open(self.temp_file.path())?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Zero the whole drive in place, as a drive's own erase would
    pub fn zero(path: &str, size: usize) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.write_all(&vec![0u8; size])?;
        file.sync_all()
    }
}
