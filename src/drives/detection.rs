// Candidate device discovery from sysfs

use super::device::Device;
use crate::io::PlatformIO;
use crate::platform::PlatformDescriptor;
use crate::EraseResult;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// sysfs reports sizes in 512-byte sectors regardless of the logical block size
const SYSFS_SECTOR_SIZE: u64 = 512;

/// A block device found in sysfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub dev_path: String,
    pub size: u64,
    /// Backed by real hardware (has a `device` link)
    pub physical: bool,
}

pub struct DeviceDiscovery {
    sys_block: PathBuf,
    dev_dir: PathBuf,
}

impl Default for DeviceDiscovery {
    fn default() -> Self {
        Self::new("/sys/block", "/dev")
    }
}

impl DeviceDiscovery {
    pub fn new(sys_block: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            sys_block: sys_block.into(),
            dev_dir: dev_dir.into(),
        }
    }

    /// Check if device should be skipped
    pub(crate) fn should_skip_device(device_name: &str) -> bool {
        device_name.starts_with("loop")
            || device_name.starts_with("ram")
            || device_name.starts_with("dm-")
            || device_name.starts_with("sr") // CD/DVD drives
            || device_name.starts_with("zram")
            || device_name.starts_with("md")
    }

    /// Every eligible block device, sorted by name.
    pub fn candidates(&self, platform: &PlatformDescriptor) -> EraseResult<Vec<Candidate>> {
        let pattern = self.sys_block.join("*");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let mut found = Vec::new();
        for entry in entries {
            let sys_path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable sysfs entry");
                    continue;
                }
            };
            let Some(name) = sys_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            if Self::should_skip_device(&name) {
                continue;
            }

            let dev_path = self.dev_dir.join(&name).to_string_lossy().into_owned();
            if platform.excludes(&dev_path) {
                tracing::info!(device = %dev_path, "Skipping recovery device");
                continue;
            }

            let size = read_sectors(&sys_path)? * SYSFS_SECTOR_SIZE;
            let physical = sys_path.join("device").exists();
            if !physical && size < platform.size_threshold {
                tracing::debug!(device = %dev_path, size, "Skipping small virtual device");
                continue;
            }

            found.push(Candidate {
                name,
                dev_path,
                size,
                physical,
            });
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// Candidate devices wrapped for erasing, in name order.
    pub fn discover(
        &self,
        platform: &PlatformDescriptor,
        io: Arc<dyn PlatformIO>,
    ) -> EraseResult<Vec<Device>> {
        let devices: Vec<Device> = self
            .candidates(platform)?
            .into_iter()
            .map(|c| Device::new(c.dev_path, io.clone()))
            .collect();

        tracing::info!(count = devices.len(), "Discovered candidate devices");
        Ok(devices)
    }
}

fn read_sectors(sys_path: &Path) -> EraseResult<u64> {
    let text = fs::read_to_string(sys_path.join("size"))?;
    text.trim().parse::<u64>().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: bad size '{}': {}", sys_path.display(), text.trim(), e),
        )
        .into()
    })
}
