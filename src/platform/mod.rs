// Appliance platform description and host integration
//
// - boot_config.rs: next-boot unrecoverable flag (boot loader config + kernel cmdline)
// - finalize.rs: success / unrecoverable finalization and the fail-safe guard

pub mod boot_config;
pub mod finalize;

pub use boot_config::{patch_kernel_lines, persist_unrecoverable_flag, unrecoverable_flag_set};
pub use finalize::{ApplianceFinalizer, FailSafe, Finalizer, PowerControl, SystemPower};

use crate::drives::raid::RaidFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the appliance model expects to find on its data disks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub name: String,
    pub expected_disks: usize,
    pub raid_format: RaidFormat,
    /// Informational, e.g. 1 or 5
    pub raid_level: Option<u8>,
    /// Smaller devices without RAID metadata are ignored
    pub size_threshold: u64,
    /// Device holding the recovery volume; never erased
    pub recovery_device: Option<String>,
}

impl Default for PlatformDescriptor {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            expected_disks: 2,
            raid_format: RaidFormat::Imsm,
            raid_level: Some(1),
            size_threshold: 1 << 30,
            recovery_device: None,
        }
    }
}

impl PlatformDescriptor {
    /// True if `device` is, or is the parent disk of, the recovery device.
    pub fn excludes(&self, device: &str) -> bool {
        let Some(recovery) = self.recovery_device.as_deref() else {
            return false;
        };

        match recovery.strip_prefix(device) {
            Some("") => true,
            // sdc -> sdc1, nvme0n1 -> nvme0n1p2
            Some(rest) => {
                let digits = rest.strip_prefix('p').unwrap_or(rest);
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        }
    }

    /// Fill in the recovery device unless one was configured.
    pub fn or_recovery_device(mut self, source: Option<String>) -> Self {
        if self.recovery_device.is_none() {
            self.recovery_device = source;
        }
        self
    }
}

/// The part of the recovery filesystem the erase flow depends on
pub trait RecoveryVolume: Send + Sync {
    fn path(&self) -> &Path;

    fn is_mounted(&self) -> bool;
}

/// A recovery volume mounted somewhere in the host filesystem
#[derive(Debug, Clone)]
pub struct MountedVolume {
    mount_point: PathBuf,
}

impl MountedVolume {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    /// Block device mounted at the volume's mount point, if any.
    pub fn source_device(&self) -> Option<String> {
        let mounts = match std::fs::read_to_string("/proc/mounts") {
            Ok(mounts) => mounts,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read /proc/mounts");
                return None;
            }
        };
        let source = mount_source(&mounts, &self.mount_point)?;
        // /dev/disk/by-* links resolve to the kernel name discovery sees
        match std::fs::canonicalize(&source) {
            Ok(resolved) => Some(resolved.to_string_lossy().into_owned()),
            Err(_) => Some(source),
        }
    }
}

impl RecoveryVolume for MountedVolume {
    fn path(&self) -> &Path {
        &self.mount_point
    }

    fn is_mounted(&self) -> bool {
        match std::fs::read_to_string("/proc/mounts") {
            Ok(mounts) => mounted_in(&mounts, &self.mount_point),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read /proc/mounts");
                false
            }
        }
    }
}

fn mounted_in(mounts: &str, mount_point: &Path) -> bool {
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| Path::new(target) == mount_point)
}

/// Device backing `mount_point`; the last entry wins, as it shadows earlier ones.
fn mount_source(mounts: &str, mount_point: &Path) -> Option<String> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?, fields.next()?))
        })
        .filter(|(source, target)| Path::new(target) == mount_point && source.starts_with("/dev/"))
        .last()
        .map(|(source, _)| source.to_string())
}
