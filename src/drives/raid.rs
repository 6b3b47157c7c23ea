// RAID Metadata Handling
//
// Firmware RAID keeps its configuration near the end of every member disk.
// Only two formats are recognised: Intel Matrix Storage (IMSM) and SNIA DDF.

use super::device::Device;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bytes read from the end of a device for signature matching
pub const METADATA_TRAILER_SIZE: usize = 8192;

/// IMSM anchor, second-to-last sector
pub const IMSM_SIGNATURE: &[u8] = b"Intel Raid ISM Cfg Sig. ";
const IMSM_ANCHOR_OFFSET: usize = METADATA_TRAILER_SIZE - 1024;
const IMSM_METADATA_SIZE: usize = 1024 * 1024;

/// DDF anchor header magic, last sector
pub const DDF_MAGIC: [u8; 4] = [0xDE, 0x11, 0xDE, 0x11];
const DDF_ANCHOR_OFFSET: usize = METADATA_TRAILER_SIZE - 512;
const DDF_REVISION_OFFSET: usize = 32;
const DDF_METADATA_SIZE: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RaidFormat {
    /// Not detected, or too small to be a data disk
    #[default]
    Unset,
    /// Real data disk without recognised metadata
    Unknown,
    Imsm,
    Ddf,
}

impl fmt::Display for RaidFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaidFormat::Unset => "unset",
            RaidFormat::Unknown => "unknown",
            RaidFormat::Imsm => "imsm",
            RaidFormat::Ddf => "ddf",
        };
        f.write_str(name)
    }
}

impl FromStr for RaidFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unset" => Ok(RaidFormat::Unset),
            "unknown" | "none" => Ok(RaidFormat::Unknown),
            "imsm" | "intel" => Ok(RaidFormat::Imsm),
            "ddf" => Ok(RaidFormat::Ddf),
            other => Err(format!("unrecognised RAID format '{}'", other)),
        }
    }
}

/// Region holding format metadata; `offset` is relative to the device end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRegion {
    pub offset: i64,
    pub size: usize,
}

impl RaidFormat {
    pub fn metadata_region(self) -> Option<MetadataRegion> {
        let size = match self {
            RaidFormat::Imsm => IMSM_METADATA_SIZE,
            RaidFormat::Ddf => DDF_METADATA_SIZE,
            RaidFormat::Unset | RaidFormat::Unknown => return None,
        };
        Some(MetadataRegion {
            offset: -(size as i64),
            size,
        })
    }
}

/// Match a device trailer against the known signatures.
pub fn detect_signature(trailer: &[u8]) -> Option<RaidFormat> {
    if trailer.len() < METADATA_TRAILER_SIZE {
        return None;
    }

    if trailer[IMSM_ANCHOR_OFFSET..].starts_with(IMSM_SIGNATURE) {
        return Some(RaidFormat::Imsm);
    }

    let anchor = &trailer[DDF_ANCHOR_OFFSET..];
    if anchor.starts_with(&DDF_MAGIC)
        && is_ddf_revision(&anchor[DDF_REVISION_OFFSET..DDF_REVISION_OFFSET + 8])
    {
        return Some(RaidFormat::Ddf);
    }

    None
}

// "02.00.00"
fn is_ddf_revision(rev: &[u8]) -> bool {
    rev.len() == 8
        && rev.iter().enumerate().all(|(i, &b)| {
            if i == 2 || i == 5 {
                b == b'.'
            } else {
                b.is_ascii_digit()
            }
        })
}

/// Devices sharing one RAID format
#[derive(Debug)]
pub struct RaidArray {
    pub raid_format: RaidFormat,
    pub members: Vec<Device>,
}

impl RaidArray {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.members.iter().map(|d| d.path().to_string()).collect()
    }

    pub fn into_members(self) -> Vec<Device> {
        self.members
    }
}

/// Group devices by RAID format in first-seen order.
pub fn find_arrays(devices: Vec<Device>) -> Vec<RaidArray> {
    let mut arrays: Vec<RaidArray> = Vec::new();

    for device in devices {
        let format = device.raid_format();
        match arrays.iter_mut().find(|a| a.raid_format == format) {
            Some(array) => array.members.push(device),
            None => arrays.push(RaidArray {
                raid_format: format,
                members: vec![device],
            }),
        }
    }

    arrays
}
