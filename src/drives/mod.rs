// Drive detection and operations module
//
// Organized structure:
// - device.rs: raw device handle, alignment discovery, RAID metadata backup/restore
// - raid.rs: RAID signature detection and array grouping
// - detection.rs: candidate discovery from sysfs
// - ata.rs: ATA security erase through hdparm

pub mod ata;
pub mod detection;
pub mod device;
pub mod raid;

// Tests
#[cfg(test)]
mod detection_tests;


pub use ata::{try_secure_erase, AtaTool, CommandOutput, CommandRunner, SystemRunner};
pub use detection::DeviceDiscovery;
pub use device::{size_match, Device};
pub use raid::{find_arrays, RaidArray, RaidFormat};
