// Tests for sysfs device discovery
//
// A fake /sys/block tree is built in a temp dir: each device gets a `size`
// file (512-byte sectors) and, when physical, a `device` directory.

use super::detection::*;
use crate::io::MemoryIO;
use crate::platform::PlatformDescriptor;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const GIB: u64 = 1 << 30;

fn add_block(sys: &Path, name: &str, bytes: u64, physical: bool) {
    let dir = sys.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("size"), format!("{}\n", bytes / 512)).unwrap();
    if physical {
        fs::create_dir_all(dir.join("device")).unwrap();
    }
}

fn platform(recovery: Option<&str>) -> PlatformDescriptor {
    PlatformDescriptor {
        size_threshold: GIB,
        recovery_device: recovery.map(String::from),
        ..PlatformDescriptor::default()
    }
}

// ==================== FILTERING TESTS ====================

#[test]
fn test_skips_pseudo_devices() {
    assert!(DeviceDiscovery::should_skip_device("loop0"));
    assert!(DeviceDiscovery::should_skip_device("ram15"));
    assert!(DeviceDiscovery::should_skip_device("dm-3"));
    assert!(DeviceDiscovery::should_skip_device("sr0"));
    assert!(DeviceDiscovery::should_skip_device("zram0"));
    assert!(DeviceDiscovery::should_skip_device("md126"));
    assert!(!DeviceDiscovery::should_skip_device("sda"));
    assert!(!DeviceDiscovery::should_skip_device("nvme0n1"));
}

#[test]
fn test_candidates_filtering_and_order() {
    let sys = TempDir::new().unwrap();
    add_block(sys.path(), "sdb", 500 * GIB, true);
    add_block(sys.path(), "sda", 500 * GIB, true);
    add_block(sys.path(), "loop0", 4 * GIB, false);
    add_block(sys.path(), "sdc", 8 * GIB, true);
    add_block(sys.path(), "vda", 64 * 1024 * 1024, false);
    add_block(sys.path(), "vdb", 2 * GIB, false);

    let discovery = DeviceDiscovery::new(sys.path(), "/dev");
    let found = discovery.candidates(&platform(Some("/dev/sdc1"))).unwrap();

    let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["sda", "sdb", "vdb"]);
    assert_eq!(found[0].dev_path, "/dev/sda");
    assert_eq!(found[0].size, 500 * GIB);
    assert!(found[0].physical);
    assert!(!found[2].physical);
}

#[test]
fn test_small_physical_device_is_kept() {
    let sys = TempDir::new().unwrap();
    add_block(sys.path(), "sda", 64 * 1024 * 1024, true);

    let found = DeviceDiscovery::new(sys.path(), "/dev")
        .candidates(&platform(None))
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn test_malformed_size_is_an_error() {
    let sys = TempDir::new().unwrap();
    fs::create_dir_all(sys.path().join("sda")).unwrap();
    fs::write(sys.path().join("sda/size"), "lots\n").unwrap();

    let result = DeviceDiscovery::new(sys.path(), "/dev").candidates(&platform(None));
    assert!(result.is_err());
}

#[test]
fn test_empty_sysfs() {
    let sys = TempDir::new().unwrap();
    let found = DeviceDiscovery::new(sys.path(), "/dev")
        .candidates(&platform(None))
        .unwrap();
    assert!(found.is_empty());
}

// ==================== DEVICE CONSTRUCTION TESTS ====================

#[test]
fn test_discover_builds_closed_devices() {
    let sys = TempDir::new().unwrap();
    add_block(sys.path(), "sda", 2 * GIB, true);
    add_block(sys.path(), "sdb", 2 * GIB, true);

    let devices = DeviceDiscovery::new(sys.path(), "/dev")
        .discover(&platform(None), Arc::new(MemoryIO::new()))
        .unwrap();

    let paths: Vec<&str> = devices.iter().map(|d| d.path()).collect();
    assert_eq!(paths, vec!["/dev/sda", "/dev/sdb"]);
    assert!(devices.iter().all(|d| !d.is_open()));
}
