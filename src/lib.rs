pub mod algorithms;
pub mod drives;
pub mod error;
pub mod io;
pub mod platform;
pub mod ui;
pub mod verification;
pub mod wipe_orchestrator;

// Re-export main erase orchestrator for convenience
pub use wipe_orchestrator::{EraseOrchestrator, EraseOutcome};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the erase engine.
///
/// The set is deliberately closed: callers match on the kind, never on message text.
#[derive(Error, Debug)]
pub enum EraseError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("No data to restore: {0}")]
    NoData(String),

    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    #[error("Alignment failure on {device}: offset {offset}, size {size}")]
    AlignmentFailure {
        device: String,
        offset: i64,
        size: usize,
    },

    #[error("Out of bounds on {device}: offset {offset}, size {size}, device size {device_size}")]
    OutOfBounds {
        device: String,
        offset: i64,
        size: usize,
        device_size: u64,
    },

    #[error("Short write on {device}: wrote {written} of {expected} bytes")]
    ShortWrite {
        device: String,
        written: usize,
        expected: usize,
    },

    #[error("Hardware command failed: {0}")]
    HardwareCommandFailed(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Canary mismatch on {device}: expected {expected}, found {found}")]
    CanaryMismatch {
        device: String,
        expected: usize,
        found: usize,
    },

    #[error("Unrecoverable failure: {0}")]
    Unrecoverable(String),
}

impl From<io::IOError> for EraseError {
    fn from(err: io::IOError) -> Self {
        match err {
            io::IOError::IoError(e) => EraseError::IoError(e),
            other => EraseError::IoError(std::io::Error::other(other.to_string())),
        }
    }
}

pub type EraseResult<T> = Result<T, EraseError>;

/// Tunables for one erase session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EraseConfig {
    /// ATA diagnostic/erase tool
    pub ata_tool: String,
    /// Temporary security password set before erase
    pub ata_password: String,
    pub tool_retries: u32,
    pub tool_retry_delay_ms: u64,
    /// Used when the drive does not report a usable erase time
    pub secure_erase_default_estimate_mins: u64,
    pub overwrite_estimate_hours: u64,
    pub overwrite_patterns: Vec<u8>,
    pub overwrite_buffer_size: usize,
    pub canary_spacing: u64,
    pub status_interval_ms: u64,
    pub status_fast_window_secs: u64,
    pub status_slow_interval_secs: u64,
    pub message_duration_hours: u64,
    /// Allowed size difference between array members, in percent
    pub size_tolerance_pct: f64,
    pub direct_io: bool,
    pub boot_env_key: String,
    pub boot_env_unrecoverable: String,
    /// Boot configuration file, relative to the recovery volume
    pub boot_config_path: String,
    /// Transient erase-mode flag file, relative to the recovery volume
    pub erase_flag_file: String,
}

impl Default for EraseConfig {
    fn default() -> Self {
        Self {
            ata_tool: "hdparm".to_string(),
            ata_password: "Erase".to_string(),
            tool_retries: 10,
            tool_retry_delay_ms: 2000,
            secure_erase_default_estimate_mins: 200,
            overwrite_estimate_hours: 12,
            overwrite_patterns: vec![0x55, 0xAA, 0x00, 0x00],
            overwrite_buffer_size: 4 * 1024 * 1024,
            canary_spacing: 1 << 30,
            status_interval_ms: 3000,
            status_fast_window_secs: 30,
            status_slow_interval_secs: 60,
            message_duration_hours: 48,
            size_tolerance_pct: 10.0,
            direct_io: true,
            boot_env_key: "ERASE_ENV".to_string(),
            boot_env_unrecoverable: "UNRECOVERABLE_ERROR".to_string(),
            boot_config_path: "boot/grub/menu.lst".to_string(),
            erase_flag_file: "erase_mode".to_string(),
        }
    }
}

impl EraseConfig {
    pub fn tool_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tool_retry_delay_ms)
    }

    pub fn secure_erase_default_estimate(&self) -> Duration {
        Duration::from_secs(self.secure_erase_default_estimate_mins * 60)
    }

    pub fn overwrite_estimate(&self) -> Duration {
        Duration::from_secs(self.overwrite_estimate_hours * 3600)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn message_duration(&self) -> Duration {
        Duration::from_secs(self.message_duration_hours * 3600)
    }

    /// Load from a JSON file; missing fields fall back to defaults.
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
