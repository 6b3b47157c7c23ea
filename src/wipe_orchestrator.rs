// Erase Orchestrator - drives one appliance through a complete erase session
//
// Discover the data disks, check they form the one array the platform
// expects, erase every disk concurrently, then put the RAID metadata back
// and declare the outcome.

pub mod device_task;


pub use device_task::{DeviceEraseTask, EraseMethod, TaskContext, TaskState};

use crate::drives::{find_arrays, size_match, CommandRunner, Device, DeviceDiscovery, RaidFormat};
use crate::io::PlatformIO;
use crate::platform::{unrecoverable_flag_set, FailSafe, Finalizer, PlatformDescriptor};
use crate::ui::{run_status_task, AlertSink, BlinkStyle, StatusTracker};
use crate::verification::CanaryPattern;
use crate::{EraseConfig, EraseError, EraseResult};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

pub const ERASING_MESSAGE: &str = "Erasing...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub path: String,
    pub method: EraseMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EraseOutcome {
    pub devices: Vec<DeviceOutcome>,
}

/// What `list` reports per device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub path: String,
    pub size: u64,
    pub raid_format: RaidFormat,
}

/// Main erase orchestrator
pub struct EraseOrchestrator {
    config: EraseConfig,
    platform: PlatformDescriptor,
    io: Arc<dyn PlatformIO>,
    discovery: DeviceDiscovery,
    runner: Arc<dyn CommandRunner>,
    alerts: Arc<dyn AlertSink>,
    finalizer: Arc<dyn Finalizer>,
}

impl EraseOrchestrator {
    pub fn new(
        config: EraseConfig,
        platform: PlatformDescriptor,
        io: Arc<dyn PlatformIO>,
        runner: Arc<dyn CommandRunner>,
        alerts: Arc<dyn AlertSink>,
        finalizer: Arc<dyn Finalizer>,
    ) -> Self {
        Self {
            config,
            platform,
            io,
            discovery: DeviceDiscovery::default(),
            runner,
            alerts,
            finalizer,
        }
    }

    pub fn with_discovery(mut self, discovery: DeviceDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Full session: boot flag check, discovery, then `erase_devices`.
    pub async fn erase(&self) -> EraseResult<EraseOutcome> {
        let fail_safe = Arc::new(FailSafe::new(self.finalizer.clone()));

        if unrecoverable_flag_set(&self.config.boot_env_key, &self.config.boot_env_unrecoverable) {
            let cause = EraseError::Precondition(format!(
                "previous boot recorded {}={}",
                self.config.boot_env_key, self.config.boot_env_unrecoverable
            ));
            // Already persisted by the failed session
            return Err(trip(fail_safe, false, "boot", cause).await);
        }

        let devices = match self.discovery.discover(&self.platform, self.io.clone()) {
            Ok(devices) => devices,
            Err(e) => return Err(trip(fail_safe, false, "discovery", e).await),
        };

        self.erase_with(fail_safe, devices).await
    }

    /// Erase an already discovered device list.
    pub async fn erase_devices(&self, devices: Vec<Device>) -> EraseResult<EraseOutcome> {
        let fail_safe = Arc::new(FailSafe::new(self.finalizer.clone()));
        self.erase_with(fail_safe, devices).await
    }

    /// Discover and classify devices without writing anything.
    pub async fn survey(&self) -> EraseResult<Vec<DeviceSummary>> {
        let devices = self.discovery.discover(&self.platform, self.io.clone())?;
        let threshold = self.platform.size_threshold;

        let summaries = tokio::task::spawn_blocking(move || {
            devices
                .into_iter()
                .map(|mut device| {
                    let raid_format = device.detect_raid_type(threshold).unwrap_or_else(|e| {
                        tracing::warn!(device = %device.path(), error = %e, "RAID detection failed");
                        RaidFormat::Unset
                    });
                    DeviceSummary {
                        path: device.path().to_string(),
                        size: device.read_size().unwrap_or(0),
                        raid_format,
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| EraseError::IoError(std::io::Error::other(e)))?;

        Ok(summaries)
    }

    async fn erase_with(&self, fail_safe: Arc<FailSafe>, devices: Vec<Device>) -> EraseResult<EraseOutcome> {
        let config = self.config.clone();
        let platform = self.platform.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            let mut devices = select_array(&config, &platform, devices)?;
            backup_all(&mut devices);
            Ok::<_, EraseError>(devices)
        })
        .await
        .map_err(|e| EraseError::IoError(std::io::Error::other(e)))?;

        let devices = match prepared {
            Ok(devices) => devices,
            Err(e) => return Err(trip(fail_safe, false, "precondition", e).await),
        };

        let session_start = chrono::Utc::now();
        tracing::info!(
            devices = devices.len(),
            session = %session_start.to_rfc3339(),
            "Starting erase"
        );
        self.alerts.display_message(
            ERASING_MESSAGE,
            BlinkStyle::Steady,
            self.config.status_interval(),
            self.config.message_duration(),
        );

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let status = tokio::spawn(run_status_task(
            rx,
            self.alerts.clone(),
            fail_safe.clone(),
            StatusTracker::from_config(&self.config),
            self.config.status_interval(),
        ));

        let ctx = Arc::new(TaskContext {
            config: self.config.clone(),
            pattern: CanaryPattern::for_session(session_start),
            runner: self.runner.clone(),
            fail_safe: fail_safe.clone(),
            estimates: tx,
        });

        let paths: Vec<String> = devices.iter().map(|d| d.path().to_string()).collect();
        let handles = devices.into_iter().map(|device| {
            let task = DeviceEraseTask::new(device, ctx.clone());
            tokio::task::spawn_blocking(move || task.run())
        });
        let joined = join_all(handles).await;

        // Last sender: lets the status task finish if nothing tripped it
        drop(ctx);
        if let Err(e) = status.await {
            tracing::warn!(error = %e, "Status task ended abnormally");
        }

        let mut finished = Vec::with_capacity(joined.len());
        let mut first_error = None;
        for (path, outcome) in paths.into_iter().zip(joined) {
            match outcome {
                Ok((device, Ok(method))) => finished.push((device, method)),
                Ok((_, Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    let cause = EraseError::Unrecoverable(format!("erase task panicked: {}", join_error));
                    let e = trip(fail_safe.clone(), true, &path, cause).await;
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let outcome = tokio::task::spawn_blocking(move || restore_all(finished))
            .await
            .map_err(|e| EraseError::IoError(std::io::Error::other(e)))?;

        tracing::info!(devices = outcome.devices.len(), "All devices erased and verified");
        let finalizer = self.finalizer.clone();
        tokio::task::spawn_blocking(move || finalizer.success())
            .await
            .map_err(|e| EraseError::IoError(std::io::Error::other(e)))?;

        Ok(outcome)
    }
}

/// Detect formats, drop `Unset` devices and check the rest form exactly the
/// array the platform expects.
pub fn select_array(
    config: &EraseConfig,
    platform: &PlatformDescriptor,
    devices: Vec<Device>,
) -> EraseResult<Vec<Device>> {
    let mut classified = Vec::with_capacity(devices.len());
    for mut device in devices {
        match device.detect_raid_type(platform.size_threshold) {
            Ok(RaidFormat::Unset) => {
                tracing::info!(device = %device.path(), "Ignoring small device without RAID metadata");
            }
            Ok(_) => classified.push(device),
            Err(e) => {
                tracing::warn!(device = %device.path(), error = %e, "Cannot classify device, ignoring");
            }
        }
    }

    let mut arrays = find_arrays(classified);
    if arrays.len() != 1 {
        let found: Vec<String> = arrays
            .iter()
            .map(|a| format!("{} x{}", a.raid_format, a.len()))
            .collect();
        return Err(EraseError::Precondition(format!(
            "expected exactly one RAID array, found {} [{}]",
            arrays.len(),
            found.join(", ")
        )));
    }

    let array = arrays.remove(0);
    if array.len() != platform.expected_disks {
        return Err(EraseError::Precondition(format!(
            "platform {} expects {} disks, found {}: {}",
            platform.name,
            platform.expected_disks,
            array.len(),
            array.paths().join(" ")
        )));
    }
    if array.raid_format != platform.raid_format {
        return Err(EraseError::FormatMismatch(format!(
            "platform {} expects {} metadata, disks carry {}",
            platform.name, platform.raid_format, array.raid_format
        )));
    }

    let mut members = array.into_members();
    let mut sizes = Vec::with_capacity(members.len());
    for device in members.iter_mut() {
        sizes.push(device.read_size()?);
    }
    if let (Some(&smallest), Some(&largest)) = (sizes.iter().min(), sizes.iter().max()) {
        if !size_match(smallest, largest, config.size_tolerance_pct) {
            return Err(EraseError::Precondition(format!(
                "array member sizes differ by more than {}%: {} vs {} bytes",
                config.size_tolerance_pct, smallest, largest
            )));
        }
    }

    tracing::info!(
        format = %platform.raid_format,
        disks = members.len(),
        "Found expected RAID array"
    );
    Ok(members)
}

/// Best effort: a failed backup only means the array has to be rebuilt.
fn backup_all(devices: &mut [Device]) {
    for device in devices.iter_mut() {
        if let Err(e) = device.backup() {
            tracing::warn!(device = %device.path(), error = %e, "RAID metadata backup failed");
        }
        device.close();
    }
}

fn restore_all(finished: Vec<(Device, EraseMethod)>) -> EraseOutcome {
    let mut outcome = EraseOutcome::default();
    for (mut device, method) in finished {
        if let Err(e) = device.restore() {
            tracing::warn!(device = %device.path(), error = %e, "RAID metadata restore failed");
        }
        device.close();
        outcome.devices.push(DeviceOutcome {
            path: device.path().to_string(),
            method,
        });
    }
    outcome
}

/// Trip the fail-safe off the async workers; the finalizer may block for good.
async fn trip(fail_safe: Arc<FailSafe>, persist: bool, context: &str, cause: EraseError) -> EraseError {
    let context = context.to_string();
    let fallback = EraseError::Unrecoverable(format!("{}: {}", context, cause));
    tokio::task::spawn_blocking(move || fail_safe.trip(persist, &context, &cause))
        .await
        .unwrap_or(fallback)
}
