// End-of-erase finalization
//
// Both outcomes are terminal for the appliance: success powers the unit off,
// an unrecoverable failure leaves it alarming until someone intervenes.

use super::boot_config::persist_unrecoverable_flag;
use super::RecoveryVolume;
use crate::error::{retry_blocking, FixedDelay};
use crate::ui::{AlertSink, BlinkStyle, StopSignal};
use crate::{EraseConfig, EraseError};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub const SUCCESS_MESSAGE: &str = "Erase complete. It is safe to remove power.";
pub const FAILURE_MESSAGE: &str = "ERASE FAILED: data may remain. Contact support.";

/// Terminal actions at the end of an erase session.
///
/// Production implementations do not return.
pub trait Finalizer: Send + Sync {
    fn success(&self);

    /// `persist` records the failure in the boot configuration so the next
    /// boot goes straight to the warning.
    fn unrecoverable_failure(&self, persist: bool);
}

/// Host power and filesystem control
pub trait PowerControl: Send + Sync {
    fn unmount_all(&self) -> std::io::Result<()>;

    fn power_off(&self) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPower;

fn run_checked(program: &str, args: &[&str]) -> std::io::Result<()> {
    let status = Command::new(program).args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("{} exited with {}", program, status)))
    }
}

impl PowerControl for SystemPower {
    fn unmount_all(&self) -> std::io::Result<()> {
        run_checked("umount", &["-a", "-r"])
    }

    /// Power off, never reboot: a later boot must not look like a retry
    fn power_off(&self) -> std::io::Result<()> {
        run_checked("poweroff", &["-f"])
    }
}

/// Block the calling thread for good.
pub fn halt() -> ! {
    tracing::warn!("Halting");
    loop {
        std::thread::park();
    }
}

/// Finalizer for a real appliance
pub struct ApplianceFinalizer {
    config: EraseConfig,
    volume: Arc<dyn RecoveryVolume>,
    alerts: Arc<dyn AlertSink>,
    power: Arc<dyn PowerControl>,
}

impl ApplianceFinalizer {
    pub fn new(
        config: EraseConfig,
        volume: Arc<dyn RecoveryVolume>,
        alerts: Arc<dyn AlertSink>,
        power: Arc<dyn PowerControl>,
    ) -> Self {
        Self {
            config,
            volume,
            alerts,
            power,
        }
    }

    /// Everything `success` does short of halting.
    pub fn complete_success(&self) {
        let flag = self.volume.path().join(&self.config.erase_flag_file);
        match std::fs::remove_file(&flag) {
            Ok(()) => tracing::info!(path = %flag.display(), "Removed erase-mode flag"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %flag.display(), error = %e, "Cannot remove erase-mode flag"),
        }

        nix::unistd::sync();
        if let Err(e) = self.power.unmount_all() {
            tracing::warn!(error = %e, "Unmount failed");
        }

        self.alerts.display_message(
            SUCCESS_MESSAGE,
            BlinkStyle::Steady,
            self.config.status_interval(),
            self.config.message_duration(),
        );

        if let Err(e) = self.power.power_off() {
            tracing::error!(error = %e, "Power off failed");
        }
    }

    /// Start every alert channel and, if asked, the boot flag writer.
    ///
    /// The returned signal stops the alert loops; the handle joins the writer.
    pub fn raise_alarm(&self, persist: bool) -> (StopSignal, Option<JoinHandle<()>>) {
        let writer = if persist {
            let path = self.volume.path().join(&self.config.boot_config_path);
            let key = self.config.boot_env_key.clone();
            let value = self.config.boot_env_unrecoverable.clone();
            Some(std::thread::spawn(move || {
                // Keep trying: the flag is the only record that survives power loss
                let forever = FixedDelay::forever(Duration::from_secs(1));
                let _ = retry_blocking(&forever, "persist-boot-flag", || {
                    persist_unrecoverable_flag(&path, &key, &value)
                });
            }))
        } else {
            None
        };

        let stop = StopSignal::new();
        for blink in [false, true] {
            let alerts = self.alerts.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                if blink {
                    alerts.blink_until(&stop)
                } else {
                    alerts.beep_until(&stop)
                }
            });
        }

        self.alerts.display_message(
            FAILURE_MESSAGE,
            BlinkStyle::Flash,
            Duration::from_millis(500),
            self.config.message_duration(),
        );

        (stop, writer)
    }
}

impl Finalizer for ApplianceFinalizer {
    fn success(&self) {
        tracing::info!("Erase succeeded, shutting down");
        self.complete_success();
        halt()
    }

    fn unrecoverable_failure(&self, persist: bool) {
        tracing::error!(persist, "Unrecoverable erase failure");
        let _alarm = self.raise_alarm(persist);
        halt()
    }
}

/// Guarantees the unrecoverable path runs at most once per session,
/// however many device tasks fail.
pub struct FailSafe {
    finalizer: Arc<dyn Finalizer>,
    tripped: AtomicBool,
    /// Orders status output against the trip
    gate: Mutex<()>,
}

impl FailSafe {
    pub fn new(finalizer: Arc<dyn Finalizer>) -> Self {
        Self {
            finalizer,
            tripped: AtomicBool::new(false),
            gate: Mutex::new(()),
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Enter the unrecoverable state because of `cause` on `context`.
    ///
    /// Only returns when the finalizer does (tests), handing back the error
    /// for the caller to propagate.
    pub fn trip(&self, persist: bool, context: &str, cause: &EraseError) -> EraseError {
        tracing::error!(context, persist, error = %cause, "Fail-safe tripped");
        let first = {
            let _gate = self.gate.lock().unwrap_or_else(|p| p.into_inner());
            !self.tripped.swap(true, Ordering::SeqCst)
        };
        if first {
            self.finalizer.unrecoverable_failure(persist);
        }
        EraseError::Unrecoverable(format!("{}: {}", context, cause))
    }

    /// Run `f` only while the fail-safe is untripped.
    ///
    /// A trip cannot land while `f` runs, so nothing `f` displays can follow
    /// the failure warning.
    pub fn unless_tripped<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate.lock().unwrap_or_else(|p| p.into_inner());
        if self.tripped.load(Ordering::SeqCst) {
            None
        } else {
            Some(f())
        }
    }
}
