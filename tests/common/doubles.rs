/// Recording doubles for the alert and finalization seams

use appliance_wipe::platform::Finalizer;
use appliance_wipe::ui::{AlertSink, BlinkStyle, StopSignal};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    Success,
    Unrecoverable { persist: bool },
}

/// Records finalizer calls instead of powering anything off
#[derive(Default)]
pub struct RecordingFinalizer {
    calls: Mutex<Vec<Finalized>>,
}

impl RecordingFinalizer {
    pub fn calls(&self) -> Vec<Finalized> {
        self.calls.lock().unwrap().clone()
    }
}

impl Finalizer for RecordingFinalizer {
    fn success(&self) {
        self.calls.lock().unwrap().push(Finalized::Success);
    }

    fn unrecoverable_failure(&self, persist: bool) {
        self.calls.lock().unwrap().push(Finalized::Unrecoverable { persist });
    }
}

pub const HALT_MESSAGE: &str = "ERASE FAILED (halted)";

/// Shows the failure warning, then holds the failing thread the way a real
/// finalizer halts it
pub struct HaltingFinalizer {
    alerts: Arc<RecordingAlerts>,
    hold: Duration,
}

impl HaltingFinalizer {
    pub fn new(alerts: Arc<RecordingAlerts>, hold: Duration) -> Self {
        Self { alerts, hold }
    }
}

impl Finalizer for HaltingFinalizer {
    fn success(&self) {}

    fn unrecoverable_failure(&self, _persist: bool) {
        self.alerts
            .display_message(HALT_MESSAGE, BlinkStyle::Flash, self.hold, self.hold);
        std::thread::sleep(self.hold);
    }
}

/// Records every message shown on the front panel
#[derive(Default)]
pub struct RecordingAlerts {
    messages: Mutex<Vec<(String, BlinkStyle)>>,
}

impl RecordingAlerts {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }
}

impl AlertSink for RecordingAlerts {
    fn display_message(&self, text: &str, style: BlinkStyle, _interval: Duration, _duration: Duration) {
        self.messages.lock().unwrap().push((text.to_string(), style));
    }

    fn beep_until(&self, _stop: &StopSignal) {}

    fn blink_until(&self, _stop: &StopSignal) {}
}
