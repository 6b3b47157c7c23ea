// Operator alerts
//
// The appliance front panel (LCD, beeper, LEDs) sits behind `AlertSink`.
// `ConsoleAlerts` drives a serial/VGA console instead, which is all a
// headless unit or a test rig has.

use colored::Colorize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkStyle {
    Steady,
    /// Fast, attention-grabbing
    Flash,
}

/// Shared flag that ends a `beep_until` / `blink_until` loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `period`, waking early once stopped. Returns true if stopped.
    pub fn wait(&self, period: Duration) -> bool {
        let step = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < period {
            if self.is_stopped() {
                return true;
            }
            let nap = step.min(period - waited);
            std::thread::sleep(nap);
            waited += nap;
        }
        self.is_stopped()
    }
}

/// Front-panel style alert channels
pub trait AlertSink: Send + Sync {
    /// Show `text` for `duration`, re-drawing every `interval` in the given style.
    fn display_message(&self, text: &str, style: BlinkStyle, interval: Duration, duration: Duration);

    /// Sound the buzzer until `stop` fires.
    fn beep_until(&self, stop: &StopSignal);

    /// Blink the attention LED until `stop` fires.
    fn blink_until(&self, stop: &StopSignal);
}

/// Alerts rendered on the system console
#[derive(Debug, Clone)]
pub struct ConsoleAlerts {
    beep_period: Duration,
}

impl Default for ConsoleAlerts {
    fn default() -> Self {
        Self {
            beep_period: Duration::from_secs(1),
        }
    }
}

impl ConsoleAlerts {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn styled(text: &str, style: BlinkStyle) -> String {
    if !cfg!(feature = "color-output") {
        return text.to_string();
    }
    match style {
        BlinkStyle::Steady => text.bold().to_string(),
        BlinkStyle::Flash => text.white().on_red().bold().blink().to_string(),
    }
}

impl AlertSink for ConsoleAlerts {
    fn display_message(&self, text: &str, style: BlinkStyle, interval: Duration, duration: Duration) {
        tracing::info!(
            message = text,
            style = ?style,
            interval_ms = interval.as_millis() as u64,
            duration = %humantime::format_duration(duration),
            "Display message"
        );
        // Status lines overwrite each other; terminal messages stand alone
        let mut out = io::stdout();
        if style == BlinkStyle::Steady {
            let _ = write!(out, "\r{}", styled(text, style));
        } else {
            let _ = writeln!(out, "\n{}", styled(text, style));
        }
        let _ = out.flush();
    }

    fn beep_until(&self, stop: &StopSignal) {
        tracing::debug!("Beeping until stopped");
        while !stop.is_stopped() {
            let mut err = io::stderr();
            let _ = err.write_all(b"\x07");
            let _ = err.flush();
            stop.wait(self.beep_period);
        }
    }

    fn blink_until(&self, stop: &StopSignal) {
        tracing::debug!("Blinking until stopped");
        // No LED on a console; the Flash-styled message carries the signal
        while !stop.wait(self.beep_period) {}
    }
}
