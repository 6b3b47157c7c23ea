// Erase progress reporting
//
// Device tasks send their expected completion times; the whole erase is
// expected to finish when the slowest device does.

use super::alerts::{AlertSink, BlinkStyle};
use crate::platform::FailSafe;
use crate::EraseConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

/// Running view of the expected finish time
#[derive(Debug, Clone)]
pub struct StatusTracker {
    started: Instant,
    max_estimate: Option<Duration>,
    last_refresh: Option<Instant>,
    fast_window: Duration,
    slow_interval: Duration,
}

impl StatusTracker {
    pub fn new(started: Instant, fast_window: Duration, slow_interval: Duration) -> Self {
        Self {
            started,
            max_estimate: None,
            last_refresh: None,
            fast_window,
            slow_interval,
        }
    }

    pub fn from_config(config: &EraseConfig) -> Self {
        Self::new(
            Instant::now(),
            Duration::from_secs(config.status_fast_window_secs),
            Duration::from_secs(config.status_slow_interval_secs),
        )
    }

    pub fn max_estimate(&self) -> Option<Duration> {
        self.max_estimate
    }

    /// Record an estimate; returns true if it raised the maximum.
    pub fn observe(&mut self, estimate: Duration) -> bool {
        if self.max_estimate.map_or(true, |max| estimate > max) {
            self.max_estimate = Some(estimate);
            true
        } else {
            false
        }
    }

    pub fn expected_finish(&self) -> Option<Instant> {
        self.max_estimate.map(|max| self.started + max)
    }

    pub fn should_refresh(&self, now: Instant) -> bool {
        match self.last_refresh {
            None => true,
            Some(_) if now.saturating_duration_since(self.started) < self.fast_window => true,
            Some(last) => now.saturating_duration_since(last) >= self.slow_interval,
        }
    }

    pub fn message(&self, now: Instant) -> String {
        let elapsed = now.saturating_duration_since(self.started).as_secs();
        match self.expected_finish() {
            Some(finish) if now < finish => format!(
                "Erasing... about {} remaining",
                format_duration((finish - now).as_secs())
            ),
            // Past the prediction (or none yet): only elapsed time is honest
            _ => format!("Erasing... {} elapsed", format_duration(elapsed)),
        }
    }

    /// Message to show at `now`, if a refresh is due.
    pub fn tick(&mut self, now: Instant, new_max: bool) -> Option<String> {
        if new_max || self.should_refresh(now) {
            self.last_refresh = Some(now);
            Some(self.message(now))
        } else {
            None
        }
    }
}

/// Drain estimates every `interval` until every sender is gone or the
/// fail-safe trips. A tripped session owns the display from then on.
pub async fn run_status_task(
    mut estimates: UnboundedReceiver<Duration>,
    alerts: Arc<dyn AlertSink>,
    fail_safe: Arc<FailSafe>,
    mut tracker: StatusTracker,
    interval: Duration,
) -> StatusTracker {
    loop {
        if fail_safe.is_tripped() {
            tracing::debug!("Status task stopping after fail-safe trip");
            return tracker;
        }


        let mut new_max = false;
        let mut closed = false;

        loop {
            match estimates.try_recv() {
                Ok(estimate) => {
                    if tracker.observe(estimate) {
                        tracing::info!(
                            estimate = %humantime::format_duration(estimate),
                            "New maximum erase estimate"
                        );
                        new_max = true;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            tracing::debug!("Status task stopping");
            return tracker;
        }

        if let Some(message) = tracker.tick(Instant::now(), new_max) {
            let shown = fail_safe.unless_tripped(|| {
                alerts.display_message(&message, BlinkStyle::Steady, interval, interval)
            });
            if shown.is_none() {
                continue;
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Format seconds to H:MM:SS or M:SS
pub(crate) fn format_duration(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
