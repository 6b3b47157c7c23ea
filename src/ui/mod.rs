// Operator-facing output: front-panel alerts and erase progress

pub mod alerts;
pub mod progress;


pub use alerts::{AlertSink, BlinkStyle, ConsoleAlerts, StopSignal};
pub use progress::{run_status_task, StatusTracker};
