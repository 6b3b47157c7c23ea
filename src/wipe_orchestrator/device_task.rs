// Per-device erase task
//
// Prepare -> (SecureErase | Overwrite) -> Verify -> Done
//
// Any failure in Prepare or Verify trips the fail-safe: an unverifiable
// erase must never look like a successful one.

use crate::algorithms::PatternOverwrite;
use crate::drives::{try_secure_erase, AtaTool, CommandRunner, Device};
use crate::platform::FailSafe;
use crate::verification::{count_canaries, write_canaries, CanaryPattern};
use crate::{EraseConfig, EraseError, EraseResult};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Everything device tasks share, read-only
pub struct TaskContext {
    pub config: EraseConfig,
    pub pattern: CanaryPattern,
    pub runner: Arc<dyn CommandRunner>,
    pub fail_safe: Arc<FailSafe>,
    pub estimates: UnboundedSender<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EraseMethod {
    SecureErase { enhanced: bool },
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Prepare,
    SecureErase,
    Overwrite,
    Verify,
    Done,
    UnrecoverableFailure,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct DeviceEraseTask {
    device: Device,
    ctx: Arc<TaskContext>,
    state: TaskState,
}

impl DeviceEraseTask {
    pub fn new(device: Device, ctx: Arc<TaskContext>) -> Self {
        Self {
            device,
            ctx,
            state: TaskState::Prepare,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Run to completion. The device is handed back either way.
    pub fn run(mut self) -> (Device, EraseResult<EraseMethod>) {
        let result = self.execute();
        match &result {
            Ok(method) => {
                self.transition(TaskState::Done);
                tracing::info!(device = %self.device.path(), method = ?method, "Device erased and verified");
            }
            Err(_) => self.transition(TaskState::UnrecoverableFailure),
        }
        (self.device, result)
    }

    fn execute(&mut self) -> EraseResult<EraseMethod> {
        self.prepare()?;
        let method = self.erase()?;
        self.verify()?;
        Ok(method)
    }

    fn transition(&mut self, next: TaskState) {
        tracing::debug!(device = %self.device.path(), from = %self.state, to = %next, "Task state change");
        self.state = next;
    }

    fn fail(&self, cause: EraseError) -> EraseError {
        self.ctx.fail_safe.trip(true, self.device.path(), &cause)
    }

    /// Plant canaries and prove they can be read back.
    fn prepare(&mut self) -> EraseResult<()> {
        let spacing = self.ctx.config.canary_spacing;

        let written = match write_canaries(&mut self.device, &self.ctx.pattern, spacing) {
            Ok(written) => written,
            Err(e) => return Err(self.fail(e)),
        };
        let found = match count_canaries(&mut self.device, &self.ctx.pattern, spacing) {
            Ok(found) => found,
            Err(e) => return Err(self.fail(e)),
        };

        if found != written {
            let cause = EraseError::CanaryMismatch {
                device: self.device.path().to_string(),
                expected: written,
                found,
            };
            return Err(self.fail(cause));
        }

        // The erase tool opens the device itself
        self.device.close();
        Ok(())
    }

    fn erase(&mut self) -> EraseResult<EraseMethod> {
        self.transition(TaskState::SecureErase);

        let ctx = self.ctx.clone();
        let tool = AtaTool::new(ctx.runner.as_ref(), &ctx.config);
        let secure = try_secure_erase(
            &tool,
            self.device.path(),
            ctx.config.secure_erase_default_estimate(),
            |estimate| {
                let _ = ctx.estimates.send(estimate);
            },
        );

        match secure {
            Ok(enhanced) => return Ok(EraseMethod::SecureErase { enhanced }),
            Err(e) => tracing::warn!(
                device = %self.device.path(),
                error = %e,
                "Secure erase unavailable, falling back to overwrite"
            ),
        }

        self.transition(TaskState::Overwrite);
        let _ = ctx.estimates.send(ctx.config.overwrite_estimate());

        let overwritten = PatternOverwrite::overwrite_device(
            &mut self.device,
            &ctx.config.overwrite_patterns,
            ctx.config.overwrite_buffer_size,
        );
        match overwritten {
            Ok(report) => {
                tracing::info!(device = %self.device.path(), bytes = report.total_bytes(), "Overwrite finished");
                Ok(EraseMethod::Overwrite)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Reopen and make sure no canary survived.
    fn verify(&mut self) -> EraseResult<()> {
        self.transition(TaskState::Verify);
        self.device.close();

        let found = match count_canaries(&mut self.device, &self.ctx.pattern, self.ctx.config.canary_spacing) {
            Ok(found) => found,
            Err(e) => return Err(self.fail(e)),
        };

        if found != 0 {
            let cause = EraseError::CanaryMismatch {
                device: self.device.path().to_string(),
                expected: 0,
                found,
            };
            return Err(self.fail(cause));
        }
        Ok(())
    }
}
