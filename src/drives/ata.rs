// ATA security erase through an external diagnostic tool (hdparm)
//
// The tool's text output is only ever searched line by line; nothing beyond
// substring matching is assumed about its format.

use crate::error::{retry_blocking, FixedDelay, RetryStrategy};
use crate::{EraseConfig, EraseError, EraseResult};
use regex::Regex;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

/// Exit status and combined stdout/stderr of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

/// Seam over process execution so the erase flow can run against canned output
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runs commands on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            output: combined,
        })
    }
}

/// Capabilities parsed from `hdparm -I`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityInfo {
    /// Drive is not security-frozen
    pub supported: bool,
    pub enhanced: bool,
    /// The "SECURITY ERASE UNIT" timing line, if reported
    pub erase_time_line: Option<String>,
}

pub fn parse_security_info(output: &str) -> SecurityInfo {
    let mut supported = None;
    let mut enhanced = None;
    let mut erase_time_line = None;

    for line in output.lines() {
        if supported.is_none() && line.contains("frozen") {
            supported = Some(line.contains("not"));
        } else if enhanced.is_none() && line.contains("enhanced erase") {
            enhanced = Some(!line.contains("not"));
        } else if erase_time_line.is_none() && line.contains("SECURITY ERASE UNIT") {
            erase_time_line = Some(line.trim().to_string());
        }
    }

    SecurityInfo {
        supported: supported.unwrap_or(false),
        enhanced: enhanced.unwrap_or(false),
        erase_time_line,
    }
}

fn minutes_regex() -> &'static Regex {
    static MINUTES: OnceLock<Regex> = OnceLock::new();
    MINUTES.get_or_init(|| Regex::new(r"(\d+)\s*min").expect("static regex"))
}

/// Drive-reported completion time for the chosen erase mode.
///
/// The timing line holds `.`-separated fields such as
/// `2min for SECURITY ERASE UNIT. 4min for ENHANCED SECURITY ERASE UNIT.`
pub fn parse_erase_estimate(line: Option<&str>, enhanced: bool, default: Duration) -> Duration {
    let Some(line) = line else {
        return default;
    };

    line.split('.')
        .filter(|field| field.contains("min"))
        .find(|field| field.contains("ENHANCED") == enhanced)
        .and_then(|field| minutes_regex().captures(field))
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .map(|mins| Duration::from_secs(mins * 60))
        .unwrap_or(default)
}

/// hdparm invocations used by the erase flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaCommand {
    Info,
    SetPassword,
    Erase { enhanced: bool },
}

impl AtaCommand {
    pub fn args(self, password: &str, device: &str) -> Vec<String> {
        let args: Vec<&str> = match self {
            AtaCommand::Info => vec!["-I", device],
            AtaCommand::SetPassword => {
                vec!["--user-master", "u", "--security-set-pass", password, device]
            }
            AtaCommand::Erase { enhanced: false } => {
                vec!["--user-master", "u", "--security-erase", password, device]
            }
            AtaCommand::Erase { enhanced: true } => {
                vec!["--user-master", "u", "--security-erase-enhanced", password, device]
            }
        };
        args.into_iter().map(String::from).collect()
    }

    fn name(self) -> &'static str {
        match self {
            AtaCommand::Info => "ata-info",
            AtaCommand::SetPassword => "ata-set-pass",
            AtaCommand::Erase { enhanced: false } => "ata-erase",
            AtaCommand::Erase { enhanced: true } => "ata-erase-enhanced",
        }
    }
}

/// An ATA tool bound to a runner and retry budget
pub struct AtaTool<'a> {
    runner: &'a dyn CommandRunner,
    program: String,
    password: String,
    retry: Box<dyn RetryStrategy + 'a>,
}

impl<'a> AtaTool<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &EraseConfig) -> Self {
        Self {
            runner,
            program: config.ata_tool.clone(),
            password: config.ata_password.clone(),
            retry: Box::new(FixedDelay::tool_invocation(config)),
        }
    }

    pub fn with_retry(mut self, retry: impl RetryStrategy + 'a) -> Self {
        self.retry = Box::new(retry);
        self
    }

    /// Invoke once per attempt; a spawn error or non-zero exit counts as a failure.
    pub fn invoke(&self, command: AtaCommand, device: &str) -> EraseResult<String> {
        let args = command.args(&self.password, device);

        retry_blocking(self.retry.as_ref(), command.name(), || {
            let out = self
                .runner
                .run(&self.program, &args)
                .map_err(|e| EraseError::HardwareCommandFailed(format!("{} failed: {}", self.program, e)))?;
            if out.success {
                Ok(out.output)
            } else {
                Err(EraseError::HardwareCommandFailed(format!(
                    "{} {} on {}: {}",
                    self.program,
                    command.name(),
                    device,
                    out.output.trim()
                )))
            }
        })
    }
}

/// Attempt a native ATA secure erase.
///
/// Returns `Unsupported` when the drive is security-frozen. `report` receives the
/// expected completion time just before the erase command is issued.
pub fn try_secure_erase(
    tool: &AtaTool<'_>,
    device: &str,
    default_estimate: Duration,
    report: impl FnOnce(Duration),
) -> EraseResult<bool> {
    let info = parse_security_info(&tool.invoke(AtaCommand::Info, device)?);

    if !info.supported {
        tracing::info!(device, "Drive is security-frozen, secure erase unavailable");
        return Err(EraseError::Unsupported(format!(
            "{}: ATA secure erase not available",
            device
        )));
    }

    tool.invoke(AtaCommand::SetPassword, device)?;

    let estimate = parse_erase_estimate(info.erase_time_line.as_deref(), info.enhanced, default_estimate);
    tracing::info!(
        device,
        enhanced = info.enhanced,
        estimate = %humantime::format_duration(estimate),
        "Issuing ATA secure erase"
    );
    report(estimate);

    tool.invoke(AtaCommand::Erase { enhanced: info.enhanced }, device)?;
    tracing::info!(device, "ATA secure erase completed");
    Ok(info.enhanced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use test_case::test_case;

    const NOT_FROZEN: &str = "Security:\n\
        \tMaster password revision code = 65534\n\
        \t\tsupported\n\
        \tnot\tenabled\n\
        \tnot\tlocked\n\
        \tnot\tfrozen\n\
        \tnot\texpired: security count\n\
        \tnot\tsupported: enhanced erase\n\
        \t2min for SECURITY ERASE UNIT.\n";

    const FROZEN: &str = "Security:\n\
        \t\tsupported\n\
        \tnot\tenabled\n\
        \tnot\tlocked\n\
        \t\tfrozen\n\
        \t\tsupported: enhanced erase\n\
        \t4min for SECURITY ERASE UNIT. 8min for ENHANCED SECURITY ERASE UNIT.\n";

    fn config() -> EraseConfig {
        EraseConfig {
            tool_retry_delay_ms: 0,
            ..EraseConfig::default()
        }
    }

    fn ok(output: &str) -> std::io::Result<CommandOutput> {
        Ok(CommandOutput {
            success: true,
            output: output.to_string(),
        })
    }

    #[test]
    fn test_parse_not_frozen_normal_erase() {
        let info = parse_security_info(NOT_FROZEN);
        assert!(info.supported);
        assert!(!info.enhanced);
        assert_eq!(info.erase_time_line.as_deref(), Some("2min for SECURITY ERASE UNIT."));
    }

    #[test]
    fn test_parse_frozen_enhanced() {
        let info = parse_security_info(FROZEN);
        assert!(!info.supported);
        assert!(info.enhanced);
    }

    #[test]
    fn test_parse_missing_security_section() {
        let info = parse_security_info("Model Number: VBOX HARDDISK\n");
        assert!(!info.supported);
        assert!(!info.enhanced);
        assert!(info.erase_time_line.is_none());
    }

    #[test_case("2min for SECURITY ERASE UNIT. 4min for ENHANCED SECURITY ERASE UNIT.", false, 2; "normal of two")]
    #[test_case("2min for SECURITY ERASE UNIT. 4min for ENHANCED SECURITY ERASE UNIT.", true, 4; "enhanced of two")]
    #[test_case("more than 508min for SECURITY ERASE UNIT. more than 508min for ENHANCED SECURITY ERASE UNIT.", true, 508; "more than")]
    #[test_case("98min for SECURITY ERASE UNIT.", false, 98; "single field")]
    #[test_case("98min for SECURITY ERASE UNIT.", true, 200; "enhanced missing")]
    #[test_case("SECURITY ERASE UNIT time unknown.", false, 200; "unparsable")]
    fn test_parse_erase_estimate(line: &str, enhanced: bool, expected_mins: u64) {
        let default = Duration::from_secs(200 * 60);
        assert_eq!(
            parse_erase_estimate(Some(line), enhanced, default),
            Duration::from_secs(expected_mins * 60)
        );
    }

    #[test]
    fn test_parse_erase_estimate_without_line() {
        let default = Duration::from_secs(12_000);
        assert_eq!(parse_erase_estimate(None, false, default), default);
    }

    #[test_case(AtaCommand::Info, &["-I", "/dev/sda"])]
    #[test_case(AtaCommand::SetPassword, &["--user-master", "u", "--security-set-pass", "Erase", "/dev/sda"])]
    #[test_case(AtaCommand::Erase { enhanced: false }, &["--user-master", "u", "--security-erase", "Erase", "/dev/sda"])]
    #[test_case(AtaCommand::Erase { enhanced: true }, &["--user-master", "u", "--security-erase-enhanced", "Erase", "/dev/sda"])]
    fn test_command_arguments(command: AtaCommand, expected: &[&str]) {
        assert_eq!(command.args("Erase", "/dev/sda"), expected);
    }

    #[test]
    fn test_not_frozen_issues_normal_erase() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();

        runner
            .expect_run()
            .withf(|program, args| program == "hdparm" && args[0] == "-I")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| ok(NOT_FROZEN));
        runner
            .expect_run()
            .withf(|_, args| args.contains(&"--security-set-pass".to_string()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| ok(""));
        runner
            .expect_run()
            .withf(|_, args| args.contains(&"--security-erase".to_string()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| ok(""));

        let config = config();
        let tool = AtaTool::new(&runner, &config);
        let mut reported = None;
        let enhanced = try_secure_erase(&tool, "/dev/sda", Duration::from_secs(1), |d| reported = Some(d))
            .unwrap();

        assert!(!enhanced);
        assert_eq!(reported, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_frozen_drive_is_unsupported() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| ok(FROZEN));

        let config = config();
        let tool = AtaTool::new(&runner, &config);
        let result = try_secure_erase(&tool, "/dev/sda", Duration::from_secs(1), |_| {
            panic!("no estimate expected for a frozen drive")
        });

        assert!(matches!(result, Err(EraseError::Unsupported(_))));
    }

    #[test]
    fn test_flaky_tool_is_retried() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(std::io::Error::other("device busy")));
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| ok("ok"));

        let config = config();
        let tool = AtaTool::new(&runner, &config);
        assert_eq!(tool.invoke(AtaCommand::Info, "/dev/sda").unwrap(), "ok");
    }

    #[test]
    fn test_retry_budget_is_ten_attempts() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(10).returning(|_, _| {
            Ok(CommandOutput {
                success: false,
                output: "SG_IO: bad/missing sense data".to_string(),
            })
        });

        let config = config();
        let tool = AtaTool::new(&runner, &config);
        let err = tool.invoke(AtaCommand::SetPassword, "/dev/sda").unwrap_err();
        assert!(matches!(err, EraseError::HardwareCommandFailed(_)));
    }
}
