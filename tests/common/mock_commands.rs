/// Mock command execution infrastructure for testing
///
/// `MockCommandRegistry` stands in for hdparm: responses are registered per
/// operation flag, every call is logged, and an optional hook runs when the
/// erase command is issued (to actually clear a disk, or not).

use appliance_wipe::drives::{CommandOutput, CommandRunner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock command output
#[derive(Clone, Debug)]
pub struct MockCommandOutput {
    pub stdout: String,
    pub success: bool,
}

impl MockCommandOutput {
    pub fn success(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            success: true,
        }
    }

    #[allow(dead_code)]
    pub fn failure(stderr: &str) -> Self {
        Self {
            stdout: stderr.to_string(),
            success: false,
        }
    }
}

type EraseHook = Box<dyn Fn(&str) + Send + Sync>;

/// Mock command registry
#[derive(Default)]
pub struct MockCommandRegistry {
    commands: Mutex<HashMap<String, MockCommandOutput>>,
    calls: Mutex<Vec<Vec<String>>>,
    on_erase: Mutex<Option<EraseHook>>,
}

impl MockCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for an operation flag (`-I`, `--security-erase`, ...)
    pub fn register(&self, flag: &str, output: MockCommandOutput) {
        self.commands.lock().unwrap().insert(flag.to_string(), output);
    }

    /// Run `hook(device)` whenever an erase command succeeds
    #[allow(dead_code)]
    pub fn on_erase(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_erase.lock().unwrap() = Some(Box::new(hook));
    }

    /// Argument lists of every call so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls carrying `flag`
    pub fn count(&self, flag: &str) -> usize {
        self.calls().iter().filter(|args| args.iter().any(|a| a == flag)).count()
    }

    /// A drive that answers `-I` with `info` and accepts every security command
    pub fn ata_drive(info: &str) -> Arc<Self> {
        let registry = Self::new();
        registry.register("-I", MockCommandOutput::success(info));
        registry.register("--security-set-pass", MockCommandOutput::success(""));
        registry.register("--security-erase", MockCommandOutput::success(""));
        registry.register("--security-erase-enhanced", MockCommandOutput::success(""));
        Arc::new(registry)
    }
}

impl CommandRunner for MockCommandRegistry {
    fn run(&self, _program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(args.to_vec());

        let flag = args
            .iter()
            .find(|a| a.starts_with('-') && a.as_str() != "--user-master")
            .cloned()
            .unwrap_or_default();

        let Some(output) = self.commands.lock().unwrap().get(&flag).cloned() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no mock registered for {}", flag),
            ));
        };

        if output.success && flag.starts_with("--security-erase") {
            if let (Some(hook), Some(device)) = (self.on_erase.lock().unwrap().as_ref(), args.last()) {
                hook(device);
            }
        }

        Ok(CommandOutput {
            success: output.success,
            output: output.stdout,
        })
    }
}

/// Mock hdparm output
pub struct MockHdparmData;

impl MockHdparmData {
    /// hdparm -I output for a drive that accepts a normal secure erase
    pub fn not_frozen() -> String {
        r#"/dev/sda:

ATA device, with non-removable media
	Model Number:       WDC WD10EZEX-08WN4A0
	Serial Number:      WD-WCC6Y0123456
	Firmware Revision:  01.01A01
Commands/features:
	Enabled	Supported:
	   *	SMART feature set
	   *	Security Mode feature set
Security:
	Master password revision code = 65534
		supported
	not	enabled
	not	locked
	not	frozen
	not	expired: security count
	not	supported: enhanced erase
	2min for SECURITY ERASE UNIT.
"#
        .to_string()
    }

    /// hdparm -I output for a drive frozen by the BIOS
    pub fn frozen() -> String {
        r#"/dev/sda:

ATA device, with non-removable media
	Model Number:       Samsung SSD 860 EVO 500GB
	Serial Number:      S3Z1NB0K123456
Security:
	Master password revision code = 65534
		supported
	not	enabled
	not	locked
		frozen
	not	expired: security count
		supported: enhanced erase
	4min for SECURITY ERASE UNIT. 8min for ENHANCED SECURITY ERASE UNIT.
"#
        .to_string()
    }
}
