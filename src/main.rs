use anyhow::{Context, Result};
use appliance_wipe::drives::{RaidFormat, SystemRunner};
use appliance_wipe::io::get_platform_io;
use appliance_wipe::platform::{ApplianceFinalizer, MountedVolume, PlatformDescriptor, RecoveryVolume, SystemPower};
use appliance_wipe::ui::ConsoleAlerts;
use appliance_wipe::{EraseConfig, EraseOrchestrator};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "appliance-wipe")]
#[command(about = "Secure erase of appliance data disks before decommissioning")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also write logs to a daily file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// JSON file overriding erase tunables
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct PlatformArgs {
    /// Platform model name
    #[arg(long, env = "ERASE_PLATFORM", default_value = "generic")]
    platform: String,

    /// Number of data disks the platform ships with
    #[arg(long, env = "ERASE_EXPECTED_DISKS", default_value = "2")]
    expected_disks: usize,

    /// RAID metadata format on the data disks (imsm, ddf)
    #[arg(long, env = "ERASE_RAID_FORMAT", default_value = "imsm")]
    raid_format: RaidFormat,

    /// RAID level, informational
    #[arg(long, env = "ERASE_RAID_LEVEL")]
    raid_level: Option<u8>,

    /// Devices smaller than this without RAID metadata are ignored (bytes)
    #[arg(long, env = "ERASE_SIZE_THRESHOLD", default_value = "1073741824")]
    size_threshold: u64,

    /// Device holding the recovery volume; never erased. Defaults to the
    /// device mounted at the recovery mount point
    #[arg(long, env = "ERASE_RECOVERY_DEVICE")]
    recovery_device: Option<String>,
}

impl PlatformArgs {
    fn descriptor(&self) -> PlatformDescriptor {
        PlatformDescriptor {
            name: self.platform.clone(),
            expected_disks: self.expected_disks,
            raid_format: self.raid_format,
            raid_level: self.raid_level,
            size_threshold: self.size_threshold,
            recovery_device: self.recovery_device.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Erase every data disk, verify, then power off (DESTROYS ALL DATA)
    Erase {
        #[command(flatten)]
        platform: PlatformArgs,

        /// Mount point of the recovery volume
        #[arg(long, env = "ERASE_RECOVERY_MOUNT", default_value = "/recovery")]
        recovery_mount: PathBuf,

        /// Use the page cache instead of O_DIRECT
        #[arg(long)]
        buffered_io: bool,
    },

    /// List candidate devices and their RAID metadata without writing
    List {
        #[command(flatten)]
        platform: PlatformArgs,

        /// Mount point of the recovery volume
        #[arg(long, env = "ERASE_RECOVERY_MOUNT", default_value = "/recovery")]
        recovery_mount: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.debug, cli.json_logs, cli.log_dir.as_deref())?;

    if !is_root() {
        eprintln!("Error: This program requires root privileges.");
        eprintln!("Please run with sudo or as root user.");
        std::process::exit(1);
    }

    let mut config = match &cli.config {
        Some(path) => EraseConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EraseConfig::default(),
    };

    match cli.command {
        Commands::Erase {
            platform,
            recovery_mount,
            buffered_io,
        } => {
            if buffered_io {
                config.direct_io = false;
            }
            erase(config, platform.descriptor(), recovery_mount).await?;
        }
        Commands::List {
            platform,
            recovery_mount,
            json,
        } => {
            let volume = MountedVolume::new(recovery_mount);
            let platform = with_recovery_device(platform.descriptor(), &volume);
            list(config, platform, json).await?;
        }
    }

    Ok(())
}

fn init_logging(debug: bool, json: bool, log_dir: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "appliance-wipe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(guard)
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Exclude whatever backs the recovery mount unless a device was given.
fn with_recovery_device(platform: PlatformDescriptor, volume: &MountedVolume) -> PlatformDescriptor {
    if platform.recovery_device.is_some() {
        return platform;
    }
    let platform = platform.or_recovery_device(volume.source_device());
    match &platform.recovery_device {
        Some(device) => tracing::info!(device = %device, "Recovery device from mount table"),
        None => tracing::warn!(
            path = %volume.path().display(),
            "No block device mounted at the recovery mount, nothing excluded"
        ),
    }
    platform
}

async fn erase(config: EraseConfig, platform: PlatformDescriptor, recovery_mount: PathBuf) -> Result<()> {
    let volume = MountedVolume::new(recovery_mount);
    if !volume.is_mounted() {
        tracing::warn!(path = %volume.path().display(), "Recovery volume is not mounted");
    }
    let platform = with_recovery_device(platform, &volume);

    let alerts = Arc::new(ConsoleAlerts::new());
    let finalizer = Arc::new(ApplianceFinalizer::new(
        config.clone(),
        Arc::new(volume),
        alerts.clone(),
        Arc::new(SystemPower),
    ));

    let orchestrator = EraseOrchestrator::new(
        config.clone(),
        platform,
        Arc::from(get_platform_io(config.direct_io)),
        Arc::new(SystemRunner),
        alerts,
        finalizer,
    );

    let outcome = orchestrator.erase().await?;
    for device in &outcome.devices {
        println!("{} {:?}", device.path.green(), device.method);
    }
    Ok(())
}

async fn list(config: EraseConfig, platform: PlatformDescriptor, json: bool) -> Result<()> {
    let alerts = Arc::new(ConsoleAlerts::new());
    // survey() never reaches the finalizer
    let finalizer = Arc::new(ApplianceFinalizer::new(
        config.clone(),
        Arc::new(MountedVolume::new("/")),
        alerts.clone(),
        Arc::new(SystemPower),
    ));

    let orchestrator = EraseOrchestrator::new(
        config.clone(),
        platform,
        Arc::from(get_platform_io(config.direct_io)),
        Arc::new(SystemRunner),
        alerts,
        finalizer,
    );

    let devices = orchestrator.survey().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No candidate devices detected.");
        return Ok(());
    }

    println!("{:<20} {:>12} {:<10}", "Device", "Size", "RAID");
    println!("{}", "-".repeat(44));
    for device in devices {
        println!(
            "{:<20} {:>12} {:<10}",
            device.path,
            format!("{}MB", device.size / (1024 * 1024)),
            device.raid_format.to_string()
        );
    }
    Ok(())
}
