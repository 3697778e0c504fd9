use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::warn;

use sd_provisioner::config::{self, ProvisionConfig};
use sd_provisioner::device;
use sd_provisioner::error::ProvisionError;
use sd_provisioner::executor::users;
use sd_provisioner::logging;
use sd_provisioner::mount::{MountSession, SystemMounter};
use sd_provisioner::preflight;
use sd_provisioner::provision::{self, ProvisionReport, ProvisionRequest};
use sd_provisioner::wizard::steps::{build_steps, WizardState};
use sd_provisioner::wizard::terminal::{ignore_interrupts, TerminalPrompter};
use sd_provisioner::wizard::run_steps;

/// Prepare an SD card so a single-board computer boots straight onto wifi.
#[derive(Debug, Parser)]
#[command(name = "sd-provisioner", version)]
struct Cli {
    /// TOML configuration; built-in defaults when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Block device of the SD card, skipping device selection.
    #[arg(long, value_name = "DEV", conflicts_with = "root")]
    device: Option<String>,

    /// Where to mount the root partition.
    #[arg(long, value_name = "DIR")]
    mount_point: Option<PathBuf>,

    /// Provision an already mounted or unpacked tree instead of a device.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if interrupted(&err) => {
            println!("\nExiting.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Interrupted)
        )
    })
}

fn load_config(cli: &Cli) -> Result<ProvisionConfig> {
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(mount_point) = &cli.mount_point {
        if !mount_point.is_absolute() {
            bail!("--mount-point must be absolute, got '{}'", mount_point.display());
        }
        config.mount_point = mount_point.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let device_io = cli.root.is_none();
    let config = load_config(&cli)?;
    logging::init(config.log_file.as_deref())?;
    preflight::check_host(&config, device_io)?;
    if let Some(root) = &cli.root {
        if !root.is_dir() {
            bail!("--root '{}' is not a directory", root.display());
        }
    }

    println!("Welcome to the SD card provisioner");
    let devices = if device_io && cli.device.is_none() {
        println!("[provision] detecting removable devices...");
        device::list_removable().context("detecting SD card devices")?
    } else {
        Vec::new()
    };

    let mut state = WizardState::default();
    {
        let steps = build_steps(&config, &devices);
        let mut prompter = TerminalPrompter::new();
        run_steps(&steps, &mut prompter, &mut state)?;
    }
    let selected = cli
        .device
        .clone()
        .or_else(|| state.device.as_ref().map(|d| d.path.clone()));
    let request = state
        .into_request(&config, users::hash_password)
        .context("preparing provisioning request")?;

    // Past this point the target gets mounted and written.
    ignore_interrupts();
    let report = match (&cli.root, selected) {
        (Some(root), _) => provision_tree(root, &config, &request)?,
        (None, Some(device)) => provision_device(&device, &config, &request)?,
        (None, None) => bail!("no device selected"),
    };

    for line in report.summary() {
        println!("[provision] {}", line);
    }
    println!("[provision] done. Insert the SD card into the board and power it on.");
    Ok(())
}

fn provision_tree(root: &Path, config: &ProvisionConfig, request: &ProvisionRequest) -> Result<ProvisionReport> {
    println!("[provision] applying configuration to {}", root.display());
    provision::apply(root, config, request)
        .with_context(|| format!("provisioning '{}'", root.display()))
}

fn provision_device(device: &str, config: &ProvisionConfig, request: &ProvisionRequest) -> Result<ProvisionReport> {
    let partition = device::root_partition(device)
        .with_context(|| format!("finding root partition on '{}'", device))?;
    println!(
        "[provision] mounting {} at {}...",
        partition.path,
        config.mount_point.display()
    );
    let session = MountSession::acquire(SystemMounter, &partition, &config.mount_point)?;

    let result = provision::apply(session.root(), config, request)
        .with_context(|| format!("provisioning '{}'", session.root().display()));

    println!("[provision] unmounting {}...", session.root().display());
    if let Err(err) = session.release() {
        warn!(error = %err, "release failed");
        println!("[provision] warning: {}", err);
    }
    result
}
