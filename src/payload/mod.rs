//! The IP-blink payload: a shell script that blinks the board's IP address
//! on the green LED after boot, and the oneshot unit that runs it.

use std::path::Path;

use tracing::info;

use crate::backup::BackupSet;
use crate::config::ServiceConfig;
use crate::error::{ProvisionError, Result};
use crate::executor::files::{ensure_file, WriteOutcome};
use crate::executor::systemd::{enable_service, install_unit, EnableOutcome};

pub const SCRIPT: &str = include_str!("ip_blink.sh");
pub const UNIT: &str = include_str!("ipblink.service");
pub const UNIT_NAME: &str = "ipblink.service";
pub const SCRIPT_PATH: &str = "usr/local/bin/ip_blink.sh";
pub const SCRIPT_MODE: u32 = 0o750;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadOutcome {
    pub script: WriteOutcome,
    pub unit: WriteOutcome,
    pub enable: EnableOutcome,
}

/// Unit text with `ExecStart` pointing at `script_path` inside the target.
pub fn unit_for(script_path: &Path) -> Result<String> {
    let absolute = Path::new("/").join(script_path);
    let absolute = absolute.to_str().ok_or_else(|| {
        ProvisionError::validation("script path", "must be valid UTF-8")
    })?;
    Ok(UNIT.replace(
        &format!("ExecStart=/{}", SCRIPT_PATH),
        &format!("ExecStart={}", absolute),
    ))
}

/// Install script and unit into `root` and enable the unit.
pub fn install(root: &Path, service: &ServiceConfig, backups: &mut BackupSet) -> Result<PayloadOutcome> {
    let script = ensure_file(&root.join(&service.script_path), SCRIPT, SCRIPT_MODE, backups)?;
    let unit = install_unit(root, &service.unit, &unit_for(&service.script_path)?, backups)?;
    let enable = enable_service(root, &service.unit, &service.wanted_by, backups)?;
    info!(unit = %service.unit, ?script, ?unit, ?enable, "payload installed");
    Ok(PayloadOutcome {
        script,
        unit,
        enable,
    })
}
