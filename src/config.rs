//! TOML configuration.
//!
//! Every key is optional; a missing file means the built-in defaults, which
//! reproduce the classic wifi + IP-blink setup for an Orange Pi image.
//!
//! ```toml
//! mount_point = "/mnt/orangepi_root"
//! log_file = "/var/log/sd-provisioner.log"
//!
//! [network]
//! interface = "wlan0"
//! strategy = "auto"          # auto | structured | text
//! wait_online_timeout = 30
//!
//! [accounts]
//! enabled = true
//! groups = ["sudo", "adm", "tty"]
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::executor::users::{validate_username, DEFAULT_GROUPS, DEFAULT_SHELL, FIRST_UID};
use crate::network::{validate_interface, Strategy, DEFAULT_INTERFACE, NETPLAN_FILE};
use crate::payload;

pub const DEFAULT_MOUNT_POINT: &str = "/mnt/orangepi_root";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProvisionConfig {
    pub mount_point: PathBuf,
    /// Append-only log in addition to stderr.
    pub log_file: Option<PathBuf>,
    pub network: NetworkConfig,
    pub service: ServiceConfig,
    pub accounts: AccountsConfig,
    pub timezone: TimezoneConfig,
    pub locale: LocaleConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from(DEFAULT_MOUNT_POINT),
            log_file: None,
            network: NetworkConfig::default(),
            service: ServiceConfig::default(),
            accounts: AccountsConfig::default(),
            timezone: TimezoneConfig::default(),
            locale: LocaleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NetworkConfig {
    pub interface: String,
    /// Relative to the target root.
    pub netplan_file: PathBuf,
    pub strategy: Strategy,
    /// Install the drop-in that makes boot wait for `interface` only.
    pub wait_online_override: bool,
    pub wait_online_timeout: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            netplan_file: PathBuf::from(NETPLAN_FILE),
            strategy: Strategy::Auto,
            wait_online_override: true,
            wait_online_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceConfig {
    pub enabled: bool,
    pub unit: String,
    /// Relative to the target root.
    pub script_path: PathBuf,
    pub wanted_by: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unit: payload::UNIT_NAME.to_string(),
            script_path: PathBuf::from(payload::SCRIPT_PATH),
            wanted_by: "multi-user.target".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AccountsConfig {
    /// Prompt for and create a login user.
    pub enabled: bool,
    pub set_root_password: bool,
    pub first_uid: u32,
    pub shell: String,
    pub groups: Vec<String>,
    /// Remove the image's first-login wizard markers.
    pub disable_first_login: bool,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            set_root_password: true,
            first_uid: FIRST_UID,
            shell: DEFAULT_SHELL.to_string(),
            groups: DEFAULT_GROUPS.iter().map(|g| g.to_string()).collect(),
            disable_first_login: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimezoneConfig {
    pub enabled: bool,
    /// Offered as a menu; "Other" lets the operator type any zone.
    pub choices: Vec<String>,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            choices: [
                "UTC",
                "America/New_York",
                "America/Chicago",
                "America/Denver",
                "America/Los_Angeles",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LocaleConfig {
    pub enabled: bool,
    pub choices: Vec<String>,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            choices: ["en_US.UTF-8", "en_GB.UTF-8", "de_DE.UTF-8"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Load `path`, or the defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<ProvisionConfig> {
    let Some(path) = path else {
        return Ok(ProvisionConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config '{}'", path.display()))?;
    let config = parse(&text).with_context(|| format!("parsing config '{}'", path.display()))?;
    Ok(config)
}

/// Parse and check configuration text.
pub fn parse(text: &str) -> Result<ProvisionConfig> {
    let config: ProvisionConfig = toml::from_str(text)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ProvisionConfig) -> Result<()> {
    if !config.mount_point.is_absolute() {
        bail!(
            "mount_point must be absolute, got '{}'",
            config.mount_point.display()
        );
    }
    check_relative(&config.network.netplan_file, "network.netplan_file")?;
    check_relative(&config.service.script_path, "service.script_path")?;
    validate_interface(&config.network.interface)?;
    if config.network.wait_online_timeout == 0 {
        bail!("network.wait_online_timeout must be at least 1 second");
    }
    if config.accounts.first_uid == 0 {
        bail!("accounts.first_uid must not be 0");
    }
    for group in &config.accounts.groups {
        validate_username(group).with_context(|| format!("accounts.groups entry '{}'", group))?;
    }
    if config.timezone.enabled && config.timezone.choices.is_empty() {
        bail!("timezone.choices must not be empty when timezone is enabled");
    }
    if config.locale.enabled && config.locale.choices.is_empty() {
        bail!("locale.choices must not be empty when locale is enabled");
    }
    Ok(())
}

/// Paths inside the target must stay inside it.
fn check_relative(path: &Path, field: &str) -> Result<()> {
    if path.as_os_str().is_empty() || path.is_absolute() {
        bail!("{field} must be a relative path, got '{}'", path.display());
    }
    for component in path.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            bail!(
                "{field} contains invalid traversal/root component in '{}'",
                path.display()
            );
        }
    }
    Ok(())
}
