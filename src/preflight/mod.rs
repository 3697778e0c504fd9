//! Preflight checks for a provisioning run.
//!
//! Validates that the host has the tools the run will shell out to, and
//! that we have the privileges to mount devices and chown files inside the
//! target. This prevents half-applied runs that fail on the first `mount`.

use anyhow::{bail, Result};

use crate::config::ProvisionConfig;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every run needs. Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("lsblk", "util-linux"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
];

/// Needed to hash passwords for the target's shadow file.
pub const ACCOUNT_TOOLS: &[(&str, &str)] = &[("openssl", "openssl")];

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool with its package.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// The tools `config` will use.
pub fn tools_for(config: &ProvisionConfig, device_io: bool) -> Vec<(&'static str, &'static str)> {
    let mut tools = Vec::new();
    if device_io {
        tools.extend_from_slice(REQUIRED_TOOLS);
    }
    if config.accounts.enabled || config.accounts.set_root_password {
        tools.extend_from_slice(ACCOUNT_TOOLS);
    }
    tools
}

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Mounting and chowning inside the target need root.
pub fn require_root() -> Result<()> {
    if !is_root() {
        bail!("This tool must be run as root (try: sudo sd-provisioner)");
    }
    Ok(())
}

/// Run every check for `config`. `device_io` is false when provisioning an
/// already-mounted tree, which needs neither root nor the mount tools.
pub fn check_host(config: &ProvisionConfig, device_io: bool) -> Result<()> {
    if device_io {
        require_root()?;
    }
    check_required_tools(&tools_for(config, device_io))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        // 'ls' should exist on any Unix system
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure() {
        let tools = &[("ls", "coreutils"), ("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err().to_string();
        assert!(err.contains("nonexistent_command_xyz (install: fake-package)"));
        assert!(!err.contains("coreutils"));
    }

    #[test]
    fn test_tools_for_config() {
        let mut config = ProvisionConfig::default();
        config.accounts.set_root_password = false;
        assert!(tools_for(&config, false).is_empty());
        assert_eq!(tools_for(&config, true).len(), REQUIRED_TOOLS.len());

        config.accounts.enabled = true;
        assert!(tools_for(&config, false).contains(&("openssl", "openssl")));
    }
}
