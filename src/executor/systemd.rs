//! systemd activation artifacts: "wants" symlinks, unit files and drop-in
//! overrides.
//!
//! Enabling is a state machine over whatever sits at the link path:
//!
//! | found         | action                         | outcome          |
//! |---------------|--------------------------------|------------------|
//! | nothing       | create the link                | `Created`        |
//! | correct link  | nothing                        | `AlreadyEnabled` |
//! | other link    | replace the link               | `Repaired`       |
//! | regular file  | back it up, replace with link  | `Replaced`       |
//!
//! Anything else (a directory, a socket) is refused and left alone.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use super::files::{ensure_file, WriteOutcome};
use crate::backup::BackupSet;
use crate::error::{ProvisionError, Result};

/// Unit directory relative to the target root.
pub const SYSTEM_UNIT_DIR: &str = "etc/systemd/system";
pub const UNIT_MODE: u32 = 0o644;
pub const WAIT_ONLINE_UNIT: &str = "systemd-networkd-wait-online.service";
pub const OVERRIDE_FILE: &str = "override.conf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Absent,
    Correct,
    WrongTarget(PathBuf),
    RegularFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
    Created,
    AlreadyEnabled,
    Repaired { previous: PathBuf },
    Replaced { backup: PathBuf },
}

impl EnableOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, EnableOutcome::AlreadyEnabled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EnableOutcome::Created => "enabled",
            EnableOutcome::AlreadyEnabled => "already enabled",
            EnableOutcome::Repaired { .. } => "link repaired",
            EnableOutcome::Replaced { .. } => "file replaced by link",
        }
    }
}

/// Classify what sits at `link` relative to the wanted `target`.
pub fn inspect(link: &Path, target: &Path) -> Result<LinkState> {
    let metadata = match fs::symlink_metadata(link) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(LinkState::Absent),
        Err(err) => return Err(ProvisionError::io(link, err)),
    };
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        let current = fs::read_link(link).map_err(|err| ProvisionError::io(link, err))?;
        return Ok(if current == target {
            LinkState::Correct
        } else {
            LinkState::WrongTarget(current)
        });
    }
    if file_type.is_file() {
        return Ok(LinkState::RegularFile);
    }
    Err(ProvisionError::UnexpectedArtifact {
        path: link.to_path_buf(),
        found: if file_type.is_dir() {
            "directory".into()
        } else {
            "special file".into()
        },
    })
}

/// Make `link` a symbolic link to `target`, whatever it was before.
pub fn enable_link(link: &Path, target: &Path, backups: &mut BackupSet) -> Result<EnableOutcome> {
    let outcome = match inspect(link, target)? {
        LinkState::Correct => {
            debug!(link = %link.display(), "already enabled");
            return Ok(EnableOutcome::AlreadyEnabled);
        }
        LinkState::Absent => {
            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent).map_err(|err| ProvisionError::io(parent, err))?;
            }
            symlink(target, link).map_err(|err| ProvisionError::io(link, err))?;
            EnableOutcome::Created
        }
        LinkState::WrongTarget(previous) => {
            replace_with_link(link, target)?;
            EnableOutcome::Repaired { previous }
        }
        LinkState::RegularFile => {
            let backup = backups
                .ensure(link)?
                .map(|record| record.backup.clone())
                .ok_or_else(|| ProvisionError::Backup {
                    path: link.to_path_buf(),
                    reason: "file appeared after the session recorded it as absent".into(),
                })?;
            replace_with_link(link, target)?;
            EnableOutcome::Replaced { backup }
        }
    };
    info!(link = %link.display(), target = %target.display(), ?outcome, "link enabled");
    Ok(outcome)
}

/// Swap whatever is at `link` for a fresh symlink in one rename.
fn replace_with_link(link: &Path, target: &Path) -> Result<()> {
    let parent = link.parent().unwrap_or_else(|| Path::new("."));
    let name = link
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("link");
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp = parent.join(format!(".{name}.link-{n}"));

    symlink(target, &tmp).map_err(|err| ProvisionError::io(&tmp, err))?;
    if let Err(err) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(ProvisionError::io(link, err));
    }
    Ok(())
}

fn validate_unit_name(unit: &str) -> Result<()> {
    if unit.is_empty() || unit.contains('/') || unit.starts_with('.') {
        return Err(ProvisionError::validation(
            "unit",
            format!("'{}' is not a unit file name", unit),
        ));
    }
    Ok(())
}

/// Enable `unit` for `wanted_by` the way `systemctl enable` would.
///
/// Creates `etc/systemd/system/<wanted_by>.wants/<unit>` pointing at
/// `/etc/systemd/system/<unit>`.
pub fn enable_service(
    root: &Path,
    unit: &str,
    wanted_by: &str,
    backups: &mut BackupSet,
) -> Result<EnableOutcome> {
    validate_unit_name(unit)?;
    validate_unit_name(wanted_by)?;
    let link = root
        .join(SYSTEM_UNIT_DIR)
        .join(format!("{}.wants", wanted_by))
        .join(unit);
    let target = Path::new("/").join(SYSTEM_UNIT_DIR).join(unit);
    enable_link(&link, &target, backups)
}

/// Install a unit file under `etc/systemd/system`.
pub fn install_unit(
    root: &Path,
    unit: &str,
    content: &str,
    backups: &mut BackupSet,
) -> Result<WriteOutcome> {
    validate_unit_name(unit)?;
    ensure_file(&root.join(SYSTEM_UNIT_DIR).join(unit), content, UNIT_MODE, backups)
}

/// Write drop-in `name` for `unit`.
pub fn write_override(
    root: &Path,
    unit: &str,
    name: &str,
    content: &str,
    backups: &mut BackupSet,
) -> Result<WriteOutcome> {
    validate_unit_name(unit)?;
    validate_unit_name(name)?;
    let path = root
        .join(SYSTEM_UNIT_DIR)
        .join(format!("{}.d", unit))
        .join(name);
    ensure_file(&path, content, UNIT_MODE, backups)
}

/// Drop-in that makes boot wait for `interface` only, for at most `timeout` seconds.
pub fn wait_online_override(timeout: u32, interface: &str) -> String {
    format!(
        "[Service]\nExecStart=\nExecStart=/usr/bin/systemd-networkd-wait-online --timeout={} --interface={}\n",
        timeout, interface
    )
}
