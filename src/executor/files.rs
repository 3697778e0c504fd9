//! Whole-file write primitives shared by every mutator.
//!
//! Artifacts are rewritten through a sibling temporary file that is renamed
//! into place, so a reader never observes a half-written file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::backup::BackupSet;
use crate::error::{ProvisionError, Result};

/// What a write did to the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Unchanged,
    Created,
    Updated,
}

impl WriteOutcome {
    pub fn label(self) -> &'static str {
        match self {
            WriteOutcome::Unchanged => "unchanged",
            WriteOutcome::Created => "created",
            WriteOutcome::Updated => "updated",
        }
    }
}

/// Read a text artifact, `Ok(None)` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ProvisionError::io(path, err)),
    }
}

/// Replace `path` with `content` atomically.
///
/// `mode` forces the permission bits; with `None` an existing file keeps its
/// mode and a new file gets 0644. Ownership of an existing file is kept.
pub fn write_atomic(path: &Path, content: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| ProvisionError::io(parent, err))?;

    let existing = match fs::metadata(path) {
        Ok(metadata) => Some(metadata),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(ProvisionError::io(path, err)),
    };
    let mode = mode.unwrap_or_else(|| {
        existing
            .as_ref()
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(0o644)
    });

    let tmp = tmp_path(parent, path);
    let result = write_tmp(&tmp, content, mode, existing.as_ref())
        .and_then(|()| fs::rename(&tmp, path).map_err(|err| ProvisionError::io(path, err)));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_tmp(tmp: &Path, content: &[u8], mode: u32, existing: Option<&fs::Metadata>) -> Result<()> {
    let mut file = File::create(tmp).map_err(|err| ProvisionError::io(tmp, err))?;
    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|err| ProvisionError::io(tmp, err))?;
    fs::set_permissions(tmp, fs::Permissions::from_mode(mode))
        .map_err(|err| ProvisionError::io(tmp, err))?;

    if let Some(existing) = existing {
        let created = fs::metadata(tmp).map_err(|err| ProvisionError::io(tmp, err))?;
        if created.uid() != existing.uid() || created.gid() != existing.gid() {
            std::os::unix::fs::chown(tmp, Some(existing.uid()), Some(existing.gid()))
                .map_err(|err| ProvisionError::io(tmp, err))?;
        }
    }
    Ok(())
}

fn tmp_path(parent: &Path, path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    parent.join(format!(".{name}.tmp-{n}"))
}

/// Make `path` hold exactly `content` with permission bits `mode`.
///
/// Nothing is written (and nothing backed up) when the artifact already
/// matches; otherwise the previous version is backed up first.
pub fn ensure_file(
    path: &Path,
    content: &str,
    mode: u32,
    backups: &mut BackupSet,
) -> Result<WriteOutcome> {
    let current = read_optional(path)?;
    if let Some(current) = &current {
        let current_mode = fs::metadata(path)
            .map_err(|err| ProvisionError::io(path, err))?
            .permissions()
            .mode()
            & 0o7777;
        if current == content && current_mode == mode {
            debug!(path = %path.display(), "already up to date");
            return Ok(WriteOutcome::Unchanged);
        }
    }

    backups.ensure(path)?;
    write_atomic(path, content.as_bytes(), Some(mode))?;

    let outcome = if current.is_some() {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Created
    };
    info!(path = %path.display(), ?outcome, "wrote artifact");
    Ok(outcome)
}

/// Remove a file if present. Returns whether something was removed.
pub fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "removed");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ProvisionError::io(path, err)),
    }
}
