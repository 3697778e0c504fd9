//! Backup manager.
//!
//! Before any destructive write the current bytes of an artifact are copied
//! to a sibling `<name>.bak`. A failed backup aborts the mutation; a missing
//! artifact is simply nothing to back up.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};

pub const BACKUP_SUFFIX: &str = ".bak";

/// A completed backup of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub timestamp: OffsetDateTime,
    /// sha256 of the copied bytes, identical for original and backup. For a
    /// symlink, of its target path.
    pub sha256: String,
}

/// `<path>.bak`, next to the original.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `path` to `<path>.bak`, overwriting any earlier backup.
///
/// Returns `Ok(None)` when `path` does not exist. Contents, permission bits
/// and access/modification times are carried over and the copy is verified
/// by digest before the record is returned.
///
/// A symlink is backed up as a link with the same target, never by
/// following it: an absolute target would resolve on the host, not in the
/// image.
pub fn backup_file(path: &Path) -> Result<Option<BackupRecord>> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "nothing to back up, artifact does not exist");
            return Ok(None);
        }
        Err(err) => return Err(failure(path, err)),
    };
    let is_link = metadata.file_type().is_symlink();
    if !metadata.is_file() && !is_link {
        return Err(ProvisionError::Backup {
            path: path.to_path_buf(),
            reason: "not a regular file or symlink".into(),
        });
    }

    let backup = backup_path_for(path);
    // A read-only or symlinked leftover must not redirect the copy.
    if fs::symlink_metadata(&backup).is_ok() {
        fs::remove_file(&backup).map_err(|err| failure(path, err))?;
    }
    if is_link {
        return backup_link(path, backup);
    }
    fs::copy(path, &backup).map_err(|err| failure(path, err))?;

    let times = FileTimes::new()
        .set_accessed(metadata.accessed().map_err(|err| failure(path, err))?)
        .set_modified(metadata.modified().map_err(|err| failure(path, err))?);
    File::options()
        .write(true)
        .open(&backup)
        .and_then(|f| f.set_times(times))
        .map_err(|err| failure(path, err))?;

    let original_sha = sha256_file(path)?;
    let backup_sha = sha256_file(&backup)?;
    if original_sha != backup_sha {
        return Err(ProvisionError::Backup {
            path: path.to_path_buf(),
            reason: format!(
                "digest mismatch after copy ({} != {})",
                original_sha, backup_sha
            ),
        });
    }

    info!(
        original = %path.display(),
        backup = %backup.display(),
        "backup created"
    );
    Ok(Some(BackupRecord {
        original: path.to_path_buf(),
        backup,
        timestamp: OffsetDateTime::now_utc(),
        sha256: original_sha,
    }))
}

fn backup_link(path: &Path, backup: PathBuf) -> Result<Option<BackupRecord>> {
    let target = fs::read_link(path).map_err(|err| failure(path, err))?;
    std::os::unix::fs::symlink(&target, &backup).map_err(|err| failure(path, err))?;

    let copied = fs::read_link(&backup).map_err(|err| failure(path, err))?;
    if copied != target {
        return Err(ProvisionError::Backup {
            path: path.to_path_buf(),
            reason: format!(
                "link target mismatch after copy ({} != {})",
                target.display(),
                copied.display()
            ),
        });
    }

    info!(
        original = %path.display(),
        backup = %backup.display(),
        target = %target.display(),
        "symlink backed up"
    );
    Ok(Some(BackupRecord {
        original: path.to_path_buf(),
        backup,
        timestamp: OffsetDateTime::now_utc(),
        sha256: format!("{:x}", Sha256::digest(target.as_os_str().as_encoded_bytes())),
    }))
}

/// Backups taken during one provisioning session.
///
/// Each artifact is backed up at most once per session, so the `.bak` file
/// always holds the state from before the session started.
#[derive(Debug, Default)]
pub struct BackupSet {
    records: BTreeMap<PathBuf, Option<BackupRecord>>,
}

impl BackupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back `path` up unless that already happened in this session.
    pub fn ensure(&mut self, path: &Path) -> Result<Option<&BackupRecord>> {
        if self.records.contains_key(path) {
            debug!(path = %path.display(), "already backed up this session");
        } else {
            let record = backup_file(path)?;
            self.records.insert(path.to_path_buf(), record);
        }
        Ok(self.records.get(path).and_then(|r| r.as_ref()))
    }

    /// All backups actually written, ordered by original path.
    pub fn records(&self) -> impl Iterator<Item = &BackupRecord> {
        self.records.values().flatten()
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|err| failure(path, err))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn failure(path: &Path, err: io::Error) -> ProvisionError {
    ProvisionError::Backup {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
