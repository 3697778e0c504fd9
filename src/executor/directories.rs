//! Directory creation with explicit ownership and mode.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

/// Make `path` a directory owned by `uid:gid` with permission bits `mode`.
///
/// Parents are created as needed with default ownership. Returns whether
/// the directory itself had to be created.
pub fn ensure_owned_dir(path: &Path, uid: u32, gid: u32, mode: u32) -> Result<bool> {
    let created = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => false,
        Ok(metadata) => {
            return Err(ProvisionError::UnexpectedArtifact {
                path: path.to_path_buf(),
                found: if metadata.file_type().is_symlink() {
                    "symbolic link where a directory was expected".into()
                } else {
                    "file where a directory was expected".into()
                },
            })
        }
        Err(_) => {
            fs::create_dir_all(path).map_err(|err| ProvisionError::io(path, err))?;
            true
        }
    };

    let metadata = fs::metadata(path).map_err(|err| ProvisionError::io(path, err))?;
    if metadata.uid() != uid || metadata.gid() != gid {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
            .map_err(|err| ProvisionError::io(path, err))?;
    }
    if metadata.permissions().mode() & 0o7777 != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|err| ProvisionError::io(path, err))?;
    }

    if created {
        info!(path = %path.display(), uid, gid, mode = %format!("{:o}", mode), "directory created");
    } else {
        debug!(path = %path.display(), "directory already present");
    }
    Ok(created)
}
