//! Error taxonomy for the configuration mutation engine.
//!
//! Every variant is a terminal outcome for the operation that raised it.
//! Nothing here is retried; the orchestrator reports the error and halts
//! (after the mount session has been released).

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A user-supplied value contains characters that could break the artifact.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no removable devices detected; insert the SD card and try again")]
    DeviceNotFound,

    #[error("no partitions found on device '{device}'")]
    PartitionNotFound { device: String },

    #[error("failed to mount '{partition}' at '{}': {detail}", mount_point.display())]
    Mount {
        partition: String,
        mount_point: PathBuf,
        detail: String,
    },

    #[error("failed to unmount '{}': {detail}; unmount it manually", mount_point.display())]
    Unmount { mount_point: PathBuf, detail: String },

    /// The document does not fit the indentation model the patcher assumes.
    #[error("ambiguous structure in '{}' at line {line}: {reason}", path.display())]
    PatchAmbiguity {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("'{key}' already exists in '{}'", path.display())]
    DuplicateKey { path: PathBuf, key: String },

    #[error("'{key}' not found in '{}'", path.display())]
    KeyNotFound { path: PathBuf, key: String },

    #[error("malformed record in '{}' at line {line}: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("failed to back up '{}': {reason}", path.display())]
    Backup { path: PathBuf, reason: String },

    #[error("permission denied on '{}'", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected {found} at '{}'", path.display())]
    UnexpectedArtifact { path: PathBuf, found: String },

    #[error("failed to parse '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("command '{program}' failed: {detail}")]
    Command { program: String, detail: String },

    #[error("I/O error on '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("interrupted")]
    Interrupted,
}

impl ProvisionError {
    /// Classify an I/O error on `path`. Permission failures keep their own
    /// variant so callers never mistake them for transient errors.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::PermissionDenied {
            ProvisionError::PermissionDenied { path, source }
        } else {
            ProvisionError::Io { path, source }
        }
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        ProvisionError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn ambiguity(path: &Path, line: usize, reason: impl Into<String>) -> Self {
        ProvisionError::PatchAmbiguity {
            path: path.to_path_buf(),
            line,
            reason: reason.into(),
        }
    }
}
