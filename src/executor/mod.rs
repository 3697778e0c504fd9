//! Mutations applied to the mounted target root.
//!
//! Every operation takes the target root (or a path under it) and a
//! [`BackupSet`](crate::backup::BackupSet), converges the artifact to the
//! desired state and reports whether anything changed. Running an operation
//! twice leaves the target identical to running it once.

pub mod directories;
pub mod files;
pub mod system;
pub mod systemd;
pub mod users;
