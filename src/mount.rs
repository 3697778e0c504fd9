//! Mount session for the target's root partition.
//!
//! [`MountSession`] owns the mount for the duration of a run. It unmounts
//! on [`MountSession::release`] or, failing that, on drop, so every exit
//! path after a successful mount leaves the medium unmounted.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::device::Partition;
use crate::error::{ProvisionError, Result};

pub trait Mounter {
    fn mount(&mut self, partition: &str, mount_point: &Path) -> Result<()>;
    fn unmount(&mut self, mount_point: &Path) -> Result<()>;
}

/// `mount(8)` and `umount(8)` on the host.
#[derive(Debug, Default)]
pub struct SystemMounter;

fn command_detail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    format!("{} {}", stdout.trim(), stderr.trim()).trim().to_string()
}

impl Mounter for SystemMounter {
    fn mount(&mut self, partition: &str, mount_point: &Path) -> Result<()> {
        let mount_error = |detail: String| ProvisionError::Mount {
            partition: partition.to_string(),
            mount_point: mount_point.to_path_buf(),
            detail,
        };
        let output = Command::new("mount")
            .arg(partition)
            .arg(mount_point)
            .output()
            .map_err(|e| mount_error(e.to_string()))?;
        if !output.status.success() {
            return Err(mount_error(command_detail(&output)));
        }
        Ok(())
    }

    fn unmount(&mut self, mount_point: &Path) -> Result<()> {
        let unmount_error = |detail: String| ProvisionError::Unmount {
            mount_point: mount_point.to_path_buf(),
            detail,
        };
        let output = Command::new("umount")
            .arg(mount_point)
            .output()
            .map_err(|e| unmount_error(e.to_string()))?;
        if !output.status.success() {
            return Err(unmount_error(command_detail(&output)));
        }
        Ok(())
    }
}

pub struct MountSession<M: Mounter> {
    mounter: M,
    root: PathBuf,
    /// False when the partition was mounted before we came along.
    owned: bool,
    released: bool,
}

impl<M: Mounter> MountSession<M> {
    /// Mount `partition` at `mount_point`, creating the directory if needed.
    ///
    /// A partition the host already has mounted is used where it is and
    /// left mounted afterwards.
    pub fn acquire(mut mounter: M, partition: &Partition, mount_point: &Path) -> Result<Self> {
        if let Some(existing) = &partition.mountpoint {
            info!(
                partition = %partition.path,
                mount_point = %existing.display(),
                "partition already mounted, reusing"
            );
            return Ok(Self {
                mounter,
                root: existing.clone(),
                owned: false,
                released: false,
            });
        }

        fs::create_dir_all(mount_point).map_err(|e| ProvisionError::io(mount_point, e))?;
        mounter.mount(&partition.path, mount_point)?;
        info!(partition = %partition.path, mount_point = %mount_point.display(), "mounted");
        Ok(Self {
            mounter,
            root: mount_point.to_path_buf(),
            owned: true,
            released: false,
        })
    }

    /// Root of the mounted tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn owned(&self) -> bool {
        self.owned
    }

    /// Unmount now and report the outcome.
    pub fn release(mut self) -> Result<()> {
        self.unmount()
    }

    fn unmount(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if !self.owned {
            return Ok(());
        }
        self.mounter.unmount(&self.root)?;
        info!(mount_point = %self.root.display(), "unmounted");
        Ok(())
    }
}

impl<M: Mounter> Drop for MountSession<M> {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            warn!(error = %e, "unmount during cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default, Clone)]
    struct RecordingMounter {
        calls: Rc<RefCell<Vec<String>>>,
        fail_unmount: bool,
    }

    impl Mounter for RecordingMounter {
        fn mount(&mut self, partition: &str, mount_point: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("mount {} {}", partition, mount_point.display()));
            Ok(())
        }

        fn unmount(&mut self, mount_point: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("umount {}", mount_point.display()));
            if self.fail_unmount {
                return Err(ProvisionError::Unmount {
                    mount_point: mount_point.to_path_buf(),
                    detail: "target is busy".to_string(),
                });
            }
            Ok(())
        }
    }

    fn partition(mountpoint: Option<&str>) -> Partition {
        Partition {
            path: "/dev/sda2".to_string(),
            mountpoint: mountpoint.map(PathBuf::from),
        }
    }

    #[test]
    fn test_release_unmounts() {
        let temp = TempDir::new().unwrap();
        let mount_point = temp.path().join("mnt/root");
        let mounter = RecordingMounter::default();
        let calls = mounter.calls.clone();

        let session = MountSession::acquire(mounter, &partition(None), &mount_point).unwrap();
        assert!(mount_point.is_dir());
        assert_eq!(session.root(), mount_point);
        session.release().unwrap();

        let expected = vec![
            format!("mount /dev/sda2 {}", mount_point.display()),
            format!("umount {}", mount_point.display()),
        ];
        assert_eq!(*calls.borrow(), expected);
    }

    #[test]
    fn test_drop_unmounts_once() {
        let temp = TempDir::new().unwrap();
        let mounter = RecordingMounter::default();
        let calls = mounter.calls.clone();

        {
            let _session = MountSession::acquire(mounter, &partition(None), temp.path()).unwrap();
        }

        assert_eq!(calls.borrow().len(), 2);
        assert!(calls.borrow()[1].starts_with("umount"));
    }

    #[test]
    fn test_premounted_partition_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let mounter = RecordingMounter::default();
        let calls = mounter.calls.clone();

        let session = MountSession::acquire(
            mounter,
            &partition(Some("/media/armbi_root")),
            temp.path(),
        )
        .unwrap();

        assert!(!session.owned());
        assert_eq!(session.root(), Path::new("/media/armbi_root"));
        session.release().unwrap();
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_release_reports_unmount_failure() {
        let temp = TempDir::new().unwrap();
        let mounter = RecordingMounter {
            fail_unmount: true,
            ..Default::default()
        };
        let calls = mounter.calls.clone();

        let session = MountSession::acquire(mounter, &partition(None), temp.path()).unwrap();
        let err = session.release().unwrap_err();

        assert!(matches!(err, ProvisionError::Unmount { .. }));
        // Drop after a failed release does not try again.
        assert_eq!(calls.borrow().len(), 2);
    }
}
