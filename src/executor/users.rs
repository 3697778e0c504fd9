//! Account provisioning: root password, a login user and its groups.
//!
//! Works on the record files of the target tree only. Nothing here touches
//! the accounts of the host running the provisioner.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use time::OffsetDateTime;
use tracing::{info, warn};

use super::directories::ensure_owned_dir;
use crate::backup::BackupSet;
use crate::error::{ProvisionError, Result};
use crate::executor::files::WriteOutcome;
use crate::records::{self, RecordEntry, RecordFile, RecordKind};

/// Supplementary groups a provisioned user joins unless configured otherwise.
pub const DEFAULT_GROUPS: [&str; 3] = ["sudo", "adm", "tty"];
pub const FIRST_UID: u32 = 1000;
pub const DEFAULT_SHELL: &str = "/bin/bash";
/// Groups that have to be created get an id from the system range.
pub const SYSTEM_GID_BASELINE: u32 = 100;
pub const HOME_MODE: u32 = 0o755;

/// Turns a clear-text password into a crypt(3) hash.
pub type HashFn = fn(&str) -> Result<String>;

/// Login names as accepted by `useradd` with its default `NAME_REGEX`.
pub fn validate_username(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if first_ok && rest_ok && name.len() <= 32 {
        Ok(())
    } else {
        Err(ProvisionError::validation(
            "username",
            format!(
                "'{}' must start with a lowercase letter or '_' and contain only [a-z0-9_-]",
                name
            ),
        ))
    }
}

/// SHA-512 crypt hash through the host's `openssl passwd -6`.
pub fn hash_password(password: &str) -> Result<String> {
    let failed = |detail: String| ProvisionError::Command {
        program: "openssl passwd".into(),
        detail,
    };

    let mut child = Command::new("openssl")
        .args(["passwd", "-6", "-stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| failed(err.to_string()))?;
    if let Some(mut stdin) = child.stdin.take() {
        writeln!(stdin, "{}", password).map_err(|err| failed(err.to_string()))?;
    }
    let output = child
        .wait_with_output()
        .map_err(|err| failed(err.to_string()))?;
    if !output.status.success() {
        return Err(failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !hash.starts_with("$6$") {
        return Err(failed(format!("unexpected output '{}'", hash)));
    }
    Ok(hash)
}

/// Days since 1970-01-01, the unit of the shadow "last change" field.
pub fn days_since_epoch() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp() / 86_400
}

fn record_path(root: &Path, kind: RecordKind) -> PathBuf {
    root.join(kind.relative_path())
}

/// Set the password hash and last-change day of an existing shadow entry.
pub fn set_password(
    root: &Path,
    user: &str,
    hash: &str,
    last_change_days: i64,
    backups: &mut BackupSet,
) -> Result<WriteOutcome> {
    let path = record_path(root, RecordKind::Shadow);
    let ((), outcome) = records::update(&path, RecordKind::Shadow, backups, |shadow| {
        shadow.update_field(user, 1, hash)?;
        shadow.update_field(user, 2, &last_change_days.to_string())?;
        Ok(())
    })?;
    info!(user, ?outcome, "password set");
    Ok(outcome)
}

fn numeric_field(file: &RecordFile, entry: &RecordEntry, index: usize) -> Result<u32> {
    let value = entry.field(index).unwrap_or_default();
    value.parse().map_err(|_| ProvisionError::Parse {
        path: file.path().to_path_buf(),
        reason: format!("'{}' has non-numeric id '{}'", entry.key(), value),
    })
}

/// A login user to provision.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub username: String,
    pub password_hash: String,
    pub shell: String,
    pub first_uid: u32,
    pub groups: Vec<String>,
}

impl std::fmt::Debug for AccountSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSpec")
            .field("username", &self.username)
            .field("shell", &self.shell)
            .field("first_uid", &self.first_uid)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl AccountSpec {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            shell: DEFAULT_SHELL.to_string(),
            first_uid: FIRST_UID,
            groups: DEFAULT_GROUPS.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn home(&self) -> String {
        format!("/home/{}", self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOutcome {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    /// False when the user was already in passwd and only refreshed.
    pub created: bool,
    pub home: String,
}

/// Make `account.username` a login user of the target tree.
///
/// A user that already exists keeps its ids; its password is refreshed and
/// missing group memberships are added. A new user gets the smallest free
/// uid at or above `first_uid` and a primary group of its own.
pub fn ensure_user(root: &Path, account: &AccountSpec, backups: &mut BackupSet) -> Result<UserOutcome> {
    validate_username(&account.username)?;
    let name = account.username.as_str();
    let home = account.home();

    let mut passwd = RecordFile::load(&record_path(root, RecordKind::Passwd), RecordKind::Passwd)?;
    let mut group = RecordFile::load(&record_path(root, RecordKind::Group), RecordKind::Group)?;

    let (uid, gid, created) = match passwd.get(name) {
        Some(entry) => (
            numeric_field(&passwd, entry, 2)?,
            numeric_field(&passwd, entry, 3)?,
            false,
        ),
        None => {
            let uid = passwd.allocate_id(2, account.first_uid);
            let gid = match group.get(name) {
                Some(entry) => numeric_field(&group, entry, 2)?,
                None => group.allocate_id(2, uid),
            };
            let (uid_text, gid_text) = (uid.to_string(), gid.to_string());
            passwd.append_entry(RecordEntry::new([
                name,
                "x",
                uid_text.as_str(),
                gid_text.as_str(),
                name,
                home.as_str(),
                account.shell.as_str(),
            ])?)?;
            (uid, gid, true)
        }
    };

    if !group.contains(name) {
        group.append_entry(RecordEntry::new([name, "x", gid.to_string().as_str(), ""])?)?;
    }
    for supplementary in &account.groups {
        group.add_member(supplementary, name, SYSTEM_GID_BASELINE)?;
    }

    passwd.save(backups)?;
    group.save(backups)?;

    let days = days_since_epoch().to_string();
    records::update(
        &record_path(root, RecordKind::Shadow),
        RecordKind::Shadow,
        backups,
        |shadow| {
            if shadow.contains(name) {
                shadow.update_field(name, 1, &account.password_hash)?;
                shadow.update_field(name, 2, &days)?;
                return Ok(());
            }
            shadow.append_entry(RecordEntry::new([
                name,
                account.password_hash.as_str(),
                days.as_str(),
                "0",
                "99999",
                "7",
                "",
                "",
                "",
            ])?)
        },
    )?;

    let gshadow_path = record_path(root, RecordKind::Gshadow);
    if gshadow_path.exists() {
        records::update(&gshadow_path, RecordKind::Gshadow, backups, |gshadow| {
            if !gshadow.contains(name) {
                gshadow.append_entry(RecordEntry::new([name, "!", "", ""])?)?;
            }
            for supplementary in &account.groups {
                gshadow.add_member(supplementary, name, SYSTEM_GID_BASELINE)?;
            }
            Ok(())
        })?;
    } else {
        warn!(path = %gshadow_path.display(), "no gshadow file, skipping");
    }

    if created {
        info!(user = name, uid, gid, "user created");
    } else {
        info!(user = name, uid, gid, "user already exists, refreshed password and groups");
    }
    Ok(UserOutcome {
        username: name.to_string(),
        uid,
        gid,
        created,
        home,
    })
}

/// Create the home directory of a provisioned user inside `root`.
pub fn ensure_home(root: &Path, user: &UserOutcome) -> Result<bool> {
    let relative = user.home.trim_start_matches('/');
    ensure_owned_dir(&root.join(relative), user.uid, user.gid, HOME_MODE)
}
