//! Applies every configured mutation to a target root.
//!
//! [`apply`] is the single entry point the binary calls once the tree is
//! available. It knows nothing about devices or prompts: everything it
//! needs arrives in the [`ProvisionRequest`] and the config, and everything
//! it did comes back in the [`ProvisionReport`].

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::backup::{BackupRecord, BackupSet};
use crate::config::ProvisionConfig;
use crate::error::Result;
use crate::executor::files::WriteOutcome;
use crate::executor::system::{self, LocaleOutcome, TimezoneOutcome};
use crate::executor::systemd::{self, OVERRIDE_FILE, WAIT_ONLINE_UNIT};
use crate::executor::users::{self, AccountSpec, UserOutcome};
use crate::network::{self, NetworkOutcome, WifiSettings};
use crate::payload::{self, PayloadOutcome};

/// A login user with an already hashed password.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountRequest {
    pub username: String,
    pub password_hash: String,
}

impl fmt::Debug for AccountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRequest")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// The operator's answers, validated and with passwords hashed.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub wifi: WifiSettings,
    pub root_password_hash: Option<String>,
    pub account: Option<AccountRequest>,
    pub timezone: Option<String>,
    pub locale: Option<String>,
}

impl ProvisionRequest {
    pub fn new(wifi: WifiSettings) -> Self {
        Self {
            wifi,
            root_password_hash: None,
            account: None,
            timezone: None,
            locale: None,
        }
    }
}

impl fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("wifi", &self.wifi)
            .field("root_password", &self.root_password_hash.is_some())
            .field("account", &self.account)
            .field("timezone", &self.timezone)
            .field("locale", &self.locale)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub root: PathBuf,
    pub network: NetworkOutcome,
    pub wait_online: Option<WriteOutcome>,
    pub payload: Option<PayloadOutcome>,
    pub root_password: Option<WriteOutcome>,
    pub user: Option<UserOutcome>,
    pub home_created: bool,
    pub first_login_removed: Vec<PathBuf>,
    pub timezone: Option<TimezoneOutcome>,
    pub locale: Option<LocaleOutcome>,
    pub backups: Vec<BackupRecord>,
}

impl ProvisionReport {
    /// One human-readable line per mutation.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "wifi: {} ({} patch, block {}, file {})",
            self.network.path.display(),
            self.network.strategy.label(),
            self.network.block.label(),
            self.network.write.label()
        )];
        if let Some(outcome) = self.wait_online {
            lines.push(format!("wait-online override: {}", outcome.label()));
        }
        if let Some(payload) = &self.payload {
            lines.push(format!(
                "ip-blink: script {}, unit {}, {}",
                payload.script.label(),
                payload.unit.label(),
                payload.enable.label()
            ));
        }
        if let Some(outcome) = self.root_password {
            lines.push(format!("root password: {}", outcome.label()));
        }
        if let Some(user) = &self.user {
            lines.push(format!(
                "user {}: uid {} gid {} ({}{})",
                user.username,
                user.uid,
                user.gid,
                if user.created { "created" } else { "updated" },
                if self.home_created { ", home created" } else { "" }
            ));
        }
        for path in &self.first_login_removed {
            lines.push(format!("removed first-login marker {}", path.display()));
        }
        if let Some(tz) = &self.timezone {
            let link = match &tz.localtime {
                Some(outcome) => outcome.label(),
                None => "localtime not linked",
            };
            lines.push(format!("timezone: {} ({})", tz.timezone_file.label(), link));
        }
        if let Some(locale) = &self.locale {
            lines.push(format!(
                "locale: locale.gen {}, default {}",
                locale.locale_gen.label(),
                locale.default_locale.label()
            ));
        }
        for record in &self.backups {
            lines.push(format!("backup: {}", record.backup.display()));
        }
        lines
    }
}

/// Apply `request` to the tree at `root` as `config` describes.
///
/// Every artifact is backed up once before its first change. An error stops
/// the run; artifacts already written stay written, with their backups.
pub fn apply(root: &Path, config: &ProvisionConfig, request: &ProvisionRequest) -> Result<ProvisionReport> {
    let mut backups = BackupSet::new();
    info!(root = %root.display(), ?request, "provisioning");

    let network = network::configure_wifi(
        &root.join(&config.network.netplan_file),
        &request.wifi,
        config.network.strategy,
        &mut backups,
    )?;

    let wait_online = if config.network.wait_online_override {
        let content = systemd::wait_online_override(
            config.network.wait_online_timeout,
            request.wifi.interface(),
        );
        Some(systemd::write_override(
            root,
            WAIT_ONLINE_UNIT,
            OVERRIDE_FILE,
            &content,
            &mut backups,
        )?)
    } else {
        None
    };

    let payload = if config.service.enabled {
        Some(payload::install(root, &config.service, &mut backups)?)
    } else {
        debug!("ip-blink service disabled");
        None
    };

    let root_password = match &request.root_password_hash {
        Some(hash) => Some(users::set_password(
            root,
            "root",
            hash,
            users::days_since_epoch(),
            &mut backups,
        )?),
        None => None,
    };

    let mut user = None;
    let mut home_created = false;
    let mut first_login_removed = Vec::new();
    if let Some(requested) = &request.account {
        let account = AccountSpec {
            username: requested.username.clone(),
            password_hash: requested.password_hash.clone(),
            shell: config.accounts.shell.clone(),
            first_uid: config.accounts.first_uid,
            groups: config.accounts.groups.clone(),
        };
        let outcome = users::ensure_user(root, &account, &mut backups)?;
        home_created = users::ensure_home(root, &outcome)?;
        if config.accounts.disable_first_login {
            first_login_removed = system::disable_first_login(root, &mut backups)?;
        }
        user = Some(outcome);
    }

    let timezone = match &request.timezone {
        Some(tz) => Some(system::set_timezone(root, tz, &mut backups)?),
        None => None,
    };
    let locale = match &request.locale {
        Some(locale) => Some(system::set_locale(root, locale, &mut backups)?),
        None => None,
    };

    let report = ProvisionReport {
        root: root.to_path_buf(),
        network,
        wait_online,
        payload,
        root_password,
        user,
        home_created,
        first_login_removed,
        timezone,
        locale,
        backups: backups.records().cloned().collect(),
    };
    info!(backups = report.backups.len(), "provisioning complete");
    Ok(report)
}
