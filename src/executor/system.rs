//! System settings of the target image: timezone, locale and the Armbian
//! first-login wizard.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::files::{ensure_file, read_optional, remove_if_present, WriteOutcome};
use super::systemd::{enable_link, EnableOutcome};
use crate::backup::BackupSet;
use crate::error::{ProvisionError, Result};

pub const ZONEINFO_DIR: &str = "usr/share/zoneinfo";
pub const LOCALE_GEN: &str = "etc/locale.gen";
pub const DEFAULT_LOCALE: &str = "etc/default/locale";

/// Files whose presence starts Armbian's interactive first-login setup.
pub const FIRST_LOGIN_MARKERS: [&str; 2] = [
    "root/.not_logged_in_yet",
    "etc/profile.d/armbian-check-first-login.sh",
];

pub fn validate_timezone(tz: &str) -> Result<()> {
    let charset_ok = tz
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '/'));
    if tz.is_empty() || !charset_ok || tz.starts_with('/') || tz.split('/').any(|p| p.is_empty() || p == "..") {
        return Err(ProvisionError::validation(
            "timezone",
            format!("'{}' is not a zone name like Europe/London", tz),
        ));
    }
    Ok(())
}

pub fn validate_locale(locale: &str) -> Result<()> {
    let valid = !locale.is_empty()
        && locale
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::validation(
            "locale",
            format!("'{}' is not a locale name like en_US.UTF-8", locale),
        ))
    }
}

fn mode_or(path: &Path, default: u32) -> u32 {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimezoneOutcome {
    pub timezone_file: WriteOutcome,
    /// `None` when the image has no zone file for the zone.
    pub localtime: Option<EnableOutcome>,
}

/// Write `etc/timezone` and point `etc/localtime` at the zone file.
pub fn set_timezone(root: &Path, tz: &str, backups: &mut BackupSet) -> Result<TimezoneOutcome> {
    validate_timezone(tz)?;
    let timezone_path = root.join("etc/timezone");
    let timezone_file = ensure_file(
        &timezone_path,
        &format!("{}\n", tz),
        mode_or(&timezone_path, 0o644),
        backups,
    )?;

    let zone = root.join(ZONEINFO_DIR).join(tz);
    let localtime = if zone.is_file() {
        let target = Path::new("/").join(ZONEINFO_DIR).join(tz);
        Some(enable_link(&root.join("etc/localtime"), &target, backups)?)
    } else {
        warn!(zone = %zone.display(), "zone file missing in image, leaving etc/localtime alone");
        None
    };

    info!(timezone = tz, "timezone set");
    Ok(TimezoneOutcome {
        timezone_file,
        localtime,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleOutcome {
    pub locale_gen: WriteOutcome,
    pub default_locale: WriteOutcome,
}

/// `locale.gen` content with `locale` enabled.
///
/// The first line naming the locale, commented out or not, becomes
/// `<locale> UTF-8`; without one the line is appended.
pub fn enable_in_locale_gen(text: &str, locale: &str) -> String {
    let wanted = format!("{} UTF-8", locale);
    let names_locale = |line: &str| {
        line.trim_start()
            .trim_start_matches('#')
            .split_whitespace()
            .next()
            == Some(locale)
    };

    let mut lines: Vec<&str> = text.lines().collect();
    match lines.iter().position(|line| names_locale(line)) {
        Some(index) => lines[index] = &wanted,
        None => lines.push(&wanted),
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Enable `locale` for generation and make it the default `LANG`.
pub fn set_locale(root: &Path, locale: &str, backups: &mut BackupSet) -> Result<LocaleOutcome> {
    validate_locale(locale)?;

    let gen_path = root.join(LOCALE_GEN);
    let current = read_optional(&gen_path)?.unwrap_or_default();
    let locale_gen = ensure_file(
        &gen_path,
        &enable_in_locale_gen(&current, locale),
        mode_or(&gen_path, 0o644),
        backups,
    )?;

    let default_path = root.join(DEFAULT_LOCALE);
    let default_locale = ensure_file(
        &default_path,
        &format!("LANG=\"{}\"\n", locale),
        mode_or(&default_path, 0o644),
        backups,
    )?;

    info!(locale, "locale set");
    Ok(LocaleOutcome {
        locale_gen,
        default_locale,
    })
}

/// Remove the first-login markers, backing each up first.
///
/// Returns the markers that were present.
pub fn disable_first_login(root: &Path, backups: &mut BackupSet) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for marker in FIRST_LOGIN_MARKERS {
        let path = root.join(marker);
        if !path.is_file() {
            continue;
        }
        backups.ensure(&path)?;
        if remove_if_present(&path)? {
            removed.push(path);
        }
    }
    Ok(removed)
}
