//! Netplan wifi configuration on top of the two document patchers.
//!
//! The tree written is always the same shape:
//!
//! ```yaml
//! network:
//!   version: 2
//!   renderer: networkd
//!   wifis:
//!     <interface>:
//!       dhcp4: true
//!       access-points:
//!         "<ssid>":
//!           password: "<password>"
//! ```
//!
//! The interface block is replaced as a whole, so keys a user added next to
//! `access-points` do not survive a re-run.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

use crate::backup::BackupSet;
use crate::document::structured;
use crate::document::text::{patch_block, PatchOutcome};
use crate::error::{ProvisionError, Result};
use crate::executor::files::{ensure_file, read_optional, WriteOutcome};

/// Netplan file written inside the target root.
pub const NETPLAN_FILE: &str = "etc/netplan/30-wifis-dhcp.yaml";
pub const DEFAULT_INTERFACE: &str = "wlan0";
/// netplan refuses to stay quiet about world-readable configuration.
pub const NETPLAN_MODE: u32 = 0o600;

const WIFIS: [&str; 2] = ["network", "wifis"];

/// Check an SSID: not empty, no control characters, no quotes.
pub fn validate_ssid(ssid: &str) -> Result<()> {
    if ssid.is_empty() {
        return Err(ProvisionError::validation("SSID", "must not be empty"));
    }
    reject_structural("SSID", ssid)
}

/// Check a wifi password. Passphrases of any length and encoding pass, as
/// do 64-digit hex keys; only characters that break the document do not.
pub fn validate_password(password: &str) -> Result<()> {
    reject_structural("wifi password", password)
}

pub fn validate_interface(interface: &str) -> Result<()> {
    let valid = !interface.is_empty()
        && interface.len() <= 15
        && interface
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::validation(
            "interface",
            format!("'{}' is not a valid interface name", interface),
        ))
    }
}

/// Control characters and line breaks end a YAML scalar; quotes end the
/// quoted ones the line patcher writes.
fn reject_structural(field: &str, value: &str) -> Result<()> {
    if value.chars().any(char::is_control) {
        return Err(ProvisionError::validation(
            field,
            "control characters and line breaks are not allowed",
        ));
    }
    if value.contains(['"', '\'']) {
        return Err(ProvisionError::validation(
            field,
            "quote characters are not allowed",
        ));
    }
    Ok(())
}

/// Validated wifi credentials for one interface.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiSettings {
    interface: String,
    ssid: String,
    password: String,
}

impl std::fmt::Debug for WifiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiSettings")
            .field("interface", &self.interface)
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl WifiSettings {
    pub fn new(
        interface: impl Into<String>,
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let settings = Self {
            interface: interface.into(),
            ssid: ssid.into(),
            password: password.into(),
        };
        validate_interface(&settings.interface)?;
        validate_ssid(&settings.ssid)?;
        validate_password(&settings.password)?;
        Ok(settings)
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// `{dhcp4: true, access-points: {<ssid>: {password: <password>}}}`
    pub fn block(&self) -> Value {
        let mut ap = Mapping::new();
        ap.insert("password".into(), self.password.as_str().into());
        let mut access_points = Mapping::new();
        access_points.insert(self.ssid.as_str().into(), Value::Mapping(ap));
        let mut block = Mapping::new();
        block.insert("dhcp4".into(), Value::Bool(true));
        block.insert("access-points".into(), Value::Mapping(access_points));
        Value::Mapping(block)
    }
}

/// How the netplan document is edited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Structured when the existing document parses, text otherwise.
    #[default]
    Auto,
    /// Parse, merge, serialize. Comments are lost.
    Structured,
    /// Line patcher. Everything outside the touched blocks stays verbatim.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedStrategy {
    Structured,
    Text,
}

impl AppliedStrategy {
    pub fn label(self) -> &'static str {
        match self {
            AppliedStrategy::Structured => "structured",
            AppliedStrategy::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOutcome {
    pub path: PathBuf,
    pub strategy: AppliedStrategy,
    /// What happened to the interface block.
    pub block: PatchOutcome,
    pub write: WriteOutcome,
}

/// Apply `settings` with the line patcher.
///
/// Returns the new text and what happened to the interface block.
pub fn patch_text(text: &str, origin: &Path, settings: &WifiSettings) -> Result<(String, PatchOutcome)> {
    let (text, block) = patch_block(text, origin, &WIFIS, &settings.interface, &settings.block())?;
    // Inserted as first children, so version ends up above renderer.
    let (text, _) = patch_block(&text, origin, &["network"], "renderer", &Value::from("networkd"))?;
    let (text, _) = patch_block(&text, origin, &["network"], "version", &Value::from(2))?;
    Ok((text, block))
}

/// Apply `settings` by parse, merge and serialize.
///
/// A document that already holds the same tree is returned untouched so a
/// re-run does not reformat it.
pub fn patch_structured(
    text: &str,
    origin: &Path,
    settings: &WifiSettings,
) -> Result<(String, PatchOutcome)> {
    let doc = structured::parse(text, origin)?;
    let interface_path = ["network", "wifis", settings.interface.as_str()];
    let block_value = settings.block();

    let block = match structured::lookup(&doc, &interface_path) {
        Some(existing) if *existing == block_value => PatchOutcome::Unchanged,
        Some(_) => PatchOutcome::Replaced,
        None if doc.contains_key("network") => PatchOutcome::Inserted,
        None => PatchOutcome::Appended,
    };

    let merged = structured::merge(doc.clone(), &["network", "version"], Value::from(2));
    let merged = structured::merge(merged, &["network", "renderer"], Value::from("networkd"));
    let merged = structured::merge(merged, &interface_path, block_value);

    if merged == doc {
        return Ok((text.to_string(), PatchOutcome::Unchanged));
    }
    Ok((structured::serialize(&merged, origin)?, block))
}

/// Write `settings` into the netplan document at `path`.
///
/// A missing document counts as empty. The file is only written (and
/// backed up first) when its content or mode changes.
pub fn configure_wifi(
    path: &Path,
    settings: &WifiSettings,
    strategy: Strategy,
    backups: &mut BackupSet,
) -> Result<NetworkOutcome> {
    let current = read_optional(path)?.unwrap_or_default();

    let applied = match strategy {
        Strategy::Structured => AppliedStrategy::Structured,
        Strategy::Text => AppliedStrategy::Text,
        Strategy::Auto => match structured::parse(&current, path) {
            Ok(_) => AppliedStrategy::Structured,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "document does not parse, using line patcher");
                AppliedStrategy::Text
            }
        },
    };
    let (text, block) = match applied {
        AppliedStrategy::Structured => patch_structured(&current, path, settings)?,
        AppliedStrategy::Text => patch_text(&current, path, settings)?,
    };

    let write = ensure_file(path, &text, NETPLAN_MODE, backups)?;
    info!(
        path = %path.display(),
        interface = %settings.interface,
        strategy = applied.label(),
        block = block.label(),
        "wifi configured"
    );
    Ok(NetworkOutcome {
        path: path.to_path_buf(),
        strategy: applied,
        block,
        write,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_path_for;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const CONFIGURED: &str = "\
network:
  version: 2
  renderer: networkd
  wifis:
    wlan0:
      dhcp4: true
      access-points:
        \"old\":
          password: \"oldpass12\"
  ethernets:
    eth0:
      dhcp4: true
";

    fn origin() -> &'static Path {
        Path::new(NETPLAN_FILE)
    }

    fn settings(ssid: &str, password: &str) -> WifiSettings {
        WifiSettings::new("wlan0", ssid, password).unwrap()
    }

    fn password_of(doc: &Mapping, ssid: &str) -> Option<String> {
        structured::lookup(
            doc,
            &["network", "wifis", "wlan0", "access-points", ssid, "password"],
        )
        .and_then(Value::as_str)
        .map(str::to_string)
    }

    #[test]
    fn test_validate_ssid() {
        assert!(validate_ssid("home net").is_ok());
        assert!(validate_ssid(&"x".repeat(40)).is_ok());
        assert!(validate_ssid("Caf\u{e9} 5G").is_ok());
        assert!(validate_ssid("").is_err());
        assert!(validate_ssid("bad\"ssid").is_err());
        assert!(validate_ssid("it's").is_err());
        assert!(validate_ssid("tab\there").is_err());
        assert!(validate_ssid("two\nlines").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("p@ss1234").is_ok());
        assert!(validate_password("short").is_ok());
        assert!(validate_password("caf\u{e9}-latte \u{1f375}").is_ok());
        assert!(validate_password("quote\"inside").is_err());
        assert!(validate_password("it's").is_err());
        assert!(validate_password("line\r\nbreak").is_err());
    }

    #[test]
    fn test_raw_psk_is_accepted_and_written() {
        let psk = "0123456789abcdef".repeat(4);
        assert!(validate_password(&psk).is_ok());

        for patch in [patch_text, patch_structured] {
            let (text, _) = patch("", origin(), &settings("home", &psk)).unwrap();
            let doc = structured::parse(&text, origin()).unwrap();
            assert_eq!(password_of(&doc, "home").as_deref(), Some(psk.as_str()));
        }
    }

    #[test]
    fn test_unicode_passphrase_round_trips_through_both_patchers() {
        let wifi = settings("home", "m\u{f6}tley cr\u{fc}e \u{1f375}");
        for patch in [patch_text, patch_structured] {
            let (text, _) = patch("", origin(), &wifi).unwrap();
            let doc = structured::parse(&text, origin()).unwrap();
            assert_eq!(
                password_of(&doc, "home").as_deref(),
                Some("m\u{f6}tley cr\u{fc}e \u{1f375}")
            );
        }
    }

    #[test]
    fn test_settings_reject_bad_interface() {
        let err = WifiSettings::new("wlan0: x", "home", "p@ss1234").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation { .. }));
    }

    #[test]
    fn test_debug_hides_password() {
        let debug = format!("{:?}", settings("home", "p@ss1234"));
        assert!(!debug.contains("p@ss1234"));
    }

    #[test]
    fn test_scenario_empty_document() {
        for patch in [patch_text, patch_structured] {
            let (text, _) = patch("", origin(), &settings("home net", "p@ss1234")).unwrap();
            let doc = structured::parse(&text, origin()).unwrap();

            assert_eq!(password_of(&doc, "home net").as_deref(), Some("p@ss1234"));
            assert_eq!(
                structured::lookup(&doc, &["network", "version"]),
                Some(&Value::from(2))
            );
            assert_eq!(
                structured::lookup(&doc, &["network", "renderer"]),
                Some(&Value::from("networkd"))
            );
        }
    }

    #[test]
    fn test_scenario_old_ssid_is_replaced() {
        for patch in [patch_text, patch_structured] {
            let (text, block) = patch(CONFIGURED, origin(), &settings("new", "newpass12")).unwrap();

            assert_eq!(block, PatchOutcome::Replaced);
            assert!(!text.contains("old"));
            let doc = structured::parse(&text, origin()).unwrap();
            assert_eq!(password_of(&doc, "new").as_deref(), Some("newpass12"));
            assert!(structured::lookup(&doc, &["network", "ethernets", "eth0"]).is_some());
        }
    }

    #[test]
    fn test_strategies_are_equivalent() {
        let documents = [
            "",
            CONFIGURED,
            "network:\n  ethernets:\n    eth0:\n      dhcp4: true\n",
            "network:\n  version: 2\n  wifis:\n    wlan1:\n      dhcp4: false\n",
        ];
        let wifi = settings("Caf\u{e9} 5G: guest", "p@ss: 1234#x");

        for document in documents {
            let (text, _) = patch_text(document, origin(), &wifi).unwrap();
            let (structured_text, _) = patch_structured(document, origin(), &wifi).unwrap();

            assert_eq!(
                structured::parse(&text, origin()).unwrap(),
                structured::parse(&structured_text, origin()).unwrap(),
                "strategies disagree on {document:?}"
            );
        }
    }

    #[test]
    fn test_structured_rerun_keeps_text() {
        let wifi = settings("home", "p@ss1234");
        let (once, _) = patch_structured(CONFIGURED, origin(), &wifi).unwrap();
        let with_comment = format!("# keep me\n{once}");

        let (twice, block) = patch_structured(&with_comment, origin(), &wifi).unwrap();

        assert_eq!(block, PatchOutcome::Unchanged);
        assert_eq!(twice, with_comment);
    }

    #[test]
    fn test_configure_wifi_creates_private_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(NETPLAN_FILE);
        let mut backups = BackupSet::new();

        let outcome =
            configure_wifi(&path, &settings("home net", "p@ss1234"), Strategy::Auto, &mut backups)
                .unwrap();

        assert_eq!(outcome.write, WriteOutcome::Created);
        assert_eq!(outcome.strategy, AppliedStrategy::Structured);
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let doc = structured::parse(&fs::read_to_string(&path).unwrap(), &path).unwrap();
        assert_eq!(password_of(&doc, "home net").as_deref(), Some("p@ss1234"));
    }

    #[test]
    fn test_configure_wifi_backs_up_and_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(NETPLAN_FILE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, CONFIGURED).unwrap();
        let wifi = settings("new", "newpass12");

        let first = configure_wifi(&path, &wifi, Strategy::Text, &mut BackupSet::new()).unwrap();
        let second = configure_wifi(&path, &wifi, Strategy::Text, &mut BackupSet::new()).unwrap();

        assert_eq!(first.write, WriteOutcome::Updated);
        assert_eq!(second.write, WriteOutcome::Unchanged);
        assert_eq!(second.block, PatchOutcome::Unchanged);
        assert_eq!(fs::read_to_string(backup_path_for(&path)).unwrap(), CONFIGURED);
    }

    #[test]
    fn test_auto_falls_back_to_text_patcher() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("30-wifis-dhcp.yaml");
        // Duplicate keys are a YAML error but fine for the line patcher.
        fs::write(
            &path,
            "network:\n  wifis:\n    wlan0:\n      dhcp4: false\n  wifis:\n    wlan1:\n      dhcp4: false\n",
        )
        .unwrap();

        let outcome = configure_wifi(
            &path,
            &settings("home", "p@ss1234"),
            Strategy::Auto,
            &mut BackupSet::new(),
        )
        .unwrap();

        assert_eq!(outcome.strategy, AppliedStrategy::Text);
        assert_eq!(outcome.block, PatchOutcome::Replaced);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("  wifis:\n    wlan1:\n      dhcp4: false\n"));
    }

    #[test]
    fn test_strategy_from_config() {
        #[derive(Deserialize)]
        struct Holder {
            strategy: Strategy,
        }
        let holder: Holder = toml::from_str("strategy = \"text\"").unwrap();
        assert_eq!(holder.strategy, Strategy::Text);
    }
}
