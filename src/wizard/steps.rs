//! The provisioning questionnaire.
//!
//! Which steps exist depends on the config: device selection only when
//! there is a choice to make, root password, user, timezone and locale only
//! when enabled. Wifi is always last.

use std::fmt;

use super::{confirm_secret, menu_select, prompt_value, Prompter, StepDef, Transition};
use crate::config::ProvisionConfig;
use crate::device::RemovableDevice;
use crate::error::{ProvisionError, Result};
use crate::executor::system::{validate_locale, validate_timezone};
use crate::executor::users::{validate_username, HashFn};
use crate::network::{validate_password, validate_ssid, WifiSettings};
use crate::provision::{AccountRequest, ProvisionRequest};

const OTHER: &str = "Other";

/// Answers collected so far, in clear text.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct WizardState {
    pub device: Option<RemovableDevice>,
    pub root_password: Option<String>,
    pub account: Option<(String, String)>,
    pub timezone: Option<String>,
    pub locale: Option<String>,
    pub ssid: Option<String>,
    pub wifi_password: Option<String>,
}

impl fmt::Debug for WizardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WizardState")
            .field("device", &self.device)
            .field("root_password", &self.root_password.is_some())
            .field("account", &self.account.as_ref().map(|(user, _)| user))
            .field("timezone", &self.timezone)
            .field("locale", &self.locale)
            .field("ssid", &self.ssid)
            .finish_non_exhaustive()
    }
}

impl WizardState {
    /// Hash the passwords and validate everything into a request.
    pub fn into_request(self, config: &ProvisionConfig, hash: HashFn) -> Result<ProvisionRequest> {
        let (Some(ssid), Some(wifi_password)) = (self.ssid, self.wifi_password) else {
            return Err(ProvisionError::validation("wifi", "SSID and password are required"));
        };
        let mut request = ProvisionRequest::new(WifiSettings::new(
            config.network.interface.as_str(),
            ssid,
            wifi_password,
        )?);
        request.root_password_hash = self.root_password.as_deref().map(hash).transpose()?;
        request.account = match self.account {
            Some((username, password)) => Some(AccountRequest {
                password_hash: hash(&password)?,
                username,
            }),
            None => None,
        };
        request.timezone = self.timezone;
        request.locale = self.locale;
        Ok(request)
    }
}

/// Login passwords end up hashed, so only line breaks are a problem.
fn validate_login_password(password: &str) -> Result<()> {
    if password.chars().any(char::is_control) {
        return Err(ProvisionError::validation(
            "password",
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// Menu of `choices` plus "Other", which asks for free text.
fn choose_or_type(
    prompter: &mut dyn Prompter,
    choices: &[String],
    example: &str,
    validate: fn(&str) -> Result<()>,
) -> Result<Option<String>> {
    let mut options = choices.to_vec();
    options.push(OTHER.to_string());
    loop {
        let Some(index) = menu_select(prompter, &options, "Select an option: ")? else {
            return Ok(None);
        };
        if index < choices.len() {
            return Ok(Some(choices[index].clone()));
        }
        match prompt_value(prompter, &format!("Enter your {}: ", example), validate)? {
            Some(value) => return Ok(Some(value)),
            None => continue,
        }
    }
}

/// Build the step graph for `config`. An empty `devices` skips selection.
pub fn build_steps<'a>(
    config: &'a ProvisionConfig,
    devices: &'a [RemovableDevice],
) -> Vec<StepDef<'a, WizardState>> {
    let mut steps: Vec<StepDef<'a, WizardState>> = Vec::new();
    let previous = |steps: &Vec<StepDef<'a, WizardState>>| steps.len().checked_sub(1);

    if !devices.is_empty() {
        let back = previous(&steps);
        steps.push(StepDef::new("Select SD Card", back, move |p: &mut dyn Prompter, state: &mut WizardState| {
            let options: Vec<String> = devices.iter().map(|d| d.to_string()).collect();
            match menu_select(p, &options, "Select the SD card device to configure: ")? {
                Some(index) => {
                    state.device = Some(devices[index].clone());
                    Ok(Transition::Next)
                }
                None => Ok(Transition::Back),
            }
        }));
    }

    if config.accounts.set_root_password {
        let back = previous(&steps);
        steps.push(StepDef::new("Set Root Password", back, |p: &mut dyn Prompter, state: &mut WizardState| {
            match confirm_secret(p, validate_login_password)? {
                Some(password) => {
                    state.root_password = Some(password);
                    Ok(Transition::Next)
                }
                None => Ok(Transition::Back),
            }
        }));
    }

    if config.accounts.enabled {
        let back = previous(&steps);
        steps.push(StepDef::new("Create User", back, |p: &mut dyn Prompter, state: &mut WizardState| {
            let Some(username) = prompt_value(p, "Enter username: ", validate_username)? else {
                return Ok(Transition::Back);
            };
            // Back from the password returns to the username prompt.
            let Some(password) = confirm_secret(p, validate_login_password)? else {
                return Ok(Transition::Repeat);
            };
            state.account = Some((username, password));
            Ok(Transition::Next)
        }));
    }

    if config.timezone.enabled {
        let back = previous(&steps);
        steps.push(StepDef::new("Set Timezone", back, move |p: &mut dyn Prompter, state: &mut WizardState| {
            p.say("Available Timezones:");
            match choose_or_type(p, &config.timezone.choices, "timezone (e.g., Europe/London)", validate_timezone)? {
                Some(tz) => {
                    state.timezone = Some(tz);
                    Ok(Transition::Next)
                }
                None => Ok(Transition::Back),
            }
        }));
    }

    if config.locale.enabled {
        let back = previous(&steps);
        steps.push(StepDef::new("Set Locale", back, move |p: &mut dyn Prompter, state: &mut WizardState| {
            p.say("Available Locales:");
            match choose_or_type(p, &config.locale.choices, "locale (e.g., en_AU.UTF-8)", validate_locale)? {
                Some(locale) => {
                    state.locale = Some(locale);
                    Ok(Transition::Next)
                }
                None => Ok(Transition::Back),
            }
        }));
    }

    let back = previous(&steps);
    steps.push(StepDef::new("Configure WiFi", back, |p: &mut dyn Prompter, state: &mut WizardState| {
        let Some(ssid) = prompt_value(p, "Enter WiFi SSID: ", validate_ssid)? else {
            return Ok(Transition::Back);
        };
        let Some(password) = confirm_secret(p, validate_password)? else {
            return Ok(Transition::Repeat);
        };
        state.ssid = Some(ssid);
        state.wifi_password = Some(password);
        Ok(Transition::Next)
    }));

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::run_steps;
    use crate::wizard::testing::ScriptedPrompter;

    fn fake_hash(password: &str) -> Result<String> {
        Ok(format!("$6$test${}", password.len()))
    }

    fn devices() -> Vec<RemovableDevice> {
        vec![RemovableDevice {
            path: "/dev/sda".to_string(),
            model: "SD Reader".to_string(),
            transport: Some("usb".to_string()),
            size: "29.7G".to_string(),
        }]
    }

    fn run(config: &ProvisionConfig, devices: &[RemovableDevice], answers: &[&str]) -> (WizardState, ScriptedPrompter) {
        let steps = build_steps(config, devices);
        let mut prompter = ScriptedPrompter::new(answers);
        let mut state = WizardState::default();
        run_steps(&steps, &mut prompter, &mut state).unwrap();
        assert_eq!(prompter.remaining(), 0);
        (state, prompter)
    }

    #[test]
    fn test_wifi_only() {
        let mut config = ProvisionConfig::default();
        config.accounts.set_root_password = false;

        let (state, _) = run(&config, &[], &["HomeNet", "password1", "password1"]);

        assert_eq!(state.ssid.as_deref(), Some("HomeNet"));
        let request = state.into_request(&config, fake_hash).unwrap();
        assert_eq!(request.wifi.ssid(), "HomeNet");
        assert_eq!(request.wifi.interface(), "wlan0");
        assert!(request.root_password_hash.is_none());
    }

    #[test]
    fn test_invalid_ssid_is_asked_again() {
        let mut config = ProvisionConfig::default();
        config.accounts.set_root_password = false;

        let (state, prompter) = run(
            &config,
            &[],
            &["Bob's \"Net\"", "BobsNet", "pass\"word", "pass\"word", "short", "short"],
        );

        assert_eq!(state.ssid.as_deref(), Some("BobsNet"));
        assert_eq!(state.wifi_password.as_deref(), Some("short"));
        assert!(prompter.output.iter().any(|l| l.starts_with("invalid SSID")));
        assert!(prompter.output.iter().any(|l| l.starts_with("invalid wifi password")));
    }

    #[test]
    fn test_full_walk_with_back() {
        let mut config = ProvisionConfig::default();
        config.accounts.enabled = true;
        config.timezone.enabled = true;
        config.locale.enabled = true;

        let (state, prompter) = run(
            &config,
            &devices(),
            &[
                "1",               // device
                "back",            // root password: back to device
                "1",               // device again
                "rootpw", "rootpw",
                "pi", "userpw", "userpw",
                "6", "back",       // timezone: Other, then back to the menu
                "6", "Europe/Berlin",
                "2",               // locale en_GB
                "back",            // wifi: back to locale
                "3",               // locale de_DE
                "HomeNet", "password1", "password1",
            ],
        );

        assert_eq!(state.device.as_ref().map(|d| d.path.as_str()), Some("/dev/sda"));
        assert_eq!(state.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(state.locale.as_deref(), Some("de_DE.UTF-8"));
        let locale_headers = prompter
            .output
            .iter()
            .filter(|line| line.trim() == "--- Set Locale ---")
            .count();
        assert_eq!(locale_headers, 2, "locale step is shown again after back");

        let request = state.into_request(&config, fake_hash).unwrap();
        assert_eq!(request.root_password_hash.as_deref(), Some("$6$test$6"));
        let account = request.account.unwrap();
        assert_eq!(account.username, "pi");
        assert_eq!(account.password_hash, "$6$test$6");
    }

    #[test]
    fn test_back_from_user_password_repeats_user_step() {
        let mut config = ProvisionConfig::default();
        config.accounts.enabled = true;
        config.accounts.set_root_password = false;

        let (state, _) = run(
            &config,
            &[],
            &["pi", "back", "alice", "pw", "pw", "HomeNet", "password1", "password1"],
        );

        assert_eq!(state.account.map(|(user, _)| user).as_deref(), Some("alice"));
    }

    #[test]
    fn test_first_step_refuses_back() {
        let mut config = ProvisionConfig::default();
        config.accounts.set_root_password = false;

        let (_, prompter) = run(&config, &devices(), &["back", "1", "HomeNet", "password1", "password1"]);

        assert!(prompter
            .output
            .contains(&"Cannot go back from the first step.".to_string()));
    }

    #[test]
    fn test_incomplete_state_is_rejected() {
        let config = ProvisionConfig::default();
        assert!(WizardState::default().into_request(&config, fake_hash).is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let state = WizardState {
            root_password: Some("hunter22".to_string()),
            wifi_password: Some("password1".to_string()),
            account: Some(("pi".to_string(), "userpw".to_string())),
            ..Default::default()
        };
        let shown = format!("{:?}", state);
        assert!(!shown.contains("hunter22"));
        assert!(!shown.contains("password1"));
        assert!(!shown.contains("userpw"));
    }
}
