use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use url::Url;

const APP_JSON: &str = "app.json";
const SCHEDULING_JSON: &str = "scheduling.json";
const NOTIFICATIONS_JSON: &str = "notifications.json";
const EMAIL_API_KEY_ENV: &[&str] = &["TUTOR_SCHEDULE_EMAIL_API_KEY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanedBreakPolicy {
    /// Refuse the availability change while breaks depend on it.
    #[default]
    Block,
    /// Delete the dependent breaks, then apply the change.
    Cascade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppFile {
    app_name: String,
    timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulingFile {
    default_break_minutes: u16,
    enforce_availability_on_request: bool,
    #[serde(default)]
    orphaned_break_policy: OrphanedBreakPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationsFile {
    email_endpoint: Option<String>,
    in_app_enabled: bool,
}

/// Validated runtime settings assembled from the config files and environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub app_name: String,
    pub timezone: Tz,
    pub default_break_minutes: u16,
    pub enforce_availability_on_request: bool,
    pub orphaned_break_policy: OrphanedBreakPolicy,
    pub email_endpoint: Option<Url>,
    pub email_api_key: Option<String>,
    pub in_app_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Tutor Schedule".to_string(),
            timezone: Tz::UTC,
            default_break_minutes: 60,
            enforce_availability_on_request: true,
            orphaned_break_policy: OrphanedBreakPolicy::Block,
            email_endpoint: None,
            email_api_key: None,
            in_app_enabled: true,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Tutor Schedule",
                "timezone": "UTC"
            }),
        ),
        (
            SCHEDULING_JSON,
            serde_json::json!({
                "schema": 1,
                "defaultBreakMinutes": 60,
                "enforceAvailabilityOnRequest": true,
                "orphanedBreakPolicy": "block"
            }),
        ),
        (
            NOTIFICATIONS_JSON,
            serde_json::json!({
                "schema": 1,
                "emailEndpoint": null,
                "inAppEnabled": true
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T>(path: &Path) -> Result<T, InfraError>
where
    T: serde::de::DeserializeOwned,
{
    let value = read_config(path)?;
    serde_json::from_value(value)
        .map_err(|error| InfraError::InvalidConfig(format!("{}: {error}", path.display())))
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, InfraError> {
    load_settings_from_lookup(config_dir, |key| std::env::var(key).ok())
}

fn load_settings_from_lookup<F>(config_dir: &Path, lookup: F) -> Result<Settings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app: AppFile = read_typed(&config_dir.join(APP_JSON))?;
    let scheduling: SchedulingFile = read_typed(&config_dir.join(SCHEDULING_JSON))?;
    let notifications: NotificationsFile = read_typed(&config_dir.join(NOTIFICATIONS_JSON))?;

    let timezone = app
        .timezone
        .trim()
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", app.timezone)))?;
    if scheduling.default_break_minutes == 0 {
        return Err(InfraError::InvalidConfig(
            "defaultBreakMinutes must be > 0".to_string(),
        ));
    }
    let email_endpoint = notifications
        .email_endpoint
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            Url::parse(value)
                .map_err(|error| InfraError::InvalidConfig(format!("invalid emailEndpoint '{value}': {error}")))
        })
        .transpose()?;

    Ok(Settings {
        app_name: app.app_name.trim().to_string(),
        timezone,
        default_break_minutes: scheduling.default_break_minutes,
        enforce_availability_on_request: scheduling.enforce_availability_on_request,
        orphaned_break_policy: scheduling.orphaned_break_policy,
        email_endpoint,
        email_api_key: optional_lookup_value(&lookup, EMAIL_API_KEY_ENV),
        in_app_enabled: notifications.in_app_enabled,
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
