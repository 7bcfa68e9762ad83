use std::{
    fs,
    path::Path,
    time::Duration,
};

use client_core::{ClientConfig, DEFAULT_EVENT_CAPACITY};
use serde::Deserialize;
use shared::protocol::{CollectionPath, DEFAULT_COLLECTION_PATH};
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "pantry.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub collection_path: String,
    pub profile: String,
    pub bootstrap_token: Option<String>,
    /// Zero disables polling; only in-process writes are then pushed.
    pub poll_interval_ms: u64,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/pantry.db".into(),
            collection_path: DEFAULT_COLLECTION_PATH.into(),
            profile: "default".into(),
            bootstrap_token: None,
            poll_interval_ms: 1000,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Settings {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            collection_path: CollectionPath::new(self.collection_path.as_str()),
            bootstrap_credential: self.bootstrap_token.clone(),
            event_capacity: self.event_capacity,
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    database_url: Option<String>,
    collection_path: Option<String>,
    profile: Option<String>,
    bootstrap_token: Option<String>,
    poll_interval_ms: Option<u64>,
    event_capacity: Option<usize>,
}

pub fn load_settings(config_file: &Path) -> Settings {
    load_settings_from(config_file, |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file if present, then `PANTRY_*`, then `APP__*`.
pub fn load_settings_from(
    config_file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_file) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, file_cfg),
            Err(err) => warn!(path = %config_file.display(), "config: ignoring malformed file: {err}"),
        }
    }

    for prefix in ["PANTRY_", "APP__"] {
        let var = |name: &str| env(&format!("{prefix}{name}"));
        if let Some(v) = var("DATABASE_URL") {
            settings.database_url = v;
        }
        if let Some(v) = var("COLLECTION_PATH") {
            settings.collection_path = v;
        }
        if let Some(v) = var("PROFILE") {
            settings.profile = v;
        }
        if let Some(v) = var("BOOTSTRAP_TOKEN") {
            settings.bootstrap_token = Some(v);
        }
        if let Some(v) = var("POLL_INTERVAL_MS") {
            match v.parse::<u64>() {
                Ok(parsed) => settings.poll_interval_ms = parsed,
                Err(_) => warn!(value = %v, "config: {prefix}POLL_INTERVAL_MS is not a number"),
            }
        }
        if let Some(v) = var("EVENT_CAPACITY") {
            match v.parse::<usize>() {
                Ok(parsed) => settings.event_capacity = parsed,
                Err(_) => warn!(value = %v, "config: {prefix}EVENT_CAPACITY is not a number"),
            }
        }
    }

    settings.bootstrap_token = settings
        .bootstrap_token
        .filter(|token| !token.trim().is_empty());
    settings
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.collection_path {
        settings.collection_path = v;
    }
    if let Some(v) = file_cfg.profile {
        settings.profile = v;
    }
    if let Some(v) = file_cfg.bootstrap_token {
        settings.bootstrap_token = Some(v);
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = file_cfg.event_capacity {
        settings.event_capacity = v;
    }
}

/// Accepts bare file paths and `sqlite:` shorthands; blank falls back to the default.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
