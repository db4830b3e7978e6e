use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api.bothub.studio/api";
pub const DEFAULT_UPDATE_INDEX_URL: &str = "https://crates.io/api/v1/crates/bothub-cli";
pub const CONFIG_DIR_ENV: &str = "BOTHUB_CONFIG_DIR";

/// Process-wide knobs. Defaults, then `<config_dir>/settings.toml`, then
/// `BOTHUB_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub check_updates: bool,
    #[serde(default = "default_update_index_url")]
    pub update_index_url: String,
    #[serde(default = "default_update_timeout_secs")]
    pub update_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub verify_token_expiry: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            poll_interval_secs: default_poll_interval_secs(),
            max_retries: default_max_retries(),
            check_updates: true,
            update_index_url: default_update_index_url(),
            update_timeout_secs: default_update_timeout_secs(),
            verify_token_expiry: true,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.into()
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

fn default_update_index_url() -> String {
    DEFAULT_UPDATE_INDEX_URL.into()
}

fn default_update_timeout_secs() -> u64 {
    2
}

pub fn load_settings(config_dir: &Utf8Path) -> Result<Settings> {
    let figment = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::file(config_dir.join("settings.toml")))
        .merge(Env::prefixed("BOTHUB_"));
    figment
        .extract()
        .map_err(|err| CliError::ImproperlyConfigured(format!("invalid settings: {err}")))
}

/// `$BOTHUB_CONFIG_DIR`, or `~/.bothub`.
pub fn resolve_config_dir() -> Result<Utf8PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        let dir = dir.trim();
        if !dir.is_empty() {
            return Ok(Utf8PathBuf::from(dir));
        }
    }
    let dirs = BaseDirs::new().ok_or_else(|| {
        CliError::ImproperlyConfigured("unable to determine the home directory".into())
    })?;
    let home = Utf8PathBuf::from_path_buf(dirs.home_dir().to_path_buf()).map_err(|path| {
        CliError::ImproperlyConfigured(format!(
            "home directory is not valid UTF-8: {}",
            path.display()
        ))
    })?;
    Ok(home.join(".bothub"))
}
