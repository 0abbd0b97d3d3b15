//! Configuration management.
//!
//! Settings live in `~/.pulse/config.yaml`. A missing file means all
//! defaults; a present file only needs the keys it wants to override.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::api::DEFAULT_API_URL;

/// Default seconds between periodic daemon flushes.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 120;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend endpoint.
    pub api_url: String,

    /// Where queued records are buffered.
    pub offline_store: PathBuf,

    /// Seconds between periodic daemon flushes.
    pub flush_interval_secs: u64,

    /// Stable identifier for this machine, minted on first use.
    pub machine_id: Option<String>,

    /// Whether to store the identity token in the OS keychain.
    pub use_keychain: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            offline_store: default_store_path(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            machine_id: None,
            use_keychain: true,
        }
    }
}

impl Config {
    /// Loads the config file, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_saphyr::from_str(&contents)
            .with_context(|| format!("Invalid config file at {}", path.display()))
    }

    /// Saves the config file.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Write to a temp file first, then rename for atomicity
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, self.to_yaml())
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }

    fn to_yaml(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("api_url: {}\n", self.api_url));
        out.push_str(&format!("offline_store: {}\n", self.offline_store.display()));
        out.push_str(&format!("flush_interval_secs: {}\n", self.flush_interval_secs));
        if let Some(machine_id) = &self.machine_id {
            out.push_str(&format!("machine_id: {}\n", machine_id));
        }
        out.push_str(&format!("use_keychain: {}\n", self.use_keychain));
        out
    }

    /// Looks up a setting by key for `pulse config get`.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "api_url" => Some(self.api_url.clone()),
            "offline_store" => Some(self.offline_store.display().to_string()),
            "flush_interval_secs" => Some(self.flush_interval_secs.to_string()),
            "machine_id" => self.machine_id.clone(),
            "use_keychain" => Some(self.use_keychain.to_string()),
            _ => None,
        }
    }

    /// Updates a setting by key for `pulse config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "api_url" => self.api_url = value.trim_end_matches('/').to_string(),
            "offline_store" => self.offline_store = PathBuf::from(value),
            "flush_interval_secs" => {
                self.flush_interval_secs = value
                    .parse()
                    .with_context(|| format!("'{value}' is not a number of seconds"))?;
            }
            "machine_id" => self.machine_id = Some(value.to_string()),
            "use_keychain" => {
                self.use_keychain = value
                    .parse()
                    .with_context(|| format!("'{value}' is not true or false"))?;
            }
            _ => bail!(
                "Unknown setting '{key}'. Known settings: api_url, offline_store, flush_interval_secs, machine_id, use_keychain"
            ),
        }
        Ok(())
    }

    /// Returns the machine id, minting and persisting one on first use.
    pub fn ensure_machine_id(&mut self) -> Result<String> {
        if let Some(id) = &self.machine_id {
            return Ok(id.clone());
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        self.machine_id = Some(id.clone());
        self.save().context("Failed to persist machine id")?;
        Ok(id)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(pulse_dir()?.join("config.yaml"))
    }
}

/// The pulse state directory, `~/.pulse`.
pub fn pulse_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".pulse"))
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".pulse")
        .join("offline.jsonl")
}
