use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaccyError};
use crate::scorer::ScoreWeights;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_data_dir_string")]
    pub data_dir: String,
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
    /// Scaled confidence an external classifier's suggestion needs to be accepted.
    #[serde(default = "default_classifier_min_confidence")]
    pub classifier_min_confidence: f64,
    #[serde(default)]
    pub score_weights: ScoreWeights,
    /// Extra weight an unresolved transaction carries in the batch quality score.
    #[serde(default = "default_unresolved_penalty")]
    pub unresolved_penalty: f64,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_acceptance_threshold() -> f64 {
    0.7
}

fn default_classifier_min_confidence() -> f64 {
    0.5
}

fn default_unresolved_penalty() -> f64 {
    0.5
}

fn default_classifier_timeout_ms() -> u64 {
    10_000
}

fn default_workers() -> usize {
    1
}

fn default_data_dir_string() -> String {
    default_data_dir().to_string_lossy().to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir_string(),
            acceptance_threshold: default_acceptance_threshold(),
            classifier_min_confidence: default_classifier_min_confidence(),
            score_weights: ScoreWeights::default(),
            unresolved_penalty: default_unresolved_penalty(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            workers: default_workers(),
        }
    }
}

impl Settings {
    pub fn classifier_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.classifier_timeout_ms)
    }

    /// Location of the pattern and ontology database.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("waccy.db")
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("waccy")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waccy")
}

/// Load settings from the default location, falling back to defaults if the file is missing or unreadable.
pub fn load_settings() -> Settings {
    let path = settings_path();
    if !path.exists() {
        return Settings::default();
    }
    match load_settings_from(&path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Ignoring settings at {}: {e}", path.display());
            Settings::default()
        }
    }
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| WaccyError::Settings(e.to_string()))
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(settings, &settings_path())
}

pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| WaccyError::Settings(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}
