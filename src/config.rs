use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GearError;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_MANIFEST_PATH: &str = "manifest.json";

/// Gear `config.json` as written by the platform before a run.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub destination: Option<DestinationEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DestinationEntry {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GearManifest {
    pub label: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub log_level: LogLevel,
    pub dry_run: bool,
    pub api_key: Option<String>,
    pub destination_id: Option<String>,
    pub options: Map<String, Value>,
}

impl ResolvedConfig {
    /// Comma or whitespace separated list stored under `key`.
    pub fn option_list(&self, key: &str) -> Vec<String> {
        match self.options.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(text)) => text
                .split(|ch: char| ch == ',' || ch.is_whitespace())
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `given` when non-empty, otherwise the list stored under `key`.
    pub fn list_or_option(&self, given: Vec<String>, key: &str) -> Vec<String> {
        if given.is_empty() {
            self.option_list(key)
        } else {
            given
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GearError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };

        if path.is_none() && !config_path.exists() {
            return Err(GearError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GearError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GearError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let log_level = match config.config.get("gear-log-level").and_then(Value::as_str) {
            Some(level) if level.eq_ignore_ascii_case("debug") => LogLevel::Debug,
            _ => LogLevel::Info,
        };
        let dry_run = config
            .config
            .get("gear-dry-run")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let api_key = config
            .inputs
            .get("api-key")
            .and_then(|input| input.get("key"))
            .and_then(Value::as_str)
            .map(str::to_string);

        ResolvedConfig {
            log_level,
            dry_run,
            api_key,
            destination_id: config.destination.map(|destination| destination.id),
            options: config.config,
        }
    }

    pub fn manifest(path: Option<&str>) -> Result<GearManifest, GearError> {
        let manifest_path = PathBuf::from(path.unwrap_or(DEFAULT_MANIFEST_PATH));
        let content = fs::read_to_string(&manifest_path)
            .map_err(|_| GearError::ConfigRead(manifest_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| GearError::ConfigParse(err.to_string()))
    }
}
