//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

/// Top-level Parley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ParamsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Generation parameters sent with every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub policy: CachePolicy,
}

/// Which messages are marked as cacheable prefixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    None,
    /// Mark the last system block and the last history message.
    #[default]
    LastMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "parley_providers=trace").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ParleyError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| ParleyError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json5")
    }

    pub fn model_id(&self) -> String {
        self.params
            .as_ref()
            .and_then(|p| p.model_id.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn max_tokens(&self) -> u32 {
        self.params
            .as_ref()
            .and_then(|p| p.max_tokens)
            .unwrap_or(1024)
    }

    pub fn temperature(&self) -> f64 {
        self.params
            .as_ref()
            .and_then(|p| p.temperature)
            .unwrap_or(0.8)
    }

    pub fn top_p(&self) -> f64 {
        self.params.as_ref().and_then(|p| p.top_p).unwrap_or(0.9)
    }

    pub fn top_k(&self) -> u32 {
        self.params.as_ref().and_then(|p| p.top_k).unwrap_or(50)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache.as_ref().map(|c| c.policy).unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "params.top_k").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.max_tokens() == 0 {
            errors.push("params.max_tokens cannot be 0".to_string());
        }

        let temperature = self.temperature();
        if !(0.0..=1.0).contains(&temperature) {
            errors.push(format!(
                "params.temperature must be within 0.0..=1.0, got {temperature}"
            ));
        }

        let top_p = self.top_p();
        if !(0.0..=1.0).contains(&top_p) {
            errors.push(format!("params.top_p must be within 0.0..=1.0, got {top_p}"));
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown logging.format '{}', falling back to plain",
                    logging.format
                ));
            }
            if !matches!(logging.output.as_str(), "stderr" | "stdout") {
                warnings.push(format!(
                    "Unknown logging.output '{}', falling back to stderr",
                    logging.output
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Parley data: `~/.parley/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}
