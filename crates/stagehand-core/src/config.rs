//! Engine configuration.
//!
//! [`EngineConfig`] holds the knobs the interpreter reads while running
//! (retry bound, keepalive threshold, sanitization pattern) plus the active
//! suite/module/platform context that composition actions override
//! temporarily. Persistent defaults live in `~/.stagehand/config.json`.
//!
//! # Example
//!
//! ```no_run
//! use stagehand_core::config::EngineConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let mut config = EngineConfig::load();
//! config.set("retries", serde_json::json!(5)).unwrap();
//! assert_eq!(config.retries, 5);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const CONFIG_FILENAME: &str = "config.json";

/// Strips zero-width and C0 control characters that some backends leak into labels.
pub const DEFAULT_SANITIZE_PATTERN: &str = r"[\x{200B}-\x{200D}\x{FEFF}\x{00}-\x{08}\x{0B}\x{0C}\x{0E}-\x{1F}]";

/// Returns the stagehand home directory (`~/.stagehand`).
pub fn stagehand_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".stagehand")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config key `{key}` expects {expected}")]
    InvalidValue { key: String, expected: &'static str },

    #[error("invalid sanitize pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where the asset being executed lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContext {
    pub suite: Option<String>,
    pub module: Option<String>,
    pub platform: Option<String>,
}

impl ModuleContext {
    /// Fills unset fields from `fallback`.
    pub fn or(self, fallback: &ModuleContext) -> ModuleContext {
        ModuleContext {
            suite: self.suite.or_else(|| fallback.suite.clone()),
            module: self.module.or_else(|| fallback.module.clone()),
            platform: self.platform.or_else(|| fallback.platform.clone()),
        }
    }
}

/// Runtime configuration for one execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tree-refresh rounds when an element cannot be found.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// `wait` actions longer than this refresh the tree every `keepalive_ms`.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,

    /// Maximum nesting of composition frames.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    /// Regex whose matches are removed from element name/label/value.
    #[serde(default = "default_sanitize_pattern", skip_serializing_if = "Option::is_none")]
    pub sanitize_pattern: Option<String>,

    /// Overrides the screen height used to derive visibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_height: Option<f64>,

    #[serde(default, flatten)]
    pub context: ModuleContext,

    /// Free-form keys set by `setConfig` actions.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_retries() -> u32 {
    3
}

fn default_keepalive_ms() -> u64 {
    20_000
}

fn default_max_call_depth() -> usize {
    64
}

fn default_sanitize_pattern() -> Option<String> {
    Some(DEFAULT_SANITIZE_PATTERN.to_string())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            keepalive_ms: default_keepalive_ms(),
            max_call_depth: default_max_call_depth(),
            sanitize_pattern: default_sanitize_pattern(),
            screen_height: None,
            context: ModuleContext::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load config from `~/.stagehand/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&stagehand_dir().join(CONFIG_FILENAME)).unwrap_or_default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Reads a key as JSON. Known keys are reported even when unset (as `null`).
    pub fn get(&self, key: &str) -> Option<Value> {
        let opt_str = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        match key {
            "retries" => Some(Value::from(self.retries)),
            "keepalive_ms" => Some(Value::from(self.keepalive_ms)),
            "max_call_depth" => Some(Value::from(self.max_call_depth)),
            "sanitize_pattern" => Some(opt_str(&self.sanitize_pattern)),
            "screen_height" => Some(self.screen_height.map(Value::from).unwrap_or(Value::Null)),
            "suite" => Some(opt_str(&self.context.suite)),
            "module" => Some(opt_str(&self.context.module)),
            "platform" => Some(opt_str(&self.context.platform)),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Writes a key. Known keys are type-checked; unknown keys are stored as-is.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        match key {
            "retries" => self.retries = as_u64(key, &value).and_then(|n| narrow(key, n))?,
            "keepalive_ms" => self.keepalive_ms = as_u64(key, &value)?,
            "max_call_depth" => self.max_call_depth = as_u64(key, &value).and_then(|n| narrow(key, n))?,
            "sanitize_pattern" => {
                let pattern = as_opt_string(key, value)?;
                if let Some(ref p) = pattern {
                    regex::Regex::new(p)?;
                }
                self.sanitize_pattern = pattern;
            }
            "screen_height" => {
                self.screen_height = match value {
                    Value::Null => None,
                    other => Some(other.as_f64().ok_or(ConfigError::InvalidValue {
                        key: key.to_string(),
                        expected: "a number",
                    })?),
                }
            }
            "suite" => self.context.suite = as_opt_string(key, value)?,
            "module" => self.context.module = as_opt_string(key, value)?,
            "platform" => self.context.platform = as_opt_string(key, value)?,
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn module_context(&self) -> &ModuleContext {
        &self.context
    }

    pub fn set_module_context(&mut self, context: ModuleContext) {
        self.context = context;
    }
}

fn as_u64(key: &str, value: &Value) -> Result<u64, ConfigError> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or(ConfigError::InvalidValue {
            key: key.to_string(),
            expected: "a non-negative integer",
        })
}

fn narrow<T: TryFrom<u64>>(key: &str, n: u64) -> Result<T, ConfigError> {
    T::try_from(n).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        expected: "a smaller integer",
    })
}

fn as_opt_string(key: &str, value: Value) -> Result<Option<String>, ConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            expected: "a string",
        }),
    }
}
