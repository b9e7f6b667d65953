use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = ".wool.toml";
pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse event payload: {0}")]
    EventPayload(#[from] serde_json::Error),

    #[error("missing environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid pull request number: {0:?}")]
    InvalidPrNumber(String),

    #[error("Event payload is missing {0}")]
    IncompletePayload(&'static str),

    #[error("Comment was not made on a pull request")]
    NotAPullRequest,
}

/// Snapshot of the CI environment, captured once at startup.
///
/// Nothing else in the crate reads the process environment; tests build one
/// from literal pairs instead.
#[derive(Debug, Clone, Default)]
pub struct CiEnv {
    vars: HashMap<String, String>,
}

impl CiEnv {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of a variable, treating empty strings as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Top-level configuration loaded from .wool.toml.
/// Every field has a default, so the bot runs with no config file at all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub formatter: FormatterConfig,

    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN.
    pub token: Option<String>,
    /// API root used when there is no event payload to derive URLs from.
    pub api_url: Option<String>,
    /// Context label of the commit status.
    pub status_context: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: None,
            status_context: "wool".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub command: String,
    /// Only changed files ending in this suffix are checked.
    pub extension: String,
    pub check_args: Vec<String>,
    pub apply_args: Vec<String>,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            command: "black".to_string(),
            extension: ".py".to_string(),
            check_args: vec!["--diff".into(), "--quiet".into(), "-".into()],
            apply_args: vec!["--quiet".into(), "-".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Comment bodies (case-insensitive, exact match) that request a push.
    pub trigger_phrases: Vec<String>,
    pub commit_message: String,
    /// How many times to read the PR head back after pushing.
    pub settle_attempts: u32,
    /// Delay before the first read-back; doubles on every retry.
    pub settle_initial_delay_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            trigger_phrases: vec![
                "wool".to_string(),
                "black".to_string(),
                "please format my code".to_string(),
            ],
            commit_message: "Format Python files with black".to_string(),
            settle_attempts: 5,
            settle_initial_delay_ms: 1000,
        }
    }
}

impl PushConfig {
    pub fn settle_initial_delay(&self) -> Duration {
        Duration::from_millis(self.settle_initial_delay_ms)
    }
}

impl Config {
    /// Load configuration from the given path, or .wool.toml in the current
    /// directory. A missing default file yields `Config::default()`; a missing
    /// explicitly requested file is an error.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the GitHub token: config file value takes precedence,
    /// falls back to GITHUB_TOKEN.
    pub fn github_token(&self, env: &CiEnv) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| env.get("GITHUB_TOKEN").map(str::to_string))
    }

    /// API root for the no-payload path.
    pub fn api_url(&self, env: &CiEnv) -> String {
        self.github
            .api_url
            .clone()
            .or_else(|| env.get("GITHUB_API_URL").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}
