//! Backend configuration
//!
//! Loaded from an optional JSON file; connection details missing from the
//! file are filled from the environment using the same variable names the
//! rest of the monorepo's tooling reads.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

pub const URL_VARS: &[&str] = &["SUPABASE_URL", "CLI_SUPABASE_URL"];
pub const KEY_VARS: &[&str] = &["SUPABASE_SERVICE_ROLE_KEY", "SUPABASE_KEY", "CLI_SUPABASE_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("PostgREST backend not configured. Set SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY (or SUPABASE_KEY)")]
    NotConfigured,
    #[error("Missing environment variable: one of {0}")]
    MissingEnv(String),
    #[error("Invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid store `{0}` (expected postgrest|memory|file:PATH)")]
    InvalidStoreSpec(String),
    #[error("Could not build HTTP client: {0}")]
    Client(String),
}

/// Which backend holds the relations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StoreSpec {
    #[default]
    Postgrest,
    Memory,
    File(PathBuf),
}

impl StoreSpec {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "postgrest" | "supabase" => return Ok(Self::Postgrest),
            "memory" => return Ok(Self::Memory),
            _ => {}
        }
        match trimmed.strip_prefix("file:") {
            Some(path) if !path.is_empty() => Ok(Self::File(PathBuf::from(path))),
            _ => Err(ConfigError::InvalidStoreSpec(s.to_string())),
        }
    }
}

impl FromStr for StoreSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoreSpec {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StoreSpec> for String {
    fn from(value: StoreSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StoreSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSpec::Postgrest => f.write_str("postgrest"),
            StoreSpec::Memory => f.write_str("memory"),
            StoreSpec::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Connection details for a PostgREST (Supabase) endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgrestConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl fmt::Debug for PostgrestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgrestConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl PostgrestConfig {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            url: url.to_string(),
            api_key: api_key.to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve variables through `lookup`; the first non-empty one of each
    /// group wins.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
                .ok_or_else(|| ConfigError::MissingEnv(names.join(", ")))
        };
        let url = first(URL_VARS)?;
        let api_key = first(KEY_VARS)?;
        Ok(Self::new(&url, &api_key))
    }

    /// `{url}/rest/v1/`, ready for joining table names.
    pub fn rest_base(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason,
        };
        let mut base = Url::parse(self.url.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", base.scheme())));
        }
        let path = base.path().trim_end_matches('/').to_string();
        base.set_path(&format!("{path}/rest/v1/"));
        base.set_query(None);
        Ok(base)
    }
}

/// Configuration for opening a backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub store: StoreSpec,
    #[serde(default)]
    pub postgrest: Option<PostgrestConfig>,
}

impl BackendConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Fill a missing `postgrest` section from the environment, if possible.
    pub fn with_env(mut self) -> Self {
        if self.postgrest.is_none() {
            self.postgrest = PostgrestConfig::from_env().ok();
        }
        self
    }

    pub fn postgrest(&self) -> Result<&PostgrestConfig, ConfigError> {
        self.postgrest.as_ref().ok_or(ConfigError::NotConfigured)
    }
}
