use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level chainstat configuration, matching `chainstat.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub primary_server: Option<String>,
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub aggregation: AggregationSection,
}

/// One upstream CI server entry (`[[server]]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logical server code used by callers.
    pub code: String,
    /// Base REST URL, e.g. `https://ci.example.org`.
    #[serde(default)]
    pub url: String,
    /// Optional alias: this entry reuses another server's real connection
    /// (shared rate limits). Access rights are still evaluated against the
    /// requested code unless `access_reference` overrides it.
    #[serde(default)]
    pub reference: Option<String>,
    /// Optional access-control key overriding the server code for
    /// `has_access` checks.
    #[serde(default)]
    pub access_reference: Option<String>,
    /// Environment variable holding the API token for this server.
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Maximum live server handles (LRU backstop).
    pub max_entries: usize,
    /// Evict a handle after this many minutes without access.
    pub idle_minutes: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 100,
            idle_minutes: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSection {
    /// K for the slowest-test and log-consumer rankings.
    pub top_k: usize,
    /// Historical baseline branch for new-failure classification.
    pub baseline_branch: String,
    /// How many recent baseline builds to scan for test history.
    pub history_lookback_builds: usize,
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self {
            top_k: 3,
            baseline_branch: "refs/heads/master".to_string(),
            history_lookback_builds: 50,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Look up a declared server entry by code.
    pub fn server(&self, code: &str) -> Result<&ServerConfig, ConfigError> {
        self.servers
            .iter()
            .find(|s| s.code == code)
            .ok_or_else(|| ConfigError::UnknownServer(code.to_string()))
    }

    /// Resolve a server code through the alias table. A configured server may
    /// declare itself a reference to another server's real connection; the
    /// real code replaces the requested one for caching purposes.
    pub fn resolve_alias(&self, code: &str) -> Result<&str, ConfigError> {
        let entry = self.server(code)?;
        match entry.reference.as_deref() {
            // Aliases are one level deep: the target must be a real entry.
            Some(real) if !real.is_empty() && real != code => Ok(self.server(real)?.code.as_str()),
            _ => Ok(entry.code.as_str()),
        }
    }

    /// Access-control key for a server: the explicit access reference when
    /// declared, otherwise the requested code itself. Note this is evaluated
    /// against the *requested* code, not the alias target.
    pub fn access_reference(&self, code: &str) -> Result<&str, ConfigError> {
        let entry = self.server(code)?;
        Ok(entry
            .access_reference
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&entry.code))
    }

    /// The primary server code, defaulting to the first declared entry.
    pub fn primary_server(&self) -> Option<&str> {
        self.primary_server
            .as_deref()
            .or_else(|| self.servers.first().map(|s| s.code.as_str()))
    }
}
