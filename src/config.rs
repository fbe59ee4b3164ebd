//! Configuration management for linode-ddns.

use crate::error::{DdnsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the API token. Takes precedence over flags and file.
pub const TOKEN_ENV: &str = "TOKEN";

/// Default Linode API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.linode.com/v4/";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Domain whose A record is managed (e.g. "home.example.com").
    #[serde(default)]
    pub domain: String,

    /// Linode personal access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Check interval in seconds (default: 14400 = 4 hours).
    #[serde(default = "default_interval")]
    pub check_interval_secs: u64,

    /// Timeout applied to every provider request.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Provider API root.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Leave the cached IP untouched when an update fails, so the next tick retries.
    #[serde(default)]
    pub retry_failed_updates: bool,

    /// How the public address is discovered.
    #[serde(default)]
    pub ip_source: IpSource,

    /// Settings for the IP resolver.
    #[serde(default)]
    pub resolver: ResolverSettings,
}

fn default_interval() -> u64 {
    4 * 60 * 60
}

fn default_http_timeout() -> u64 {
    10
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

/// Public IP discovery method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpSource {
    /// Ask a fixed nameserver for a "who am I" hostname.
    #[default]
    Dns,
    /// Ask plain-text HTTP echo services.
    Http,
}

/// IP resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Hostname whose A record is the caller's address.
    #[serde(default = "default_lookup_host")]
    pub hostname: String,

    /// Nameserver the query is sent to, bypassing the system resolver.
    #[serde(default = "default_nameserver")]
    pub nameserver: String,

    /// Query timeout in seconds.
    #[serde(default = "default_resolver_timeout")]
    pub timeout_secs: u64,

    /// Echo services used when `ip_source = "http"`.
    #[serde(default = "default_http_services")]
    pub http_services: Vec<String>,
}

fn default_lookup_host() -> String {
    "myip.opendns.com".to_string()
}

fn default_nameserver() -> String {
    // resolver1.opendns.com
    "208.67.222.222:53".to_string()
}

fn default_resolver_timeout() -> u64 {
    5
}

fn default_http_services() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://icanhazip.com".to_string(),
        "https://ifconfig.me/ip".to_string(),
        "https://ipecho.net/plain".to_string(),
    ]
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            hostname: default_lookup_host(),
            nameserver: default_nameserver(),
            timeout_secs: default_resolver_timeout(),
            http_services: default_http_services(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: String::new(),
            token: None,
            check_interval_secs: default_interval(),
            http_timeout_secs: default_http_timeout(),
            api_base_url: default_api_base_url(),
            retry_failed_updates: false,
            ip_source: IpSource::default(),
            resolver: ResolverSettings::default(),
        }
    }
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| DdnsError::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("linode-ddns").join("config.toml"))
    }

    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the credential: environment first, then the configured value.
    pub fn resolve_token(&mut self) -> Result<&str> {
        let env = std::env::var(TOKEN_ENV).ok();
        let token = pick_token(env.as_deref(), self.token.as_deref())
            .ok_or_else(|| DdnsError::Config("No Token provided".to_string()))?;
        Ok(self.token.insert(token).as_str())
    }

    /// The credential, if one has been resolved or configured.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Check the configuration is usable for reconciliation.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(DdnsError::Config("No domain provided".to_string()));
        }
        if self.token().is_none() {
            return Err(DdnsError::Config("No Token provided".to_string()));
        }
        if self.check_interval_secs == 0 {
            return Err(DdnsError::Config(
                "check_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(DdnsError::Config(
                "http_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.resolver.timeout_secs == 0 {
            return Err(DdnsError::Config(
                "resolver.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.ip_source == IpSource::Http && self.resolver.http_services.is_empty() {
            return Err(DdnsError::Config(
                "ip_source = \"http\" needs at least one resolver.http_services entry".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pick the first non-blank credential, environment before configuration.
fn pick_token(env: Option<&str>, configured: Option<&str>) -> Option<String> {
    [env, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}
