//! Error types for linode-ddns.

use thiserror::Error;

/// Result type alias for linode-ddns.
pub type Result<T> = std::result::Result<T, DdnsError>;

/// DDNS error types.
#[derive(Error, Debug)]
pub enum DdnsError {
    /// Domain is not a dotted name.
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    /// No zone at the provider matches the apex host.
    #[error("Domain not found: {0}")]
    ZoneNotFound(String),

    /// IP resolution returned an empty result set.
    #[error("No address found: {0}")]
    NoAddressFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/HTTP/DNS transport error.
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status.
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DdnsError {
    /// Whether the next tick could plausibly succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, DdnsError::Network(_) | DdnsError::NoAddressFound(_))
    }
}

impl From<reqwest::Error> for DdnsError {
    fn from(e: reqwest::Error) -> Self {
        DdnsError::Network(e.to_string())
    }
}

impl From<hickory_resolver::error::ResolveError> for DdnsError {
    fn from(e: hickory_resolver::error::ResolveError) -> Self {
        DdnsError::Network(e.to_string())
    }
}

impl From<toml::de::Error> for DdnsError {
    fn from(e: toml::de::Error) -> Self {
        DdnsError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for DdnsError {
    fn from(e: serde_json::Error) -> Self {
        DdnsError::Serialization(e.to_string())
    }
}
