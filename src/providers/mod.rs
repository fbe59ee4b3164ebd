//! DNS provider implementations.

mod linode;


pub use linode::LinodeProvider;

use crate::config::Config;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// What `set_record` did at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RecordChange {
    /// An existing A record was pointed at the new address.
    Updated { zone_id: u64, record_id: u64 },
    /// No matching A record existed, so one was created.
    Created {
        zone_id: u64,
        record_id: Option<u64>,
    },
}

/// Trait for DNS providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &'static str;

    /// Check the stored credentials are accepted.
    ///
    /// `Ok(false)` means the provider answered and refused them; `Err` means
    /// the question couldn't be asked.
    async fn auth_valid(&self) -> Result<bool>;

    /// Point the A record for `domain` at `ip`, creating it if needed.
    async fn set_record(&self, domain: &str, ip: Ipv4Addr) -> Result<RecordChange>;
}

/// Create the provider from configuration.
pub fn create_provider(config: &Config) -> Result<Box<dyn DnsProvider>> {
    let token = config
        .token()
        .ok_or_else(|| DdnsError::Config("No Token provided".to_string()))?;

    Ok(Box::new(LinodeProvider::with_base_url(
        token.to_string(),
        config.api_base_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?))
}
