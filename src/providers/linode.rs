//! Linode DNS Manager provider.

use super::{DnsProvider, RecordChange};
use crate::config::DEFAULT_API_BASE_URL;
use crate::domain::split_domain;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

const RECORD_TYPE_A: &str = "A";

/// Linode DNS provider.
pub struct LinodeProvider {
    client: reqwest::Client,
    token: String,
    base_url: Url,
}

/// One page of a Linode collection response.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pages: u32,
    #[serde(default)]
    results: u32,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: u64,
    #[serde(default)]
    domain: String,
}

#[derive(Debug, Deserialize)]
struct DomainRecord {
    id: u64,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    target: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: u64,
}

#[derive(Debug, Serialize)]
struct UpdateRequest {
    target: String,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    target: String,
}

impl LinodeProvider {
    /// Create a new Linode provider against the public API.
    pub fn new(token: String, timeout: Duration) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_API_BASE_URL.to_string(), timeout)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(token: String, base_url: String, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(DdnsError::Config(
                "HTTP timeout must be greater than zero".to_string(),
            ));
        }

        // Url::join replaces the last segment unless the base ends in '/'.
        let base = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&base)
            .map_err(|e| DdnsError::Config(format!("Invalid API URL {}: {}", base, e)))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            token,
            base_url,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| DdnsError::Config(format!("Invalid API path {}: {}", path, e)))?;

        tracing::debug!("Performing {} request to {}", method, url);

        Ok(self
            .client
            .request(method, url)
            .bearer_auth(&self.token))
    }

    /// Send a request and return the body, failing on non-success status.
    async fn send(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        tracing::debug!("{}", body);

        if !status.is_success() {
            return Err(DdnsError::Provider {
                provider: self.name().to_string(),
                message: format!("HTTP {}: {}", status, body.trim()),
            });
        }

        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Find the zone for `apex` using the server-side filter. First match wins.
    async fn find_zone(&self, apex: &str) -> Result<Zone> {
        let filter = serde_json::json!({ "domain": apex }).to_string();
        let request = self.request(Method::GET, "domains")?.header("X-Filter", filter);

        let page: Page<Zone> = self.send_json(request).await?;
        if page.results < 1 {
            return Err(DdnsError::ZoneNotFound(apex.to_string()));
        }

        let zone = page
            .data
            .into_iter()
            .next()
            .ok_or_else(|| DdnsError::ZoneNotFound(apex.to_string()))?;

        tracing::debug!("Using zone {} ({})", zone.id, zone.domain);
        Ok(zone)
    }

    /// List the first page of records in a zone.
    async fn list_records(&self, zone_id: u64) -> Result<Vec<DomainRecord>> {
        let request = self.request(Method::GET, &format!("domains/{}/records", zone_id))?;

        let page: Page<DomainRecord> = self.send_json(request).await?;
        if page.pages > 1 {
            tracing::warn!(
                "Zone {} has {} pages of records, only the first is examined",
                zone_id,
                page.pages
            );
        }
        Ok(page.data)
    }

    async fn update_record(&self, zone_id: u64, record_id: u64, ip: Ipv4Addr) -> Result<()> {
        let request = self
            .request(
                Method::PUT,
                &format!("domains/{}/records/{}", zone_id, record_id),
            )?
            .json(&UpdateRequest {
                target: ip.to_string(),
            });

        self.send(request).await?;
        Ok(())
    }

    async fn create_record(&self, zone_id: u64, name: &str, ip: Ipv4Addr) -> Result<Option<u64>> {
        let request = self
            .request(Method::POST, &format!("domains/{}/records", zone_id))?
            .json(&CreateRequest {
                record_type: RECORD_TYPE_A,
                name,
                target: ip.to_string(),
            });

        // The id is informational; an unexpected body doesn't undo the create.
        let body = self.send(request).await?;
        Ok(serde_json::from_str::<CreatedRecord>(&body)
            .ok()
            .map(|r| r.id))
    }
}

#[async_trait]
impl DnsProvider for LinodeProvider {
    fn name(&self) -> &'static str {
        "linode"
    }

    async fn auth_valid(&self) -> Result<bool> {
        let response = self.request(Method::GET, "profile")?.send().await?;
        let status = response.status();
        tracing::debug!("authentication: {}", status);

        if status != StatusCode::OK {
            tracing::info!("Authorization invalid, got {}", status);
            return Ok(false);
        }
        Ok(true)
    }

    async fn set_record(&self, domain: &str, ip: Ipv4Addr) -> Result<RecordChange> {
        tracing::info!("Reading current record...");

        let parts = split_domain(domain)?;
        let zone = self.find_zone(&parts.apex).await?;
        let records = self.list_records(zone.id).await?;

        let existing = records
            .iter()
            .find(|r| r.record_type == RECORD_TYPE_A && r.name == parts.subdomain);

        if let Some(record) = existing {
            tracing::info!(
                "Updating record {} to have {:?} point to {} (was {})",
                record.id,
                parts.subdomain,
                ip,
                record.target
            );
            self.update_record(zone.id, record.id, ip).await?;
            return Ok(RecordChange::Updated {
                zone_id: zone.id,
                record_id: record.id,
            });
        }

        tracing::info!(
            "Creating A record for {:?}, pointing to {}",
            parts.subdomain,
            ip
        );
        let record_id = self.create_record(zone.id, &parts.subdomain, ip).await?;
        Ok(RecordChange::Created {
            zone_id: zone.id,
            record_id,
        })
    }
}
