//! Public IP detection.

use crate::config::{Config, IpSource, ResolverSettings};
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Source of the caller's current public IPv4 address.
///
/// Implementations make a single attempt; retrying is left to the caller's next tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IpResolver: Send + Sync {
    /// Determine the public address.
    async fn resolve(&self) -> Result<Ipv4Addr>;
}

/// Build the resolver selected by `config.ip_source`.
pub fn create_resolver(config: &Config) -> Result<Box<dyn IpResolver>> {
    let settings = &config.resolver;
    match config.ip_source {
        IpSource::Dns => Ok(Box::new(DnsIpResolver::from_settings(settings)?)),
        IpSource::Http => Ok(Box::new(HttpIpResolver::with_services(
            settings.http_services.clone(),
            Duration::from_secs(settings.timeout_secs),
        )?)),
    }
}

/// Resolves a "who am I" hostname against one pinned nameserver.
///
/// The system resolver and any local cache are bypassed so ISP or LAN
/// resolvers can't hand back a stale or split-horizon answer.
pub struct DnsIpResolver {
    resolver: TokioAsyncResolver,
    hostname: String,
    nameserver: SocketAddr,
}

impl DnsIpResolver {
    /// Create a resolver that asks `nameserver` for the A record of `hostname`.
    pub fn new(hostname: String, nameserver: SocketAddr, timeout: Duration) -> Self {
        let group =
            NameServerConfigGroup::from_ips_clear(&[nameserver.ip()], nameserver.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            hostname,
            nameserver,
        }
    }

    /// Create from configuration.
    pub fn from_settings(settings: &ResolverSettings) -> Result<Self> {
        let nameserver = parse_nameserver(&settings.nameserver)?;
        Ok(Self::new(
            settings.hostname.clone(),
            nameserver,
            Duration::from_secs(settings.timeout_secs),
        ))
    }

    /// The nameserver queries are sent to.
    pub fn nameserver(&self) -> SocketAddr {
        self.nameserver
    }
}

#[async_trait]
impl IpResolver for DnsIpResolver {
    async fn resolve(&self) -> Result<Ipv4Addr> {
        tracing::debug!("Looking up {} via {}", self.hostname, self.nameserver);

        let lookup = match self.resolver.ipv4_lookup(self.hostname.as_str()).await {
            Ok(lookup) => lookup,
            Err(e) => {
                if let ResolveErrorKind::NoRecordsFound { .. } = e.kind() {
                    return Err(DdnsError::NoAddressFound(self.hostname.clone()));
                }
                return Err(e.into());
            }
        };

        let ip = lookup
            .iter()
            .next()
            .map(|a| a.0)
            .ok_or_else(|| DdnsError::NoAddressFound(self.hostname.clone()))?;

        tracing::info!("Got IP Address: {}", ip);
        Ok(ip)
    }
}

/// Accept "ip:port" or a bare IP (port 53).
fn parse_nameserver(value: &str) -> Result<SocketAddr> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    value
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| DdnsError::Config(format!("Invalid nameserver address: {}", value)))
}

/// IP detector over plain-text HTTP echo services, tried in order.
pub struct HttpIpResolver {
    client: reqwest::Client,
    services: Vec<String>,
}

impl HttpIpResolver {
    /// Create a new detector with custom services.
    pub fn with_services(services: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, services })
    }

    /// Try a single IP detection service.
    async fn try_service(&self, url: &str) -> Result<Ipv4Addr> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DdnsError::Network(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let text = response.text().await?;
        let ip_str = text.trim();

        ip_str
            .parse()
            .map_err(|_| DdnsError::Serialization(format!("Invalid IPv4 response: {}", ip_str)))
    }
}

#[async_trait]
impl IpResolver for HttpIpResolver {
    async fn resolve(&self) -> Result<Ipv4Addr> {
        for service in &self.services {
            match self.try_service(service).await {
                Ok(ip) => {
                    tracing::info!("Got IP Address: {} from {}", ip, service);
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!("Service {} failed: {}", service, e);
                }
            }
        }

        Err(DdnsError::NoAddressFound(
            "All IP detection services failed".to_string(),
        ))
    }
}
