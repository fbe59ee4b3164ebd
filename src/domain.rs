//! Splitting a managed name into the apex host and the record label.

use crate::error::{DdnsError, Result};

/// A domain decomposed into the zone it lives in and the record name inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParts {
    /// Last two labels, e.g. `example.com`.
    pub apex: String,
    /// Leading labels joined by dots; empty for the apex itself.
    pub subdomain: String,
}

impl DomainParts {
    /// Whether this names the apex record.
    pub fn is_apex(&self) -> bool {
        self.subdomain.is_empty()
    }

    /// Rebuild the dotted name.
    pub fn fqdn(&self) -> String {
        if self.is_apex() {
            self.apex.clone()
        } else {
            format!("{}.{}", self.subdomain, self.apex)
        }
    }
}

/// Split `domain` into apex host and subdomain label.
///
/// Labels are not validated; the provider rejects what it doesn't accept.
pub fn split_domain(domain: &str) -> Result<DomainParts> {
    let trimmed = domain.trim();
    let name = trimmed.strip_suffix('.').unwrap_or(trimmed);

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 2 {
        return Err(DdnsError::InvalidDomain(format!("no '.' in {:?}", domain)));
    }

    let split = parts.len() - 2;
    Ok(DomainParts {
        apex: parts[split..].join("."),
        subdomain: parts[..split].join("."),
    })
}
