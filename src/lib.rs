//! # linode-ddns
//!
//! Keeps a Linode DNS `A` record pointed at the host's public IPv4 address.
//!
//! ## Features
//!
//! - Public IP discovery through a pinned nameserver (OpenDNS `myip.opendns.com`)
//!   or HTTP echo services
//! - Zone lookup by apex host, update-or-create of the matching `A` record
//! - Polling loop that only talks to the provider when the address changes
//!
//! ## Usage
//!
//! ```bash
//! # Watch home.example.com, checking every four hours
//! TOKEN=... linode-ddns -d home.example.com
//!
//! # Reconcile once, even if nothing changed
//! linode-ddns -d home.example.com update --force
//!
//! # Show the detected public IP
//! linode-ddns status
//! ```

pub mod config;
pub mod detector;
pub mod domain;
pub mod error;
pub mod providers;
pub mod reconcile;

pub use config::Config;
pub use detector::{DnsIpResolver, HttpIpResolver, IpResolver};
pub use domain::{split_domain, DomainParts};
pub use error::{DdnsError, Result};
pub use providers::{DnsProvider, LinodeProvider, RecordChange};
pub use reconcile::{CycleOutcome, ReconcileState, Reconciler};
