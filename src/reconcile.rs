//! The polling loop that keeps the record in line with the public address.
//!
//! Each tick resolves the current IPv4 address and compares it with the last
//! address the loop acted on. Only a change leads to provider traffic:
//!
//! ```text
//! tick ─> resolve ─> same as last_ip? ─yes─> skip
//!                          │ no
//!                          ▼
//!                    auth_valid() ─false/err─> report, keep last_ip
//!                          │ true
//!                          ▼
//!                  set_record(domain, ip) ─> last_ip = ip
//! ```
//!
//! Cycles never overlap: the next tick is only awaited once the current
//! cycle has finished, and ticks missed while a slow cycle ran are dropped.

use crate::detector::IpResolver;
use crate::providers::{DnsProvider, RecordChange};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// What the loop remembers between cycles. Lives for the process only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileState {
    /// Address the last reconciliation was attempted with.
    pub last_ip: Option<Ipv4Addr>,
    /// When the provider last accepted a change.
    pub last_update: Option<DateTime<Utc>>,
}

impl ReconcileState {
    /// Whether `ip` differs from the address last acted on.
    pub fn needs_update(&self, ip: Ipv4Addr) -> bool {
        self.last_ip != Some(ip)
    }
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The public address couldn't be determined; nothing else was attempted.
    ResolveFailed { error: String },
    /// Address unchanged since the last cycle; no provider calls made.
    Unchanged { ip: Ipv4Addr },
    /// The credential check itself failed.
    AuthError { ip: Ipv4Addr, error: String },
    /// The provider refused the credentials.
    AuthRejected { ip: Ipv4Addr },
    /// The record now points at `ip`.
    Applied {
        ip: Ipv4Addr,
        previous: Option<Ipv4Addr>,
        change: RecordChange,
    },
    /// `set_record` failed.
    UpdateFailed { ip: Ipv4Addr, error: String },
}

impl CycleOutcome {
    /// Log the outcome at a level matching its severity.
    pub fn report(&self, domain: &str) {
        match self {
            CycleOutcome::ResolveFailed { error } => {
                tracing::error!("Error determining IP: {}", error);
            }
            CycleOutcome::Unchanged { ip } => {
                tracing::debug!("IP unchanged ({}), nothing to do", ip);
            }
            CycleOutcome::AuthError { error, .. } => {
                tracing::error!("Error authenticating: {}", error);
            }
            CycleOutcome::AuthRejected { .. } => {
                tracing::info!("Authentication failed.");
            }
            CycleOutcome::Applied {
                ip,
                previous,
                change,
            } => match previous {
                Some(prev) => tracing::info!("{}: {} -> {} ({:?})", domain, prev, ip, change),
                None => tracing::info!("{}: {} ({:?})", domain, ip, change),
            },
            CycleOutcome::UpdateFailed { ip, error } => {
                tracing::error!("Failed to point {} at {}: {}", domain, ip, error);
            }
        }
    }
}

/// Drives an [`IpResolver`] and a [`DnsProvider`] for one domain.
pub struct Reconciler {
    resolver: Box<dyn IpResolver>,
    provider: Box<dyn DnsProvider>,
    domain: String,
    retry_failed_updates: bool,
    state: ReconcileState,
}

impl Reconciler {
    /// Create a reconciler with empty state.
    pub fn new(
        resolver: Box<dyn IpResolver>,
        provider: Box<dyn DnsProvider>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            provider,
            domain: domain.into(),
            retry_failed_updates: false,
            state: ReconcileState::default(),
        }
    }

    /// When enabled, a failed `set_record` leaves `last_ip` alone so the
    /// next tick tries again even if the address hasn't moved.
    pub fn retry_failed_updates(mut self, enabled: bool) -> Self {
        self.retry_failed_updates = enabled;
        self
    }

    /// Current state.
    pub fn state(&self) -> &ReconcileState {
        &self.state
    }

    /// Managed domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Run one cycle, skipping provider calls if the address hasn't changed.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let ip = match self.resolver.resolve().await {
            Ok(ip) => ip,
            Err(e) => {
                return CycleOutcome::ResolveFailed {
                    error: e.to_string(),
                }
            }
        };

        if !self.state.needs_update(ip) {
            return CycleOutcome::Unchanged { ip };
        }

        self.reconcile(ip).await
    }

    /// Run one cycle that reconciles even if the address is unchanged.
    pub async fn force_cycle(&mut self) -> CycleOutcome {
        match self.resolver.resolve().await {
            Ok(ip) => self.reconcile(ip).await,
            Err(e) => CycleOutcome::ResolveFailed {
                error: e.to_string(),
            },
        }
    }

    async fn reconcile(&mut self, ip: Ipv4Addr) -> CycleOutcome {
        tracing::info!(
            "Reconciling {} to {} (last: {:?})",
            self.domain,
            ip,
            self.state.last_ip
        );

        match self.provider.auth_valid().await {
            Ok(true) => {}
            Ok(false) => return CycleOutcome::AuthRejected { ip },
            Err(e) => {
                return CycleOutcome::AuthError {
                    ip,
                    error: e.to_string(),
                }
            }
        }

        let previous = self.state.last_ip;
        let outcome = match self.provider.set_record(&self.domain, ip).await {
            Ok(change) => {
                self.state.last_update = Some(Utc::now());
                CycleOutcome::Applied {
                    ip,
                    previous,
                    change,
                }
            }
            Err(e) => CycleOutcome::UpdateFailed {
                ip,
                error: e.to_string(),
            },
        };

        let failed = matches!(outcome, CycleOutcome::UpdateFailed { .. });
        if !(failed && self.retry_failed_updates) {
            self.state.last_ip = Some(ip);
        }

        outcome
    }

    /// Run forever: one cycle now, then one per `interval`.
    pub async fn run(&mut self, interval: Duration) {
        self.run_until(interval, std::future::pending()).await
    }

    /// Run until `shutdown` completes. A cycle in progress is finished first.
    pub async fn run_until<F>(&mut self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "Watching {} via {} (interval: {}s)",
            self.domain,
            self.provider.name(),
            interval.as_secs()
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let outcome = self.run_cycle().await;
                    outcome.report(&self.domain);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::MockIpResolver;
    use crate::error::DdnsError;
    use crate::providers::MockDnsProvider;
    use mockall::predicate::eq;
    use mockall::Sequence;

    const DOMAIN: &str = "home.example.com";

    fn resolver_returning(ip: Ipv4Addr) -> MockIpResolver {
        let mut resolver = MockIpResolver::new();
        resolver.expect_resolve().returning(move || Ok(ip));
        resolver
    }

    fn updated() -> RecordChange {
        RecordChange::Updated {
            zone_id: 1,
            record_id: 2,
        }
    }

    #[tokio::test]
    async fn test_first_cycle_updates() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().times(1).returning(|| Ok(true));
        provider
            .expect_set_record()
            .with(eq(DOMAIN), eq(ip))
            .times(1)
            .returning(|_, _| Ok(updated()));

        let mut reconciler =
            Reconciler::new(Box::new(resolver_returning(ip)), Box::new(provider), DOMAIN);

        assert_eq!(
            reconciler.run_cycle().await,
            CycleOutcome::Applied {
                ip,
                previous: None,
                change: updated()
            }
        );
        assert_eq!(reconciler.state().last_ip, Some(ip));
        assert!(reconciler.state().last_update.is_some());
    }

    #[tokio::test]
    async fn test_same_ip_twice_makes_no_provider_calls() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().times(1).returning(|| Ok(true));
        provider
            .expect_set_record()
            .times(1)
            .returning(|_, _| Ok(updated()));

        let mut reconciler =
            Reconciler::new(Box::new(resolver_returning(ip)), Box::new(provider), DOMAIN);

        reconciler.run_cycle().await;
        assert_eq!(reconciler.run_cycle().await, CycleOutcome::Unchanged { ip });
    }

    #[tokio::test]
    async fn test_changed_ip_updates_again() {
        let first = Ipv4Addr::new(1, 1, 1, 1);
        let second = Ipv4Addr::new(2, 2, 2, 2);

        let mut seq = Sequence::new();
        let mut resolver = MockIpResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || Ok(first));
        resolver
            .expect_resolve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || Ok(second));

        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().times(2).returning(|| Ok(true));
        provider
            .expect_set_record()
            .times(2)
            .returning(|_, _| Ok(updated()));

        let mut reconciler = Reconciler::new(Box::new(resolver), Box::new(provider), DOMAIN);

        reconciler.run_cycle().await;
        assert_eq!(
            reconciler.run_cycle().await,
            CycleOutcome::Applied {
                ip: second,
                previous: Some(first),
                change: updated()
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_failure_skips_cycle() {
        let mut resolver = MockIpResolver::new();
        resolver
            .expect_resolve()
            .returning(|| Err(DdnsError::NoAddressFound("myip.opendns.com".to_string())));

        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().never();
        provider.expect_set_record().never();

        let mut reconciler = Reconciler::new(Box::new(resolver), Box::new(provider), DOMAIN);

        assert!(matches!(
            reconciler.run_cycle().await,
            CycleOutcome::ResolveFailed { .. }
        ));
        assert_eq!(reconciler.state(), &ReconcileState::default());
    }

    #[tokio::test]
    async fn test_auth_rejected_never_sets_record_and_retries() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().times(2).returning(|| Ok(false));
        provider.expect_set_record().never();

        let mut reconciler =
            Reconciler::new(Box::new(resolver_returning(ip)), Box::new(provider), DOMAIN);

        assert_eq!(reconciler.run_cycle().await, CycleOutcome::AuthRejected { ip });
        assert_eq!(reconciler.state().last_ip, None);
        // Same address, but authentication is attempted again.
        assert_eq!(reconciler.run_cycle().await, CycleOutcome::AuthRejected { ip });
    }

    #[tokio::test]
    async fn test_auth_error_leaves_state() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut provider = MockDnsProvider::new();
        provider
            .expect_auth_valid()
            .times(1)
            .returning(|| Err(DdnsError::Network("connection reset".to_string())));
        provider.expect_set_record().never();

        let mut reconciler =
            Reconciler::new(Box::new(resolver_returning(ip)), Box::new(provider), DOMAIN);

        assert!(matches!(
            reconciler.run_cycle().await,
            CycleOutcome::AuthError { .. }
        ));
        assert_eq!(reconciler.state().last_ip, None);
    }

    #[tokio::test]
    async fn test_failed_update_still_caches_ip() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().times(1).returning(|| Ok(true));
        provider
            .expect_set_record()
            .times(1)
            .returning(|_, _| Err(DdnsError::ZoneNotFound("example.com".to_string())));

        let mut reconciler =
            Reconciler::new(Box::new(resolver_returning(ip)), Box::new(provider), DOMAIN);

        assert!(matches!(
            reconciler.run_cycle().await,
            CycleOutcome::UpdateFailed { .. }
        ));
        assert_eq!(reconciler.state().last_ip, Some(ip));
        assert_eq!(reconciler.state().last_update, None);
        assert_eq!(reconciler.run_cycle().await, CycleOutcome::Unchanged { ip });
    }

    #[tokio::test]
    async fn test_failed_update_retried_when_enabled() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut seq = Sequence::new();
        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().times(2).returning(|| Ok(true));
        provider
            .expect_set_record()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(DdnsError::Network("timed out".to_string())));
        provider
            .expect_set_record()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(updated()));

        let mut reconciler =
            Reconciler::new(Box::new(resolver_returning(ip)), Box::new(provider), DOMAIN)
                .retry_failed_updates(true);

        assert!(matches!(
            reconciler.run_cycle().await,
            CycleOutcome::UpdateFailed { .. }
        ));
        assert_eq!(reconciler.state().last_ip, None);
        assert!(matches!(
            reconciler.run_cycle().await,
            CycleOutcome::Applied { previous: None, .. }
        ));
        assert_eq!(reconciler.state().last_ip, Some(ip));
    }

    #[tokio::test]
    async fn test_force_cycle_ignores_cache() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut provider = MockDnsProvider::new();
        provider.expect_auth_valid().times(2).returning(|| Ok(true));
        provider
            .expect_set_record()
            .times(2)
            .returning(|_, _| Ok(updated()));

        let mut reconciler =
            Reconciler::new(Box::new(resolver_returning(ip)), Box::new(provider), DOMAIN);

        reconciler.run_cycle().await;
        assert!(matches!(
            reconciler.force_cycle().await,
            CycleOutcome::Applied { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cycles_immediately_and_stops() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        let mut resolver = MockIpResolver::new();
        resolver.expect_resolve().times(1).returning(move || Ok(ip));

        let mut provider = MockDnsProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_auth_valid().times(1).returning(|| Ok(true));
        provider
            .expect_set_record()
            .times(1)
            .returning(|_, _| Ok(updated()));

        let mut reconciler = Reconciler::new(Box::new(resolver), Box::new(provider), DOMAIN);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = tx.send(());
        });

        reconciler
            .run_until(Duration::from_secs(3600), async {
                let _ = rx.await;
            })
            .await;
        stopper.await.unwrap();

        assert_eq!(reconciler.state().last_ip, Some(ip));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_skips_unchanged_ticks() {
        let ip = Ipv4Addr::new(2, 2, 2, 2);
        // Ticks at 0h, 1h, 2h, 3h and 4h before shutdown at 4h30.
        let mut resolver = MockIpResolver::new();
        resolver.expect_resolve().times(5).returning(move || Ok(ip));

        let mut provider = MockDnsProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_auth_valid().times(1).returning(|| Ok(true));
        provider
            .expect_set_record()
            .times(1)
            .returning(|_, _| Ok(updated()));

        let mut reconciler = Reconciler::new(Box::new(resolver), Box::new(provider), DOMAIN);

        reconciler
            .run_until(
                Duration::from_secs(3600),
                tokio::time::sleep(Duration::from_secs(4 * 3600 + 1800)),
            )
            .await;

        assert_eq!(reconciler.state().last_ip, Some(ip));
    }

    #[test]
    fn test_needs_update() {
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let mut state = ReconcileState::default();
        assert!(state.needs_update(ip));
        state.last_ip = Some(ip);
        assert!(!state.needs_update(ip));
        assert!(state.needs_update(Ipv4Addr::new(10, 0, 0, 2)));
    }
}
