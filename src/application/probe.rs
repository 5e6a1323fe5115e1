//! Extension availability probe
//!
//! Answers "can this extension take a call right now" by combining three
//! signals, cheapest first: registration, active-channel membership, and the
//! tenant DND flag. The probe is total: a down connection or a failed lookup
//! reports the extension as offline instead of erroring, so schedulers keep
//! running through platform outages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::domain::availability::{Availability, ExtensionStatus};
use crate::domain::ports::{CallControl, TenantConfig};

const CACHE_TTL: Duration = Duration::from_secs(5);

pub struct AvailabilityProbe {
    control: Arc<dyn CallControl>,
    tenants: Arc<dyn TenantConfig>,
    cache: Mutex<HashMap<(String, String), (Availability, Instant)>>,
    ttl: Duration,
}

impl AvailabilityProbe {
    pub fn new(control: Arc<dyn CallControl>, tenants: Arc<dyn TenantConfig>) -> Self {
        Self {
            control,
            tenants,
            cache: Mutex::new(HashMap::new()),
            ttl: CACHE_TTL,
        }
    }

    /// Cached check. Stale entries are re-probed.
    pub async fn check(&self, tenant: &str, extension: &str) -> Availability {
        let key = (tenant.to_string(), extension.to_string());
        {
            let cache = self.cache.lock().unwrap();
            if let Some((availability, at)) = cache.get(&key) {
                if at.elapsed() < self.ttl {
                    return availability.clone();
                }
            }
        }
        self.check_fresh(tenant, extension).await
    }

    /// Probe the platform now, bypassing the cache. Callers about to act on
    /// the answer (originate a callback) use this to shrink the race window.
    pub async fn check_fresh(&self, tenant: &str, extension: &str) -> Availability {
        let availability = self.probe(tenant, extension).await;
        debug!(
            tenant,
            extension,
            status = availability.status.as_str(),
            "availability probed"
        );
        self.cache.lock().unwrap().insert(
            (tenant.to_string(), extension.to_string()),
            (availability.clone(), Instant::now()),
        );
        availability
    }

    async fn probe(&self, tenant: &str, extension: &str) -> Availability {
        if !self.control.is_connected() {
            return Availability::unavailable(
                extension,
                ExtensionStatus::Offline,
                "call platform connection is down",
            );
        }

        match self.control.is_registered(extension, tenant).await {
            Ok(true) => {}
            Ok(false) => {
                return Availability::unavailable(
                    extension,
                    ExtensionStatus::Offline,
                    "extension is not registered",
                );
            }
            Err(e) => {
                warn!(tenant, extension, error = %e, "registration lookup failed");
                return Availability::unavailable(
                    extension,
                    ExtensionStatus::Offline,
                    "registration lookup failed",
                );
            }
        }

        match self.control.active_channels().await {
            Ok(channels) => {
                if in_call(&channels, extension) {
                    return Availability::unavailable(
                        extension,
                        ExtensionStatus::InCall,
                        "extension is on another call",
                    );
                }
            }
            Err(e) => {
                warn!(tenant, extension, error = %e, "channel listing failed");
                return Availability::unavailable(
                    extension,
                    ExtensionStatus::Offline,
                    "channel listing failed",
                );
            }
        }

        match self.tenants.is_dnd(tenant, extension).await {
            Ok(true) => Availability::unavailable(
                extension,
                ExtensionStatus::Dnd,
                "do-not-disturb is active",
            ),
            // A failed DND lookup does not block the call
            Ok(false) | Err(_) => Availability::available(extension),
        }
    }
}

/// Whether the channel listing shows a call involving the extension.
///
/// The match is anchored on a field boundary so a longer extension sharing
/// the same suffix ("2100@...") never counts for "100".
fn in_call(channels: &str, extension: &str) -> bool {
    let needle = format!("{}@", extension);
    channels
        .lines()
        .skip(1) // header row
        .any(|line| {
            line.match_indices(&needle).any(|(idx, _)| {
                idx == 0 || !line.as_bytes()[idx - 1].is_ascii_alphanumeric()
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{MockCallControl, MockTenantConfig};

    fn probe_with(
        control: MockCallControl,
        tenants: MockTenantConfig,
    ) -> AvailabilityProbe {
        AvailabilityProbe::new(Arc::new(control), Arc::new(tenants))
    }

    fn connected_control() -> MockCallControl {
        let mut control = MockCallControl::new();
        control.expect_is_connected().return_const(true);
        control
    }

    #[tokio::test]
    async fn test_down_connection_is_offline_not_error() {
        let mut control = MockCallControl::new();
        control.expect_is_connected().return_const(false);
        let probe = probe_with(control, MockTenantConfig::new());

        let a = probe.check_fresh("acme", "1001").await;
        assert!(!a.available);
        assert_eq!(a.status, ExtensionStatus::Offline);
    }

    #[tokio::test]
    async fn test_unregistered_short_circuits() {
        let mut control = connected_control();
        control.expect_is_registered().returning(|_, _| Ok(false));
        // active_channels must not be consulted
        control.expect_active_channels().times(0);
        let probe = probe_with(control, MockTenantConfig::new());

        let a = probe.check_fresh("acme", "1001").await;
        assert_eq!(a.status, ExtensionStatus::Offline);
        assert_eq!(a.reason.as_deref(), Some("extension is not registered"));
    }

    #[tokio::test]
    async fn test_in_call_detected_from_channel_listing() {
        let mut control = connected_control();
        control.expect_is_registered().returning(|_, _| Ok(true));
        control.expect_active_channels().returning(|| {
            Ok("uuid,direction,created,name\n\
                abc,inbound,2026-01-07,sofia/internal/1001@acme.example.com\n\
                1 total."
                .to_string())
        });
        let probe = probe_with(control, MockTenantConfig::new());

        let a = probe.check_fresh("acme", "1001").await;
        assert_eq!(a.status, ExtensionStatus::InCall);
    }

    #[tokio::test]
    async fn test_dnd_checked_last() {
        let mut control = connected_control();
        control.expect_is_registered().returning(|_, _| Ok(true));
        control
            .expect_active_channels()
            .returning(|| Ok("uuid,direction\n0 total.".to_string()));
        let mut tenants = MockTenantConfig::new();
        tenants.expect_is_dnd().returning(|_, _| Ok(true));
        let probe = probe_with(control, tenants);

        let a = probe.check_fresh("acme", "1001").await;
        assert_eq!(a.status, ExtensionStatus::Dnd);
    }

    #[tokio::test]
    async fn test_available_when_all_signals_clear() {
        let mut control = connected_control();
        control.expect_is_registered().returning(|_, _| Ok(true));
        control
            .expect_active_channels()
            .returning(|| Ok("uuid,direction\n0 total.".to_string()));
        let mut tenants = MockTenantConfig::new();
        tenants.expect_is_dnd().returning(|_, _| Ok(false));
        let probe = probe_with(control, tenants);

        let a = probe.check_fresh("acme", "1001").await;
        assert!(a.available);
        assert_eq!(a.status, ExtensionStatus::Available);
    }

    #[tokio::test]
    async fn test_check_uses_cache() {
        let mut control = connected_control();
        // Exactly one probe serves both calls
        control
            .expect_is_registered()
            .times(1)
            .returning(|_, _| Ok(true));
        control
            .expect_active_channels()
            .times(1)
            .returning(|| Ok("0 total.".to_string()));
        let mut tenants = MockTenantConfig::new();
        tenants.expect_is_dnd().times(1).returning(|_, _| Ok(false));
        let probe = probe_with(control, tenants);

        let first = probe.check("acme", "1001").await;
        let second = probe.check("acme", "1001").await;
        assert!(first.available && second.available);
    }

    #[test]
    fn test_in_call_needle() {
        let listing = "uuid,name\nabc,sofia/internal/1001@acme\n1 total.";
        assert!(in_call(listing, "1001"));
        assert!(!in_call(listing, "100"));
        assert!(!in_call(listing, "2000"));

        // A longer extension ending in the probed number is someone else
        let listing = "uuid,name\nabc,sofia/internal/2100@acme\n1 total.";
        assert!(!in_call(listing, "100"));
        assert!(in_call(listing, "2100"));
    }
}
