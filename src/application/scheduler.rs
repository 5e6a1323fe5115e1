//! Callback scheduling
//!
//! Polls the ticketing service for pending and notified callback tickets and
//! notifies agents the moment they become available. The scheduler never
//! mutates ticket state on collaborator failure, so a crashed cycle is simply
//! retried on the next tick; compare-and-swap at the gateway keeps a
//! concurrent click-to-call from racing the notification.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::domain::callback::{CallbackTicket, TicketStatus};
use crate::domain::ports::{Notifier, TicketGateway};
use crate::domain::shared::Result;

use super::probe::AvailabilityProbe;

/// What one poll cycle did, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub examined: usize,
    pub notified: usize,
    pub expired: usize,
    pub needs_review: usize,
    pub skipped: usize,
}

pub struct CallbackScheduler {
    gateway: Arc<dyn TicketGateway>,
    notifier: Arc<dyn Notifier>,
    probe: Arc<AvailabilityProbe>,
    config: SchedulerConfig,
}

impl CallbackScheduler {
    pub fn new(
        gateway: Arc<dyn TicketGateway>,
        notifier: Arc<dyn Notifier>,
        probe: Arc<AvailabilityProbe>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            gateway,
            notifier,
            probe,
            config,
        }
    }

    /// Poll a tenant forever at the configured interval. Spawned once per
    /// tenant; abort the task to stop it.
    pub async fn run(self: Arc<Self>, tenant: String) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tenant = %tenant, interval_secs = self.config.interval_secs, "scheduler started");
        loop {
            interval.tick().await;
            match self.poll_once(&tenant).await {
                Ok(stats) if stats.examined > 0 => {
                    debug!(tenant = %tenant, ?stats, "poll cycle done");
                }
                Ok(_) => {}
                Err(e) => warn!(tenant = %tenant, error = %e, "poll cycle failed"),
            }
        }
    }

    /// One poll cycle over a tenant's actionable tickets.
    pub async fn poll_once(&self, tenant: &str) -> Result<CycleStats> {
        let tickets = self.gateway.actionable_tickets(tenant).await?;
        let mut stats = CycleStats {
            examined: tickets.len(),
            ..CycleStats::default()
        };

        for ticket in tickets {
            match self.process(&ticket).await {
                Ok(outcome) => match outcome {
                    Outcome::Notified => stats.notified += 1,
                    Outcome::Expired => stats.expired += 1,
                    Outcome::NeedsReview => stats.needs_review += 1,
                    Outcome::Skipped => stats.skipped += 1,
                },
                // One bad ticket never stops the cycle
                Err(e) => {
                    warn!(ticket_id = ticket.id, error = %e, "ticket processing failed");
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn process(&self, ticket: &CallbackTicket) -> Result<Outcome> {
        let now = Utc::now();

        // Exhausted notifications go to a human queue
        if ticket.notification_count >= self.config.max_notifications {
            if self
                .gateway
                .transition(ticket.id, ticket.status, TicketStatus::NeedsReview)
                .await?
            {
                info!(ticket_id = ticket.id, "ticket moved to needs_review");
                return Ok(Outcome::NeedsReview);
            }
            return Ok(Outcome::Skipped);
        }

        if !ticket.may_notify(now, chrono::Duration::seconds(self.config.min_interval_secs as i64))
        {
            return Ok(Outcome::Skipped);
        }

        if ticket.is_expired(now) {
            if self
                .gateway
                .transition(ticket.id, ticket.status, TicketStatus::Expired)
                .await?
            {
                info!(ticket_id = ticket.id, "ticket expired");
                return Ok(Outcome::Expired);
            }
            return Ok(Outcome::Skipped);
        }

        if now < ticket.scheduled_at {
            return Ok(Outcome::Skipped);
        }

        let availability = self.probe.check(&ticket.tenant, &ticket.extension).await;
        if !availability.available {
            debug!(
                ticket_id = ticket.id,
                extension = %ticket.extension,
                status = availability.status.as_str(),
                "agent not available yet"
            );
            return Ok(Outcome::Skipped);
        }

        // Notify first; ticket state only moves once delivery succeeded
        self.notifier.notify(ticket).await?;
        self.gateway.record_notification(ticket.id, now).await?;
        if !self
            .gateway
            .transition(ticket.id, ticket.status, TicketStatus::Notified)
            .await?
        {
            // Another actor claimed the ticket mid-notification; harmless
            debug!(ticket_id = ticket.id, "ticket claimed during notification");
            return Ok(Outcome::Skipped);
        }

        info!(
            ticket_id = ticket.id,
            extension = %ticket.extension,
            count = ticket.notification_count + 1,
            "agent notified of waiting callback"
        );
        Ok(Outcome::Notified)
    }
}

enum Outcome {
    Notified,
    Expired,
    NeedsReview,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    use crate::domain::ports::{MockCallControl, MockNotifier, MockTenantConfig};
    use crate::infrastructure::ticketing::InMemoryTicketGateway;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            interval_secs: 60,
            min_interval_secs: 600,
            max_notifications: 3,
            tenants: vec!["acme".to_string()],
        }
    }

    fn available_probe() -> Arc<AvailabilityProbe> {
        let mut control = MockCallControl::new();
        control.expect_is_connected().return_const(true);
        control.expect_is_registered().returning(|_, _| Ok(true));
        control
            .expect_active_channels()
            .returning(|| Ok("0 total.".to_string()));
        let mut tenants = MockTenantConfig::new();
        tenants.expect_is_dnd().returning(|_, _| Ok(false));
        Arc::new(AvailabilityProbe::new(Arc::new(control), Arc::new(tenants)))
    }

    fn offline_probe() -> Arc<AvailabilityProbe> {
        let mut control = MockCallControl::new();
        control.expect_is_connected().return_const(false);
        Arc::new(AvailabilityProbe::new(
            Arc::new(control),
            Arc::new(MockTenantConfig::new()),
        ))
    }

    fn ticket(
        gateway: &InMemoryTicketGateway,
        id: i64,
        status: TicketStatus,
        scheduled_at: DateTime<Utc>,
    ) {
        let now = Utc::now();
        gateway.insert(crate::domain::callback::CallbackTicket {
            id,
            tenant: "acme".to_string(),
            number: "+5511999990000".to_string(),
            extension: "1001".to_string(),
            reason: None,
            scheduled_at,
            expires_at: scheduled_at + Duration::hours(4),
            status,
            notification_count: 0,
            last_notified_at: None,
            attempts: 0,
            created_at: now,
        });
    }

    #[tokio::test]
    async fn test_notifies_available_agent() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(&gateway, 1, TicketStatus::Pending, Utc::now());

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_| Ok(()));

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(notifier),
            available_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();

        assert_eq!(stats.notified, 1);
        let t = gateway.get(1).unwrap();
        assert_eq!(t.status, TicketStatus::Notified);
        assert_eq!(t.notification_count, 1);
        assert!(t.last_notified_at.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_agent_skipped() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(&gateway, 1, TicketStatus::Pending, Utc::now());

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(notifier),
            offline_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(gateway.get(1).unwrap().status, TicketStatus::Pending);
    }

    #[tokio::test]
    async fn test_min_interval_paces_renotification() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(&gateway, 1, TicketStatus::Notified, Utc::now());
        {
            // Recently notified
            let mut t = gateway.get(1).unwrap();
            t.last_notified_at = Some(Utc::now() - Duration::seconds(30));
            t.notification_count = 1;
            gateway.insert(t);
        }

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(notifier),
            available_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_expired_ticket_not_notified() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(
            &gateway,
            1,
            TicketStatus::Pending,
            Utc::now() - Duration::hours(5),
        );

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(notifier),
            available_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();

        assert_eq!(stats.expired, 1);
        assert_eq!(gateway.get(1).unwrap().status, TicketStatus::Expired);
    }

    #[tokio::test]
    async fn test_max_notifications_moves_to_needs_review() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(&gateway, 1, TicketStatus::Notified, Utc::now());
        {
            let mut t = gateway.get(1).unwrap();
            t.notification_count = 3;
            gateway.insert(t);
        }

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(notifier),
            available_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();

        assert_eq!(stats.needs_review, 1);
        assert_eq!(gateway.get(1).unwrap().status, TicketStatus::NeedsReview);
    }

    #[tokio::test]
    async fn test_notifier_failure_leaves_ticket_untouched() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(&gateway, 1, TicketStatus::Pending, Utc::now());

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_| {
            Err(crate::domain::shared::CoreError::ExternalService(
                "delivery down".to_string(),
            ))
        });

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(notifier),
            available_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();

        // The failure is absorbed; state is untouched for the next cycle
        assert_eq!(stats.skipped, 1);
        let t = gateway.get(1).unwrap();
        assert_eq!(t.status, TicketStatus::Pending);
        assert_eq!(t.notification_count, 0);
    }

    #[tokio::test]
    async fn test_future_scheduled_ticket_waits() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(
            &gateway,
            1,
            TicketStatus::Pending,
            Utc::now() + Duration::hours(1),
        );

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(notifier),
            available_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_only_pollable_tickets_examined() {
        let gateway = Arc::new(InMemoryTicketGateway::new());
        ticket(&gateway, 1, TicketStatus::InProgress, Utc::now());
        ticket(&gateway, 2, TicketStatus::Completed, Utc::now());

        let scheduler = CallbackScheduler::new(
            gateway.clone(),
            Arc::new(MockNotifier::new()),
            available_probe(),
            config(),
        );
        let stats = scheduler.poll_once("acme").await.unwrap();
        assert_eq!(stats.examined, 0);
    }
}
