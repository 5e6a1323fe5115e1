//! Deferred callback tickets
//!
//! The ticket record itself is owned by the external ticketing service; the
//! core references it by id and drives its lifecycle. Status transitions are
//! monotonic along a fixed graph and guarded by compare-and-swap at the
//! gateway so the scheduler and an interactive click-to-call can never both
//! act on the same ticket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a callback ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Created, agent not yet notified
    Pending,
    /// Agent notified that the customer is waiting
    Notified,
    /// Agent accepted, call may be placed
    ReadyToCall,
    /// A click-to-call is in flight
    InProgress,
    /// Customer and agent were connected
    Completed,
    /// Past expires_at before completion
    Expired,
    /// Cancelled by customer or agent
    Canceled,
    /// Terminally failed after max attempts
    Failed,
    /// Exceeded max notifications without a response
    NeedsReview,
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketStatus::Completed
                | TicketStatus::Expired
                | TicketStatus::Canceled
                | TicketStatus::Failed
        )
    }

    /// Whether the scheduler should still poll a ticket in this state.
    pub fn is_pollable(&self) -> bool {
        matches!(self, TicketStatus::Pending | TicketStatus::Notified)
    }

    /// Legal next states. Expiry and cancellation are reachable from any
    /// non-terminal state; everything else moves strictly forward.
    pub fn can_transition(&self, to: TicketStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(to, TicketStatus::Expired | TicketStatus::Canceled) {
            return true;
        }
        match self {
            TicketStatus::Pending => matches!(
                to,
                TicketStatus::Notified | TicketStatus::InProgress | TicketStatus::NeedsReview
            ),
            TicketStatus::Notified => matches!(
                to,
                TicketStatus::Notified
                    | TicketStatus::ReadyToCall
                    | TicketStatus::InProgress
                    | TicketStatus::NeedsReview
            ),
            TicketStatus::ReadyToCall => matches!(to, TicketStatus::InProgress),
            // ReadyToCall is the release edge for a failed origination that
            // still has attempts left
            TicketStatus::InProgress => matches!(
                to,
                TicketStatus::Completed | TicketStatus::Failed | TicketStatus::ReadyToCall
            ),
            TicketStatus::NeedsReview => matches!(to, TicketStatus::Pending),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Notified => "notified",
            TicketStatus::ReadyToCall => "ready_to_call",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Completed => "completed",
            TicketStatus::Expired => "expired",
            TicketStatus::Canceled => "canceled",
            TicketStatus::Failed => "failed",
            TicketStatus::NeedsReview => "needs_review",
        }
    }
}

/// External callback ticket, referenced by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackTicket {
    pub id: i64,
    /// Tenant the ticket belongs to
    pub tenant: String,
    /// Customer number in E.164
    pub number: String,
    /// Agent extension that should return the call
    pub extension: String,
    pub reason: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TicketStatus,
    pub notification_count: u32,
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Click-to-call origination attempts
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl CallbackTicket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_at && !self.is_expired(now)
    }

    /// Whether a notification is allowed at `now` given the pacing rules.
    pub fn may_notify(&self, now: DateTime<Utc>, min_interval: chrono::Duration) -> bool {
        match self.last_notified_at {
            Some(last) => now - last >= min_interval,
            None => true,
        }
    }
}

/// Data contract the conversational session supplies when the caller asks
/// for a callback. Capturing these values is dialogue logic and lives
/// outside this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub number: String,
    pub scheduled_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ticket(status: TicketStatus, now: DateTime<Utc>) -> CallbackTicket {
        CallbackTicket {
            id: 1,
            tenant: "acme".to_string(),
            number: "+5511999990000".to_string(),
            extension: "1001".to_string(),
            reason: Some("pricing question".to_string()),
            scheduled_at: now,
            expires_at: now + Duration::hours(4),
            status,
            notification_count: 0,
            last_notified_at: None,
            attempts: 0,
            created_at: now,
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(TicketStatus::Pending.can_transition(TicketStatus::Notified));
        assert!(TicketStatus::Notified.can_transition(TicketStatus::ReadyToCall));
        assert!(TicketStatus::ReadyToCall.can_transition(TicketStatus::InProgress));
        assert!(TicketStatus::InProgress.can_transition(TicketStatus::Completed));
        assert!(TicketStatus::InProgress.can_transition(TicketStatus::Failed));
        // Retry release after a failed origination attempt
        assert!(TicketStatus::InProgress.can_transition(TicketStatus::ReadyToCall));
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!TicketStatus::Notified.can_transition(TicketStatus::Pending));
        assert!(!TicketStatus::InProgress.can_transition(TicketStatus::Notified));
        assert!(!TicketStatus::ReadyToCall.can_transition(TicketStatus::Pending));
    }

    #[test]
    fn test_expired_and_canceled_reachable_from_non_terminal() {
        for status in [
            TicketStatus::Pending,
            TicketStatus::Notified,
            TicketStatus::ReadyToCall,
            TicketStatus::InProgress,
            TicketStatus::NeedsReview,
        ] {
            assert!(status.can_transition(TicketStatus::Expired));
            assert!(status.can_transition(TicketStatus::Canceled));
        }
    }

    #[test]
    fn test_terminal_states_frozen() {
        for status in [
            TicketStatus::Completed,
            TicketStatus::Expired,
            TicketStatus::Canceled,
            TicketStatus::Failed,
        ] {
            assert!(status.is_terminal());
            assert!(!status.can_transition(TicketStatus::Pending));
            assert!(!status.can_transition(TicketStatus::Expired));
        }
    }

    #[test]
    fn test_renotify_allowed_from_notified() {
        // The scheduler re-notifies a still-unanswered ticket after the
        // pacing interval, staying in Notified.
        assert!(TicketStatus::Notified.can_transition(TicketStatus::Notified));
    }

    #[test]
    fn test_may_notify_pacing() {
        let now = Utc::now();
        let mut t = ticket(TicketStatus::Notified, now);

        assert!(t.may_notify(now, Duration::minutes(10)));

        t.last_notified_at = Some(now - Duration::minutes(5));
        assert!(!t.may_notify(now, Duration::minutes(10)));

        t.last_notified_at = Some(now - Duration::minutes(11));
        assert!(t.may_notify(now, Duration::minutes(10)));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        // Schedule anchored on the same instant the test evaluates, so the
        // due check cannot drift across the fixture's own clock read
        let mut t = ticket(TicketStatus::Pending, now);
        assert!(!t.is_expired(now));
        assert!(t.is_due(now));

        t.expires_at = now - Duration::minutes(1);
        assert!(t.is_expired(now));
        assert!(!t.is_due(now));
    }
}
