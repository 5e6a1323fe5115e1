//! Ports to the switching platform and external collaborators
//!
//! Application services depend on these traits; the concrete implementations
//! live in `infrastructure`. Mocked in unit tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::domain::callback::{CallbackRequest, CallbackTicket, TicketStatus};
use crate::domain::destination::TransferDestination;
use crate::domain::event::{EventKind, ProtocolEvent};
use crate::domain::shared::Result;
use crate::domain::transfer::HangupCause;

/// Which side of a call audio playback targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioChannel {
    ALeg,
    BLeg,
    Both,
}

impl AudioChannel {
    pub fn as_str(&self) -> &str {
        match self {
            AudioChannel::ALeg => "aleg",
            AudioChannel::BLeg => "bleg",
            AudioChannel::Both => "both",
        }
    }
}

/// Parameters for originating a new leg.
#[derive(Debug, Clone)]
pub struct OriginateSpec {
    pub dial_string: String,
    /// Application the leg executes after answering, e.g. "&park()"
    pub app: String,
    pub timeout: Duration,
    pub variables: Vec<(String, String)>,
}

impl OriginateSpec {
    pub fn new(dial_string: impl Into<String>) -> Self {
        Self {
            dial_string: dial_string.into(),
            app: "&park()".to_string(),
            timeout: Duration::from_secs(30),
            variables: vec![],
        }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((key.into(), value.into()));
        self
    }
}

/// Handle to an origination in flight. The leg id is pre-assigned so the
/// caller can watch channel events before the job completes.
#[derive(Debug, Clone)]
pub struct OriginateHandle {
    pub leg_id: String,
    pub job_id: String,
}

/// Call-control surface of the event-socket connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CallControl: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Send a command and await its single correlated reply.
    async fn execute(&self, command: &str) -> Result<String>;

    /// Fire-and-forget; returns the job id whose completion arrives later
    /// as a background-job event.
    async fn execute_background(&self, command: &str) -> Result<String>;

    async fn subscribe(&self, kinds: &[EventKind]) -> Result<()>;

    async fn unsubscribe(&self, kinds: &[EventKind]) -> Result<()>;

    /// Wait for the first event matching (kinds, leg). `None` on timeout.
    async fn wait_for<'a>(
        &self,
        kinds: &[EventKind],
        leg: Option<&'a str>,
        timeout: Duration,
    ) -> Result<Option<ProtocolEvent>>;

    /// Wait for a background job to complete; `None` on timeout.
    async fn wait_job(&self, job_id: &str, timeout: Duration) -> Result<Option<String>>;

    /// Originate a new leg. Non-blocking: failure surfaces later as a
    /// hangup event on the returned leg (or through `wait_job`).
    async fn originate(&self, spec: OriginateSpec) -> Result<OriginateHandle>;

    /// Start looped audio on a leg.
    async fn broadcast_audio(&self, leg: &str, resource: &str, channel: AudioChannel)
        -> Result<()>;

    /// Stop any broadcast audio on a leg.
    async fn stop_audio(&self, leg: &str) -> Result<()>;

    async fn bridge(&self, leg_a: &str, leg_b: &str) -> Result<()>;

    async fn hangup(&self, leg: &str, cause: HangupCause) -> Result<()>;

    async fn leg_exists(&self, leg: &str) -> Result<bool>;

    async fn set_variable(&self, leg: &str, name: &str, value: &str) -> Result<()>;

    async fn get_variable(&self, leg: &str, name: &str) -> Result<Option<String>>;

    /// Whether the extension currently has a registration.
    async fn is_registered(&self, extension: &str, context: &str) -> Result<bool>;

    /// Raw active-channel listing, used for call-membership checks.
    async fn active_channels(&self) -> Result<String>;
}

/// External ticketing collaborator (HTTP). Owns ticket durability; the core
/// only drives transitions and lifecycle reports.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TicketGateway: Send + Sync {
    async fn create_callback<'a>(
        &self,
        tenant: &str,
        call_id: &str,
        extension: &str,
        request: &CallbackRequest,
        transcript: Option<&'a str>,
        summary: Option<&'a str>,
    ) -> Result<i64>;

    /// Tickets in {pending, notified} for a tenant, oldest first.
    async fn actionable_tickets(&self, tenant: &str) -> Result<Vec<CallbackTicket>>;

    /// Compare-and-swap status transition. Returns false when the ticket
    /// was not in `from`, meaning another actor won the race.
    async fn transition(&self, ticket_id: i64, from: TicketStatus, to: TicketStatus)
        -> Result<bool>;

    /// Bump notification_count and stamp last_notified_at.
    async fn record_notification(&self, ticket_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Bump origination attempts, returning the new count.
    async fn increment_attempts(&self, ticket_id: i64) -> Result<u32>;

    async fn report_connected(&self, ticket_id: i64) -> Result<()>;

    async fn report_completed(&self, ticket_id: i64, duration_secs: u64) -> Result<()>;

    async fn report_failed(&self, ticket_id: i64, cause: &str) -> Result<()>;
}

/// Agent-facing notification delivery (WhatsApp etc. behind the collaborator).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, ticket: &CallbackTicket) -> Result<()>;
}

/// Read-only per-tenant destination configuration, owned by the admin side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DestinationSource: Send + Sync {
    async fn load(&self, tenant: &str, secretary: &str) -> Result<Vec<TransferDestination>>;
}

/// Per-secretary transfer settings, configured by the admin side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretarySettings {
    pub default_timeout_secs: u32,
    pub announce_enabled: bool,
    /// Announcement played to the answered agent before bridging
    pub announce_resource: String,
    /// Seconds the answered agent has to hang up (= decline) before bridging
    pub announce_accept_window_secs: u32,
    /// Hold audio resource played to the waiting caller
    pub moh_resource: String,
    /// Keyword that triggers handoff in the conversation loop (not used here,
    /// carried for the session collaborator)
    pub handoff_keyword: String,
    /// Turns without progress before the session offers a handoff
    pub handoff_turn_threshold: u32,
}

impl Default for SecretarySettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            announce_enabled: false,
            announce_resource: "ivr/transfer_announce.wav".to_string(),
            announce_accept_window_secs: 8,
            moh_resource: "local_stream://moh".to_string(),
            handoff_keyword: "attendant".to_string(),
            handoff_turn_threshold: 3,
        }
    }
}

/// Read-only tenant configuration (DND flags, secretary settings).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantConfig: Send + Sync {
    async fn is_dnd(&self, tenant: &str, extension: &str) -> Result<bool>;

    async fn secretary_settings(&self, tenant: &str, secretary: &str)
        -> Result<SecretarySettings>;
}
