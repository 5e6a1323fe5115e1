//! Protocol events
//!
//! Typed view over the key/value event blocks delivered by the switching
//! platform. Only the event kinds the core reacts to get a variant; anything
//! else is carried as `Other` so handlers can still filter on it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::transfer::HangupCause;

/// Event kinds the core subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ChannelCreate,
    ChannelProgress,
    ChannelAnswer,
    ChannelBridge,
    ChannelHangup,
    BackgroundJob,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ChannelCreate => "CHANNEL_CREATE",
            EventKind::ChannelProgress => "CHANNEL_PROGRESS",
            EventKind::ChannelAnswer => "CHANNEL_ANSWER",
            EventKind::ChannelBridge => "CHANNEL_BRIDGE",
            EventKind::ChannelHangup => "CHANNEL_HANGUP",
            EventKind::BackgroundJob => "BACKGROUND_JOB",
            EventKind::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "CHANNEL_CREATE" => EventKind::ChannelCreate,
            "CHANNEL_PROGRESS" => EventKind::ChannelProgress,
            "CHANNEL_ANSWER" => EventKind::ChannelAnswer,
            "CHANNEL_BRIDGE" => EventKind::ChannelBridge,
            "CHANNEL_HANGUP" => EventKind::ChannelHangup,
            "BACKGROUND_JOB" => EventKind::BackgroundJob,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// One event off the wire: kind, owning leg, raw headers, optional payload
/// (background-job events carry the job result as their payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEvent {
    pub kind: EventKind,
    /// Leg the event belongs to, when the platform attaches one
    pub leg: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl ProtocolEvent {
    pub fn new(kind: EventKind, leg: Option<String>) -> Self {
        Self {
            kind,
            leg,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    /// Termination cause on hangup events.
    pub fn hangup_cause(&self) -> Option<HangupCause> {
        self.header("Hangup-Cause")
            .map(|c| c.parse().expect("hangup cause parsing is infallible"))
    }

    pub fn caller_id_number(&self) -> Option<&str> {
        self.header("Caller-Caller-ID-Number")
    }

    pub fn job_id(&self) -> Option<&str> {
        self.header("Job-UUID")
    }

    /// Whether this event passes a (kinds, leg) filter.
    pub fn matches(&self, kinds: &[EventKind], leg: Option<&str>) -> bool {
        if !kinds.is_empty() && !kinds.contains(&self.kind) {
            return false;
        }
        match (leg, &self.leg) {
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        assert_eq!(EventKind::from_name("CHANNEL_ANSWER"), EventKind::ChannelAnswer);
        assert_eq!(EventKind::ChannelAnswer.as_str(), "CHANNEL_ANSWER");
        assert_eq!(
            EventKind::from_name("CUSTOM_THING"),
            EventKind::Other("CUSTOM_THING".to_string())
        );
    }

    #[test]
    fn test_hangup_cause_header() {
        let event = ProtocolEvent::new(EventKind::ChannelHangup, Some("leg-1".to_string()))
            .with_header("Hangup-Cause", "USER_BUSY");
        assert_eq!(
            event.hangup_cause(),
            Some(HangupCause::UserBusy)
        );
    }

    #[test]
    fn test_filter_matching() {
        let event = ProtocolEvent::new(EventKind::ChannelAnswer, Some("leg-1".to_string()));

        assert!(event.matches(&[EventKind::ChannelAnswer], Some("leg-1")));
        assert!(event.matches(&[], Some("leg-1")));
        assert!(event.matches(&[EventKind::ChannelAnswer], None));
        assert!(!event.matches(&[EventKind::ChannelHangup], Some("leg-1")));
        assert!(!event.matches(&[EventKind::ChannelAnswer], Some("leg-2")));

        let no_leg = ProtocolEvent::new(EventKind::BackgroundJob, None);
        assert!(no_leg.matches(&[EventKind::BackgroundJob], None));
        assert!(!no_leg.matches(&[EventKind::BackgroundJob], Some("leg-1")));
    }
}
