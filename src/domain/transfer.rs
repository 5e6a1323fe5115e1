//! Transfer state machine types
//!
//! `TransferStatus` is the terminal outcome reported to the caller-facing
//! session. Hangup causes delivered by the switching platform map onto it
//! through a total lookup: every defined cause yields exactly one status and
//! anything unrecognized falls through to `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::destination::TransferDestination;

/// Outcome of a transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Waiting to start
    Pending,
    /// Candidate leg is ringing
    Ringing,
    /// Candidate answered, bridge not yet up
    Answered,
    /// Bridge established
    Success,
    /// Destination busy on another call
    Busy,
    /// Rang until timeout
    NoAnswer,
    /// Do-not-disturb active
    Dnd,
    /// Extension not registered
    Offline,
    /// Call actively rejected by the destination
    Rejected,
    /// Destination unavailable for another reason (e.g. outside hours)
    Unavailable,
    /// Technical failure
    Failed,
    /// Caller hung up while the transfer was in flight
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TransferStatus::Pending | TransferStatus::Ringing | TransferStatus::Answered
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Ringing => "ringing",
            TransferStatus::Answered => "answered",
            TransferStatus::Success => "success",
            TransferStatus::Busy => "busy",
            TransferStatus::NoAnswer => "no_answer",
            TransferStatus::Dnd => "dnd",
            TransferStatus::Offline => "offline",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Unavailable => "unavailable",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

/// Hangup cause codes delivered by the switching platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HangupCause {
    NormalClearing,
    NormalUnspecified,
    UserBusy,
    NormalCircuitCongestion,
    NoAnswer,
    NoUserResponse,
    OriginatorCancel,
    AllottedTimeout,
    CallRejected,
    UserChallenge,
    SubscriberAbsent,
    UserNotRegistered,
    UnallocatedNumber,
    NoRouteDestination,
    DoNotDisturb,
    DestinationOutOfOrder,
    NetworkOutOfOrder,
    TemporaryFailure,
    SwitchCongestion,
    MediaTimeout,
    GatewayDown,
    InvalidGateway,
    LoseRace,
    PickedOff,
    ManagerRequest,
    BearercapabilityNotavail,
    FacilityNotSubscribed,
    IncomingCallBarred,
    OutgoingCallBarred,
    /// Any cause code not in the table above
    Other(String),
}

impl HangupCause {
    /// Map a termination cause to the transfer outcome it represents.
    ///
    /// The mapping is total: unknown causes are technical failures.
    pub fn transfer_status(&self) -> TransferStatus {
        match self {
            HangupCause::NormalClearing | HangupCause::NormalUnspecified => {
                TransferStatus::Success
            }
            HangupCause::UserBusy | HangupCause::NormalCircuitCongestion => TransferStatus::Busy,
            HangupCause::NoAnswer
            | HangupCause::NoUserResponse
            | HangupCause::OriginatorCancel
            | HangupCause::AllottedTimeout => TransferStatus::NoAnswer,
            HangupCause::CallRejected | HangupCause::UserChallenge => TransferStatus::Rejected,
            HangupCause::SubscriberAbsent
            | HangupCause::UserNotRegistered
            | HangupCause::UnallocatedNumber
            | HangupCause::NoRouteDestination => TransferStatus::Offline,
            HangupCause::DoNotDisturb => TransferStatus::Dnd,
            HangupCause::LoseRace | HangupCause::PickedOff | HangupCause::ManagerRequest => {
                TransferStatus::Cancelled
            }
            HangupCause::BearercapabilityNotavail
            | HangupCause::FacilityNotSubscribed
            | HangupCause::IncomingCallBarred
            | HangupCause::OutgoingCallBarred => TransferStatus::Unavailable,
            HangupCause::DestinationOutOfOrder
            | HangupCause::NetworkOutOfOrder
            | HangupCause::TemporaryFailure
            | HangupCause::SwitchCongestion
            | HangupCause::MediaTimeout
            | HangupCause::GatewayDown
            | HangupCause::InvalidGateway => TransferStatus::Failed,
            HangupCause::Other(_) => TransferStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HangupCause::NormalClearing => "NORMAL_CLEARING",
            HangupCause::NormalUnspecified => "NORMAL_UNSPECIFIED",
            HangupCause::UserBusy => "USER_BUSY",
            HangupCause::NormalCircuitCongestion => "NORMAL_CIRCUIT_CONGESTION",
            HangupCause::NoAnswer => "NO_ANSWER",
            HangupCause::NoUserResponse => "NO_USER_RESPONSE",
            HangupCause::OriginatorCancel => "ORIGINATOR_CANCEL",
            HangupCause::AllottedTimeout => "ALLOTTED_TIMEOUT",
            HangupCause::CallRejected => "CALL_REJECTED",
            HangupCause::UserChallenge => "USER_CHALLENGE",
            HangupCause::SubscriberAbsent => "SUBSCRIBER_ABSENT",
            HangupCause::UserNotRegistered => "USER_NOT_REGISTERED",
            HangupCause::UnallocatedNumber => "UNALLOCATED_NUMBER",
            HangupCause::NoRouteDestination => "NO_ROUTE_DESTINATION",
            HangupCause::DoNotDisturb => "DO_NOT_DISTURB",
            HangupCause::DestinationOutOfOrder => "DESTINATION_OUT_OF_ORDER",
            HangupCause::NetworkOutOfOrder => "NETWORK_OUT_OF_ORDER",
            HangupCause::TemporaryFailure => "TEMPORARY_FAILURE",
            HangupCause::SwitchCongestion => "SWITCH_CONGESTION",
            HangupCause::MediaTimeout => "MEDIA_TIMEOUT",
            HangupCause::GatewayDown => "GATEWAY_DOWN",
            HangupCause::InvalidGateway => "INVALID_GATEWAY",
            HangupCause::LoseRace => "LOSE_RACE",
            HangupCause::PickedOff => "PICKED_OFF",
            HangupCause::ManagerRequest => "MANAGER_REQUEST",
            HangupCause::BearercapabilityNotavail => "BEARERCAPABILITY_NOTAVAIL",
            HangupCause::FacilityNotSubscribed => "FACILITY_NOT_SUBSCRIBED",
            HangupCause::IncomingCallBarred => "INCOMING_CALL_BARRED",
            HangupCause::OutgoingCallBarred => "OUTGOING_CALL_BARRED",
            HangupCause::Other(s) => s,
        }
    }
}

impl FromStr for HangupCause {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let cause = match s.trim().to_uppercase().as_str() {
            "NORMAL_CLEARING" => HangupCause::NormalClearing,
            "NORMAL_UNSPECIFIED" => HangupCause::NormalUnspecified,
            "USER_BUSY" => HangupCause::UserBusy,
            "NORMAL_CIRCUIT_CONGESTION" => HangupCause::NormalCircuitCongestion,
            "NO_ANSWER" => HangupCause::NoAnswer,
            "NO_USER_RESPONSE" => HangupCause::NoUserResponse,
            "ORIGINATOR_CANCEL" => HangupCause::OriginatorCancel,
            "ALLOTTED_TIMEOUT" => HangupCause::AllottedTimeout,
            "CALL_REJECTED" => HangupCause::CallRejected,
            "USER_CHALLENGE" => HangupCause::UserChallenge,
            "SUBSCRIBER_ABSENT" => HangupCause::SubscriberAbsent,
            "USER_NOT_REGISTERED" => HangupCause::UserNotRegistered,
            "UNALLOCATED_NUMBER" => HangupCause::UnallocatedNumber,
            "NO_ROUTE_DESTINATION" => HangupCause::NoRouteDestination,
            "DO_NOT_DISTURB" => HangupCause::DoNotDisturb,
            "DESTINATION_OUT_OF_ORDER" => HangupCause::DestinationOutOfOrder,
            "NETWORK_OUT_OF_ORDER" => HangupCause::NetworkOutOfOrder,
            "TEMPORARY_FAILURE" => HangupCause::TemporaryFailure,
            "SWITCH_CONGESTION" => HangupCause::SwitchCongestion,
            "MEDIA_TIMEOUT" => HangupCause::MediaTimeout,
            "GATEWAY_DOWN" => HangupCause::GatewayDown,
            "INVALID_GATEWAY" => HangupCause::InvalidGateway,
            "LOSE_RACE" => HangupCause::LoseRace,
            "PICKED_OFF" => HangupCause::PickedOff,
            "MANAGER_REQUEST" => HangupCause::ManagerRequest,
            "BEARERCAPABILITY_NOTAVAIL" => HangupCause::BearercapabilityNotavail,
            "FACILITY_NOT_SUBSCRIBED" => HangupCause::FacilityNotSubscribed,
            "INCOMING_CALL_BARRED" => HangupCause::IncomingCallBarred,
            "OUTGOING_CALL_BARRED" => HangupCause::OutgoingCallBarred,
            other => HangupCause::Other(other.to_string()),
        };
        Ok(cause)
    }
}

/// Result of one transfer attempt, reported to the session and discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub status: TransferStatus,
    pub destination: Option<TransferDestination>,
    pub hangup_cause: Option<HangupCause>,
    pub candidate_leg: Option<String>,
    pub duration_ms: u64,
    pub retries: u32,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransferResult {
    pub fn new(status: TransferStatus, destination: Option<TransferDestination>) -> Self {
        Self {
            status,
            destination,
            hangup_cause: None,
            candidate_leg: None,
            duration_ms: 0,
            retries: 0,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_cause(mut self, cause: HangupCause) -> Self {
        self.hangup_cause = Some(cause);
        self
    }

    pub fn with_candidate_leg(mut self, leg: impl Into<String>) -> Self {
        self.candidate_leg = Some(leg.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Success
    }

    /// Speakable outcome for the caller-facing session.
    pub fn message(&self) -> String {
        let name = self
            .destination
            .as_ref()
            .map(|d| d.name.as_str())
            .unwrap_or("the agent");

        match self.status {
            TransferStatus::Success => format!("Connecting you with {} now.", name),
            TransferStatus::Busy => format!(
                "{} is on another call right now. Would you like to leave a message so they can call you back?",
                name
            ),
            TransferStatus::NoAnswer => format!(
                "{}'s phone rang but nobody picked up. Would you like to leave a message?",
                name
            ),
            TransferStatus::Dnd => format!(
                "{} has do-not-disturb turned on. Would you like to leave a message?",
                name
            ),
            TransferStatus::Offline => format!(
                "{}'s extension is not connected right now, it is probably switched off or out of reach. Would you like to leave a message?",
                name
            ),
            TransferStatus::Rejected => format!(
                "The call to {} was not accepted. Would you like to leave a message?",
                name
            ),
            TransferStatus::Unavailable => {
                if let Some(err) = &self.error {
                    err.clone()
                } else {
                    format!(
                        "{} is not available at the moment. Would you like to leave a message?",
                        name
                    )
                }
            }
            TransferStatus::Cancelled => "The call was cancelled.".to_string(),
            TransferStatus::Failed => {
                "I could not complete the transfer. Can I help you another way?".to_string()
            }
            TransferStatus::Pending | TransferStatus::Ringing | TransferStatus::Answered => {
                "One moment, I am transferring your call.".to_string()
            }
        }
    }

    /// Whether the session should offer a deferred callback.
    ///
    /// Technical failures also offer one so the caller always has a way out.
    /// A cancelled transfer never does: the caller is gone.
    pub fn should_offer_callback(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Busy
                | TransferStatus::NoAnswer
                | TransferStatus::Dnd
                | TransferStatus::Offline
                | TransferStatus::Rejected
                | TransferStatus::Unavailable
                | TransferStatus::Failed
        )
    }
}
