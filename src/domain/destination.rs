//! Transfer destination model
//!
//! A destination is where a caller can be handed off to: an internal
//! extension, a ring group, a FIFO queue or an external number. Destinations
//! are configured per tenant by the admin side and consumed read-only here.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::shared::{CoreError, Result};

/// Typed routing target. Each variant knows how to build its own dial string,
/// so an invalid type/field combination cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Routing {
    /// Internal extension, resolved through the platform directory
    Extension { number: String, context: String },
    /// Ring group (several extensions ring together)
    RingGroup { number: String, context: String },
    /// FIFO call queue
    Queue { name: String, context: String },
    /// External number dialed through a gateway
    External { number: String, gateway: String },
}

impl Routing {
    /// Build the originate dial string for this target.
    ///
    /// `user/` lets the platform resolve the extension to the registered
    /// softphone address; groups and queues use their own schemes.
    pub fn dial_string(&self) -> Result<String> {
        match self {
            Routing::Extension { number, context } => {
                if number.is_empty() || context.is_empty() {
                    return Err(CoreError::InvalidDialString(
                        "extension requires number and context".to_string(),
                    ));
                }
                Ok(format!("user/{}@{}", number, context))
            }
            Routing::RingGroup { number, context } => {
                if number.is_empty() || context.is_empty() {
                    return Err(CoreError::InvalidDialString(
                        "ring group requires number and context".to_string(),
                    ));
                }
                Ok(format!("group/{}@{}", number, context))
            }
            Routing::Queue { name, context } => {
                if name.is_empty() || context.is_empty() {
                    return Err(CoreError::InvalidDialString(
                        "queue requires name and context".to_string(),
                    ));
                }
                Ok(format!("fifo/{}@{}", name, context))
            }
            Routing::External { number, gateway } => {
                if number.is_empty() || gateway.is_empty() {
                    return Err(CoreError::InvalidDialString(
                        "external requires number and gateway".to_string(),
                    ));
                }
                Ok(format!("sofia/gateway/{}/{}", gateway, number))
            }
        }
    }

    /// Extension number when this target is an internal extension.
    pub fn extension(&self) -> Option<&str> {
        match self {
            Routing::Extension { number, .. } => Some(number),
            _ => None,
        }
    }
}

/// What to do when the destination cannot take the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    /// Offer a deferred callback ticket
    OfferCallback,
    /// Send the caller to voicemail
    Voicemail,
    /// Report the failure and return to the attendant
    None,
}

impl Default for FallbackAction {
    fn default() -> Self {
        FallbackAction::OfferCallback
    }
}

/// One weekly time range. An empty day list means every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursRange {
    pub days: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl HoursRange {
    pub fn new(days: Vec<Weekday>, start: NaiveTime, end: NaiveTime) -> Self {
        Self { days, start, end }
    }

    /// Check whether the range covers the given local time.
    pub fn contains(&self, time: NaiveTime, weekday: Weekday) -> bool {
        if !self.days.is_empty() && !self.days.contains(&weekday) {
            return false;
        }

        // Ranges crossing midnight wrap around
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Weekly working-hours schedule. An empty schedule is always open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub ranges: Vec<HoursRange>,
}

impl WorkingHours {
    pub fn always_open() -> Self {
        Self { ranges: vec![] }
    }

    /// Monday to Friday, 9:00-18:00
    pub fn business_hours() -> Self {
        Self {
            ranges: vec![HoursRange::new(
                vec![
                    Weekday::Mon,
                    Weekday::Tue,
                    Weekday::Wed,
                    Weekday::Thu,
                    Weekday::Fri,
                ],
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            )],
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        let time = now.time();
        let weekday = now.weekday();
        self.ranges.iter().any(|r| r.contains(time, weekday))
    }
}

/// A configured transfer destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDestination {
    pub id: Uuid,
    pub name: String,
    /// Department label, matched as a resolution fallback
    pub department: Option<String>,
    /// Spoken aliases, in configuration order
    pub aliases: Vec<String>,
    pub routing: Routing,
    /// Seconds the candidate leg is allowed to ring
    pub ring_timeout_secs: u32,
    pub max_retries: u32,
    pub retry_delay_secs: u32,
    pub fallback: FallbackAction,
    pub working_hours: WorkingHours,
    /// Lower is preferred when several destinations match
    pub priority: u8,
    /// Default destination for generic "anyone available" requests
    pub is_default: bool,
}

impl TransferDestination {
    pub fn new(name: impl Into<String>, routing: Routing) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            department: None,
            aliases: vec![],
            routing,
            ring_timeout_secs: 30,
            max_retries: 1,
            retry_delay_secs: 5,
            fallback: FallbackAction::default(),
            working_hours: WorkingHours::always_open(),
            priority: 100,
            is_default: false,
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_working_hours(mut self, hours: WorkingHours) -> Self {
        self.working_hours = hours;
        self
    }

    pub fn with_ring_timeout(mut self, secs: u32) -> Self {
        self.ring_timeout_secs = secs;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn dial_string(&self) -> Result<String> {
        self.routing.dial_string()
    }
}
