//! Extension availability

use serde::{Deserialize, Serialize};

/// Observed state of an agent extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    Available,
    InCall,
    Dnd,
    Offline,
}

impl ExtensionStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ExtensionStatus::Available)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExtensionStatus::Available => "available",
            ExtensionStatus::InCall => "in_call",
            ExtensionStatus::Dnd => "dnd",
            ExtensionStatus::Offline => "offline",
        }
    }
}

/// Result of a composite availability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub extension: String,
    pub status: ExtensionStatus,
    pub available: bool,
    pub reason: Option<String>,
}

impl Availability {
    pub fn available(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            status: ExtensionStatus::Available,
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(
        extension: impl Into<String>,
        status: ExtensionStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            extension: extension.into(),
            status,
            available: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_available_is_available() {
        assert!(ExtensionStatus::Available.is_available());
        assert!(!ExtensionStatus::InCall.is_available());
        assert!(!ExtensionStatus::Dnd.is_available());
        assert!(!ExtensionStatus::Offline.is_available());
    }

    #[test]
    fn test_unavailable_carries_reason() {
        let a = Availability::unavailable("1001", ExtensionStatus::Offline, "not registered");
        assert!(!a.available);
        assert_eq!(a.status, ExtensionStatus::Offline);
        assert_eq!(a.reason.as_deref(), Some("not registered"));
    }
}
