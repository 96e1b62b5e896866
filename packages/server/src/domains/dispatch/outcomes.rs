use serde::{Deserialize, Serialize};

/// Why an accept did not win. Expected outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptDecline {
    /// Another provider won the race
    #[serde(rename = "already taken")]
    AlreadyTaken,
    /// The caller's request is missing or no longer pending
    #[serde(rename = "expired")]
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptOutcome {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AcceptDecline>,
}

impl AcceptOutcome {
    pub fn won() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn declined(reason: AcceptDecline) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOutcome {
    /// The rejection was the last pending request and the booking expired
    pub booking_expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decline_wire_format() {
        let json = serde_json::to_value(AcceptOutcome::declined(AcceptDecline::AlreadyTaken)).unwrap();
        assert_eq!(json, serde_json::json!({"accepted": false, "reason": "already taken"}));

        let json = serde_json::to_value(AcceptOutcome::won()).unwrap();
        assert_eq!(json, serde_json::json!({"accepted": true}));
    }
}
