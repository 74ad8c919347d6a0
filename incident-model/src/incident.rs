use crate::{Classification, ModelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tier of an incident, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Extreme,
}

impl Severity {
    /// Weight used by triage priority: `LOW=1` through `EXTREME=4`.
    pub fn weight(self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Moderate => 2,
            Severity::High => 3,
            Severity::Extreme => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Moderate => "MODERATE",
            Severity::High => "HIGH",
            Severity::Extreme => "EXTREME",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Pending,
    InProgress,
    Resolved,
    Cancelled,
}

impl IncidentStatus {
    /// Resolved and cancelled incidents are closed for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Pending => "PENDING",
            IncidentStatus::InProgress => "IN_PROGRESS",
            IncidentStatus::Resolved => "RESOLVED",
            IncidentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub incident_type: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Moves the incident to `next`. Incidents are never reopened once
    /// resolved or cancelled.
    pub fn transition(&mut self, next: IncidentStatus, at: DateTime<Utc>) -> Result<(), ModelError> {
        if self.status.is_terminal() && self.status != next {
            return Err(ModelError::TerminalStatus {
                id: self.id,
                status: self.status,
            });
        }
        if self.status != next {
            self.status = next;
            self.updated_at = at;
        }
        Ok(())
    }
}

/// Append-only note attached to an incident.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentUpdate {
    pub id: i64,
    pub incident: i64,
    pub content: String,
    pub author: Actor,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagReason {
    Duplicate,
    Inaccurate,
    Resolved,
    Inappropriate,
    Other,
}

/// Dispute or escalation raised against an incident.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentFlag {
    pub id: i64,
    pub incident: i64,
    pub reason: FlagReason,
    #[serde(default)]
    pub description: String,
    pub reported_by: Actor,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed: bool,
}

impl IncidentFlag {
    /// Marks the flag reviewed. Returns `false` when it already was.
    pub fn mark_reviewed(&mut self) -> bool {
        if self.reviewed {
            return false;
        }
        self.reviewed = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn incident(status: IncidentStatus) -> Incident {
        let at = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        Incident {
            id: 7,
            title: "Road washed out".into(),
            description: "Bridge approach flooded".into(),
            location: "Castries".into(),
            incident_type: "Flood".into(),
            severity: Severity::High,
            status,
            created_by: Actor {
                id: 1,
                email: "hq@example.org".into(),
                role: "EMERGENCY_PERSONNEL".into(),
            },
            created_at: at,
            updated_at: at,
            classification: None,
        }
    }

    #[test]
    fn terminal_incident_rejects_reopen() {
        let mut inc = incident(IncidentStatus::Resolved);
        let err = inc
            .transition(IncidentStatus::InProgress, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ModelError::TerminalStatus { id: 7, .. }));
        assert_eq!(inc.status, IncidentStatus::Resolved);
    }

    #[test]
    fn transition_bumps_updated_at() {
        let mut inc = incident(IncidentStatus::Pending);
        let later = Utc.with_ymd_and_hms(2024, 9, 1, 13, 0, 0).unwrap();
        inc.transition(IncidentStatus::InProgress, later).unwrap();
        assert_eq!(inc.status, IncidentStatus::InProgress);
        assert_eq!(inc.updated_at, later);
        assert!(inc.is_open());
    }

    #[test]
    fn flag_is_reviewed_once() {
        let mut flag = IncidentFlag {
            id: 3,
            incident: 7,
            reason: FlagReason::Duplicate,
            description: "same as #6".into(),
            reported_by: Actor {
                id: 2,
                email: "citizen@example.org".into(),
                role: "CITIZEN".into(),
            },
            created_at: Utc::now(),
            reviewed: false,
        };
        assert!(flag.mark_reviewed());
        assert!(!flag.mark_reviewed());
        assert!(flag.reviewed);
    }

    #[test]
    fn statuses_use_backend_spelling() {
        let json = serde_json::to_string(&IncidentStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert!(Severity::Extreme > Severity::High);
        assert_eq!(Severity::Moderate.weight(), 2);
    }
}
