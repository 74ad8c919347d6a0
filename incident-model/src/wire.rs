use crate::{Incident, IncidentFlag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON envelope `{"type": ..., "data": ...}` carried over the realtime
/// channel. `ping` and `pong` never carry data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WireMessage {
    IncidentCreate(Incident),
    IncidentUpdate(Incident),
    IncidentResolve(Incident),
    IncidentFlag(IncidentFlag),
    Ping,
    Pong,
}

impl WireMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::IncidentCreate(_) => "incident_create",
            WireMessage::IncidentUpdate(_) => "incident_update",
            WireMessage::IncidentResolve(_) => "incident_resolve",
            WireMessage::IncidentFlag(_) => "incident_flag",
            WireMessage::Ping => "ping",
            WireMessage::Pong => "pong",
        }
    }
}

/// Response of the `check_updates` poll endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updates: Vec<Incident>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentPage {
    pub results: Vec<Incident>,
    #[serde(default)]
    pub total: u64,
}
