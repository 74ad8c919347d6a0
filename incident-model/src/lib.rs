//! Canonical incident records as exchanged with the incident backend.
//!
//! Everything here is plain data plus validation: the REST payloads, the
//! realtime wire envelope, and the triage classification attached to an
//! incident. Behaviour that talks to the network lives in `sync-core`.

mod classification;
mod incident;
mod wire;

pub use classification::{validate_incident_data, Category, Classification, IncidentData};
pub use incident::{
    Actor, FlagReason, Incident, IncidentFlag, IncidentStatus, IncidentUpdate, Severity,
};
pub use wire::{IncidentPage, UpdateBatch, WireMessage};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("incident {id} is {status} and can no longer change status")]
    TerminalStatus { id: i64, status: IncidentStatus },

    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}
