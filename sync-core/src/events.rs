use crate::dispatcher::Dispatchable;
use incident_model::{Incident, IncidentFlag, WireMessage};

/// Dispatch key for [`SyncEvent`] subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    IncidentCreated,
    IncidentUpdated,
    IncidentResolved,
    IncidentFlagged,
    /// The channel gave up reconnecting.
    ConnectionExhausted,
}

impl EventKind {
    pub const INCIDENT_KINDS: [EventKind; 3] = [
        EventKind::IncidentCreated,
        EventKind::IncidentUpdated,
        EventKind::IncidentResolved,
    ];
}

/// What subscribers of a channel or poller receive.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    Created(Incident),
    Updated(Incident),
    Resolved(Incident),
    Flagged(IncidentFlag),
    ConnectionExhausted { attempts: u32 },
}

impl SyncEvent {
    /// Maps a wire frame to a subscriber event. Heartbeats map to `None`.
    pub fn from_wire(message: WireMessage) -> Option<Self> {
        match message {
            WireMessage::IncidentCreate(incident) => Some(SyncEvent::Created(incident)),
            WireMessage::IncidentUpdate(incident) => Some(SyncEvent::Updated(incident)),
            WireMessage::IncidentResolve(incident) => Some(SyncEvent::Resolved(incident)),
            WireMessage::IncidentFlag(flag) => Some(SyncEvent::Flagged(flag)),
            WireMessage::Ping | WireMessage::Pong => None,
        }
    }

    pub fn incident(&self) -> Option<&Incident> {
        match self {
            SyncEvent::Created(incident)
            | SyncEvent::Updated(incident)
            | SyncEvent::Resolved(incident) => Some(incident),
            SyncEvent::Flagged(_) | SyncEvent::ConnectionExhausted { .. } => None,
        }
    }
}

impl Dispatchable for SyncEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            SyncEvent::Created(_) => EventKind::IncidentCreated,
            SyncEvent::Updated(_) => EventKind::IncidentUpdated,
            SyncEvent::Resolved(_) => EventKind::IncidentResolved,
            SyncEvent::Flagged(_) => EventKind::IncidentFlagged,
            SyncEvent::ConnectionExhausted { .. } => EventKind::ConnectionExhausted,
        }
    }
}
