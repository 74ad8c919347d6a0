//! Live incident list fed by the channel and the poller.

use crate::events::SyncEvent;
use incident_model::Incident;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

#[derive(Clone, Debug, Default)]
pub struct IncidentBoard {
    incidents: HashMap<i64, Incident>,
    flags: HashMap<i64, BTreeSet<i64>>,
}

impl IncidentBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one sync event into the board. Returns whether anything changed.
    pub fn apply(&mut self, event: &SyncEvent) -> bool {
        match event {
            SyncEvent::Created(incident)
            | SyncEvent::Updated(incident)
            | SyncEvent::Resolved(incident) => self.upsert(incident.clone()),
            SyncEvent::Flagged(flag) => self.flags.entry(flag.incident).or_default().insert(flag.id),
            SyncEvent::ConnectionExhausted { .. } => false,
        }
    }

    /// Inserts or replaces by id. A copy older than the one held is ignored,
    /// and a closed incident is never reopened.
    pub fn upsert(&mut self, incident: Incident) -> bool {
        if let Some(existing) = self.incidents.get(&incident.id) {
            if incident.updated_at < existing.updated_at {
                trace!(id = incident.id, "ignoring stale incident copy");
                return false;
            }
            if existing.status.is_terminal() && !incident.status.is_terminal() {
                debug!(id = incident.id, status = %existing.status, "ignoring reopen of closed incident");
                return false;
            }
            if *existing == incident {
                return false;
            }
        }
        self.incidents.insert(incident.id, incident);
        true
    }

    pub fn get(&self, id: i64) -> Option<&Incident> {
        self.incidents.get(&id)
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    pub fn flag_count(&self, id: i64) -> usize {
        self.flags.get(&id).map_or(0, BTreeSet::len)
    }

    /// Highest classification priority first, then severity, then newest.
    pub fn ordered(&self) -> Vec<&Incident> {
        let mut list: Vec<&Incident> = self.incidents.values().collect();
        list.sort_by(|a, b| display_order(a, b));
        list
    }

    pub fn active(&self) -> Vec<&Incident> {
        self.ordered().into_iter().filter(|i| i.is_open()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.incidents.values().filter(|i| i.is_open()).count()
    }
}

fn display_order(a: &Incident, b: &Incident) -> Ordering {
    let priority = |i: &Incident| i.classification.as_ref().map(|c| c.priority);
    match (priority(a), priority(b)) {
        (Some(pa), Some(pb)) => pb.total_cmp(&pa),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.severity.weight().cmp(&a.severity.weight()))
    .then_with(|| b.created_at.cmp(&a.created_at))
    .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, incident};
    use incident_model::{
        Actor, Category, Classification, FlagReason, IncidentFlag, IncidentStatus, Severity,
    };

    fn classified(id: i64, priority: f64) -> Incident {
        let mut i = incident(id, 1);
        i.classification = Some(Classification {
            severity: Severity::High,
            priority,
            category: Category::GeneralEmergency,
            tags: Default::default(),
        });
        i
    }

    fn flag(id: i64, incident: i64) -> IncidentFlag {
        IncidentFlag {
            id,
            incident,
            reason: FlagReason::Duplicate,
            description: String::new(),
            reported_by: Actor {
                id: 2,
                email: "admin@example.org".into(),
                role: "admin".into(),
            },
            created_at: at(5),
            reviewed: false,
        }
    }

    #[test]
    fn newer_copy_wins_and_older_is_ignored() {
        let mut board = IncidentBoard::new();
        assert!(board.apply(&SyncEvent::Created(incident(1, 10))));

        let mut stale = incident(1, 5);
        stale.title = "stale".into();
        assert!(!board.apply(&SyncEvent::Updated(stale)));

        let mut fresh = incident(1, 20);
        fresh.title = "fresh".into();
        assert!(board.apply(&SyncEvent::Updated(fresh)));
        assert_eq!(board.get(1).map(|i| i.title.as_str()), Some("fresh"));

        assert!(!board.apply(&SyncEvent::Updated(board.get(1).cloned().unwrap())));
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn resolved_incidents_stay_closed() {
        let mut board = IncidentBoard::new();
        board.upsert(incident(4, 10));
        let mut resolved = incident(4, 20);
        resolved.status = IncidentStatus::Resolved;
        assert!(board.apply(&SyncEvent::Resolved(resolved)));

        let reopened = incident(4, 30);
        assert!(!board.upsert(reopened));
        assert_eq!(board.get(4).map(|i| i.status), Some(IncidentStatus::Resolved));
        assert!(board.active().is_empty());
        assert_eq!(board.active_count(), 0);
    }

    #[test]
    fn flags_are_counted_once_per_id() {
        let mut board = IncidentBoard::new();
        assert!(board.apply(&SyncEvent::Flagged(flag(1, 9))));
        assert!(!board.apply(&SyncEvent::Flagged(flag(1, 9))));
        assert!(board.apply(&SyncEvent::Flagged(flag(2, 9))));
        assert_eq!(board.flag_count(9), 2);
        assert_eq!(board.flag_count(10), 0);
        assert!(!board.apply(&SyncEvent::ConnectionExhausted { attempts: 5 }));
    }

    #[test]
    fn ordering_prefers_priority_then_severity_then_recency() {
        let mut board = IncidentBoard::new();
        board.upsert(classified(1, 1.5));
        board.upsert(classified(2, 2.1));

        let mut extreme = incident(3, 1);
        extreme.severity = Severity::Extreme;
        board.upsert(extreme);

        let mut older = incident(4, 1);
        older.created_at = at(-100);
        board.upsert(older);
        board.upsert(incident(5, 1));

        let ids: Vec<i64> = board.ordered().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 1, 3, 5, 4]);
    }
}
