//! Fakes shared by the unit tests: an in-memory connector, a scheduler that
//! records the delays it was asked for, and a scripted update source.

use crate::error::{Result, SyncError, TransportError};
use crate::polling::UpdateSource;
use crate::scheduler::{Scheduler, TickFn, TimerFn, TimerHandle, TokioScheduler};
use crate::transport::{Connection, Connector, Outbound, Peer};
use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use incident_model::{Actor, Incident, IncidentStatus, Severity, UpdateBatch};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// Lets every ready task run without moving the paused clock meaningfully.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub(crate) fn incident(id: i64, updated_secs: i64) -> Incident {
    Incident {
        id,
        title: format!("Incident {id}"),
        description: "reported from the field".into(),
        location: "Sector 4".into(),
        incident_type: "FLOOD".into(),
        severity: Severity::Moderate,
        status: IncidentStatus::Pending,
        created_by: Actor {
            id: 1,
            email: "responder@example.org".into(),
            role: "citizen".into(),
        },
        created_at: at(0),
        updated_at: at(updated_secs),
        classification: None,
    }
}

/// Drains the text frames the client has written so far.
pub(crate) fn texts(peer: &mut Peer) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(frame) = peer.outgoing.try_recv() {
        if let Outbound::Text(text) = frame {
            out.push(text);
        }
    }
    out
}

/// Accepts by default; `refuse_next` queues refusals. Accepted peers are
/// handed to the test through the receiver returned by `new`.
pub(crate) struct MockConnector {
    attempts: Mutex<Vec<(Instant, Url)>>,
    refusals: Mutex<usize>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            refusals: Mutex::new(0),
            peers,
        });
        (connector, rx)
    }

    pub(crate) fn refuse_next(&self, count: usize) {
        *self.refusals.lock().unwrap() += count;
    }

    pub(crate) fn urls(&self) -> Vec<Url> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        url: Url,
    ) -> BoxFuture<'static, std::result::Result<Connection, TransportError>> {
        self.attempts.lock().unwrap().push((Instant::now(), url));
        let refused = {
            let mut refusals = self.refusals.lock().unwrap();
            if *refusals > 0 {
                *refusals -= 1;
                true
            } else {
                false
            }
        };
        let result = if refused {
            Err(TransportError::Refused("connection refused".into()))
        } else {
            let (connection, peer) = Connection::pair();
            let _ = self.peers.send(peer);
            Ok(connection)
        };
        Box::pin(futures::future::ready(result))
    }
}

/// Tokio-backed scheduler that remembers every one-shot delay requested.
#[derive(Default)]
pub(crate) struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn after(&self, delay: Duration, task: TimerFn) -> TimerHandle {
        self.delays.lock().unwrap().push(delay);
        TokioScheduler.after(delay, task)
    }

    fn every(&self, period: Duration, task: TickFn) -> TimerHandle {
        TokioScheduler.every(period, task)
    }

    fn now(&self) -> Instant {
        TokioScheduler.now()
    }
}

type Scripted = std::result::Result<(i64, Vec<Incident>), u16>;

/// Scripted `check_updates`. Unscripted calls return an empty batch.
#[derive(Default)]
pub(crate) struct FakeSource {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<(DateTime<Utc>, String)>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeSource {
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// `Ok((timestamp_secs, updates))` or `Err(http_status)`.
    pub(crate) fn respond(&self, response: Scripted) {
        self.script.lock().unwrap().push_back(response);
    }

    pub(crate) fn calls(&self) -> Vec<DateTime<Utc>> {
        self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub(crate) fn tokens(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl UpdateSource for FakeSource {
    fn updates_since(
        &self,
        since: DateTime<Utc>,
        token: &str,
    ) -> BoxFuture<'static, Result<UpdateBatch>> {
        self.calls.lock().unwrap().push((since, token.to_string()));
        let scripted = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok((0, Vec::new())));
        let latency = self.latency;
        let in_flight = Arc::clone(&self.in_flight);
        let max_in_flight = Arc::clone(&self.max_in_flight);
        Box::pin(async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            match scripted {
                Ok((secs, updates)) => Ok(UpdateBatch {
                    timestamp: at(secs),
                    updates,
                }),
                Err(status) => Err(SyncError::Status {
                    status,
                    body: "unavailable".into(),
                }),
            }
        })
    }
}
