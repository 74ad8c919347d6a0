//! Watermark polling against the `check_updates` endpoint.
//!
//! Used when the realtime channel is down or unauthenticated. Each tick asks
//! for everything changed since the watermark. Only one request is ever in
//! flight: ticks that arrive during a slow request collapse into one.

use crate::credentials::TokenSource;
use crate::dispatcher::{Dispatcher, SubscriptionId};
use crate::error::Result;
use crate::events::{EventKind, SyncEvent};
use crate::scheduler::Scheduler;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use incident_model::UpdateBatch;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Anything that can answer "what changed since T".
pub trait UpdateSource: Send + Sync + 'static {
    fn updates_since(
        &self,
        since: DateTime<Utc>,
        token: &str,
    ) -> BoxFuture<'static, Result<UpdateBatch>>;
}

/// Last server timestamp that came back with changes. Never moves backwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Watermark(Option<DateTime<Utc>>);

impl Watermark {
    /// Value for the next request; the Unix epoch before the first change.
    pub fn since(&self) -> DateTime<Utc> {
        self.0.unwrap_or_default()
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    pub fn advance(&mut self, timestamp: DateTime<Utc>) -> bool {
        match self.0 {
            Some(current) if timestamp <= current => false,
            _ => {
                self.0 = Some(timestamp);
                true
            }
        }
    }
}

/// ISO-8601 with milliseconds, e.g. `1970-01-01T00:00:00.000Z`.
pub fn format_since(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5_000),
        }
    }
}

struct Running {
    task: JoinHandle<()>,
    live: Arc<AtomicBool>,
}

pub struct PollingSync {
    config: PollingConfig,
    source: Arc<dyn UpdateSource>,
    tokens: Arc<dyn TokenSource>,
    scheduler: Arc<dyn Scheduler>,
    dispatcher: Arc<Dispatcher<SyncEvent>>,
    watermark: Arc<Mutex<Watermark>>,
    running: Mutex<Option<Running>>,
}

impl PollingSync {
    pub fn new(
        config: PollingConfig,
        source: Arc<dyn UpdateSource>,
        tokens: Arc<dyn TokenSource>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            config,
            source,
            tokens,
            scheduler,
            dispatcher: Arc::new(Dispatcher::new()),
            watermark: Arc::new(Mutex::new(Watermark::default())),
            running: Mutex::new(None),
        }
    }

    /// Polls once right away, then every interval. Returns `false` when
    /// already running or when there is no credential.
    pub fn start(&self) -> bool {
        let mut running = lock(&self.running);
        if running.as_ref().is_some_and(|r| r.live.load(Ordering::SeqCst)) {
            return false;
        }
        if self.tokens.token().is_none() {
            debug!("no credential; polling not started");
            return false;
        }

        let live = Arc::new(AtomicBool::new(true));
        let worker = PollWorker {
            source: Arc::clone(&self.source),
            tokens: Arc::clone(&self.tokens),
            dispatcher: Arc::clone(&self.dispatcher),
            watermark: Arc::clone(&self.watermark),
            live: Arc::clone(&live),
        };
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let timer = self.scheduler.every(
            self.config.interval,
            Box::new(move || {
                let _ = tick_tx.send(());
            }),
        );
        let task = tokio::spawn(async move {
            let _timer = timer;
            worker.run(ticks).await;
        });
        info!(interval_ms = self.config.interval.as_millis() as u64, "polling started");
        *running = Some(Running { task, live });
        true
    }

    /// Cancels the timer and any request in flight and drops all subscribers.
    pub fn stop(&self) {
        if let Some(running) = lock(&self.running).take() {
            running.live.store(false, Ordering::SeqCst);
            running.task.abort();
            info!("polling stopped");
        }
        self.dispatcher.clear();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|r| r.live.load(Ordering::SeqCst))
    }

    pub fn watermark(&self) -> Watermark {
        *lock(&self.watermark)
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(kind, id)
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.dispatcher.handler_count(kind)
    }
}

impl Drop for PollingSync {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.running).take() {
            running.task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PollWorker {
    source: Arc<dyn UpdateSource>,
    tokens: Arc<dyn TokenSource>,
    dispatcher: Arc<Dispatcher<SyncEvent>>,
    watermark: Arc<Mutex<Watermark>>,
    live: Arc<AtomicBool>,
}

impl PollWorker {
    async fn run(self, mut ticks: mpsc::UnboundedReceiver<()>) {
        let mut keep_going = self.poll_once().await;
        while keep_going && ticks.recv().await.is_some() {
            let mut skipped = 0usize;
            while ticks.try_recv().is_ok() {
                skipped += 1;
            }
            if skipped > 0 {
                trace!(skipped, "coalesced poll ticks");
            }
            keep_going = self.poll_once().await;
        }
        self.live.store(false, Ordering::SeqCst);
    }

    /// One request. Returns `false` once the credential is gone.
    async fn poll_once(&self) -> bool {
        let Some(token) = self.tokens.token() else {
            info!("credential removed; polling stopped");
            return false;
        };
        let since = lock(&self.watermark).since();
        let batch = match self.source.updates_since(since, &token).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, since = %format_since(since), "poll failed; retrying next tick");
                return true;
            }
        };
        if batch.updates.is_empty() {
            trace!(since = %format_since(since), "poll returned no changes");
            return true;
        }

        let advanced = lock(&self.watermark).advance(batch.timestamp);
        debug!(
            count = batch.updates.len(),
            advanced,
            timestamp = %format_since(batch.timestamp),
            "poll returned changes"
        );
        for incident in batch.updates {
            if !self.live.load(Ordering::SeqCst) {
                break;
            }
            self.dispatcher.dispatch(&SyncEvent::Updated(incident));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{SharedToken, StaticToken};
    use crate::scheduler::TokioScheduler;
    use crate::test_support::{at, incident, settle, FakeSource};

    fn poller(source: Arc<FakeSource>, tokens: Arc<dyn TokenSource>) -> PollingSync {
        PollingSync::new(PollingConfig::default(), source, tokens, Arc::new(TokioScheduler))
    }

    fn collect(poller: &PollingSync) -> Arc<Mutex<Vec<i64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        poller.subscribe(EventKind::IncidentUpdated, move |event| {
            if let Some(incident) = event.incident() {
                sink.lock().unwrap().push(incident.id);
            }
        });
        seen
    }

    #[test]
    fn watermark_starts_at_epoch_and_never_regresses() {
        let mut mark = Watermark::default();
        assert_eq!(format_since(mark.since()), "1970-01-01T00:00:00.000Z");
        assert!(mark.advance(at(10)));
        assert!(!mark.advance(at(5)));
        assert!(!mark.advance(at(10)));
        assert_eq!(mark.last(), Some(at(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_on_interval() {
        let source = Arc::new(FakeSource::default());
        let poller = poller(Arc::clone(&source), Arc::new(StaticToken::new("tok")));
        assert!(poller.start());
        assert!(!poller.start());
        settle().await;
        assert_eq!(source.calls(), vec![at(0)]);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(source.calls().len(), 2);
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(source.calls().len(), 4);
        assert_eq!(source.tokens(), vec!["tok".to_string(); 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn changes_dispatch_in_order_and_move_the_watermark() {
        let source = Arc::new(FakeSource::default());
        source.respond(Ok((10, vec![incident(1, 1), incident(2, 2), incident(3, 3)])));
        source.respond(Ok((5, vec![incident(4, 4)])));
        source.respond(Ok((20, vec![])));
        source.respond(Err(503));
        let poller = poller(Arc::clone(&source), Arc::new(StaticToken::new("tok")));
        let seen = collect(&poller);

        poller.start();
        tokio::time::sleep(Duration::from_millis(20_500)).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(poller.watermark().last(), Some(at(10)));
        assert_eq!(source.calls(), vec![at(0), at(10), at(10), at(10), at(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_never_overlap() {
        let source = Arc::new(FakeSource::with_latency(Duration::from_secs(12)));
        let poller = poller(Arc::clone(&source), Arc::new(StaticToken::new("tok")));
        poller.start();
        // requests start at 0, 12, 24, 36 and 48 seconds
        tokio::time::sleep(Duration::from_secs(50)).await;

        assert_eq!(source.max_in_flight(), 1);
        assert_eq!(source.calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn no_credential_no_polling() {
        let source = Arc::new(FakeSource::default());
        let poller = poller(Arc::clone(&source), Arc::new(StaticToken::none()));
        assert!(!poller.start());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(source.calls().is_empty());
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_halts_polling() {
        let source = Arc::new(FakeSource::default());
        let tokens = SharedToken::new(Some("tok".into()));
        let poller = poller(Arc::clone(&source), Arc::new(tokens.clone()));
        poller.start();
        settle().await;
        assert!(poller.is_running());

        tokens.clear();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls().len(), 1);
        assert!(!poller.is_running());

        tokens.set("tok-2");
        assert!(poller.start());
        settle().await;
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_timer_and_subscribers() {
        let source = Arc::new(FakeSource::default());
        let poller = poller(Arc::clone(&source), Arc::new(StaticToken::new("tok")));
        let seen = collect(&poller);
        poller.start();
        settle().await;

        poller.stop();
        poller.stop();
        source.respond(Ok((50, vec![incident(9, 9)])));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(source.calls().len(), 1);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(poller.dispatcher.handler_count(EventKind::IncidentUpdated), 0);
        assert!(!poller.is_running());
    }
}
