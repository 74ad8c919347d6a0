//! Persistent realtime channel.
//!
//! [`Channel`] is a cheap handle; all mutable state (link, outbound queue,
//! attempt counter, last pong) lives in a single worker task that drains a
//! mailbox. Timers and the in-flight connect only post commands into that
//! mailbox, and every connection carries a generation number so events from
//! a superseded connection are dropped.
//!
//! Lifecycle: `DISCONNECTED -> CONNECTING -> CONNECTED -> (CLOSING) -> DISCONNECTED`.
//! An unexpected close schedules a reconnect after `initial_delay * 2^attempt`
//! until `max_attempts` consecutive failures, at which point subscribers of
//! [`EventKind::ConnectionExhausted`] are told and the channel stays idle
//! until [`Channel::connect`] is called.

use crate::credentials::TokenSource;
use crate::dispatcher::{Dispatcher, SubscriptionId};
use crate::error::{Result, SyncError, TransportError};
use crate::events::{EventKind, SyncEvent};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::transport::{redacted, ws_endpoint, Connection, Connector, Inbound, Outbound};
use incident_model::WireMessage;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before retry number `attempt` (zero based), or `None` once the
    /// budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt)?;
        self.initial_delay.checked_mul(factor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Base URL of the realtime endpoint; `http(s)` is rewritten to `ws(s)`.
    pub endpoint: String,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatPolicy,
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
        }
    }
}

enum Command {
    Start,
    Connect,
    Send(String),
    Connected {
        generation: u64,
        result: std::result::Result<Connection, TransportError>,
    },
    Frame(Option<Inbound>),
    ReconnectDue,
    HeartbeatTick {
        generation: u64,
    },
    PongOverdue {
        generation: u64,
    },
}

/// State shared between handle and worker. Once closed, the worker can no
/// longer publish; both sides mutate under the watch lock.
#[derive(Debug)]
struct StateCell {
    tx: watch::Sender<ConnectionState>,
    closed: AtomicBool,
}

impl StateCell {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    fn publish(&self, next: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if self.closed.load(Ordering::SeqCst) || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn close(&self) {
        self.tx.send_modify(|current| {
            self.closed.store(true, Ordering::SeqCst);
            *current = ConnectionState::Disconnected;
        });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

pub struct Channel {
    commands: mpsc::UnboundedSender<Command>,
    dispatcher: Arc<Dispatcher<SyncEvent>>,
    state: Arc<StateCell>,
    pending: Mutex<Option<Worker>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Builds an idle channel. Nothing connects until [`Channel::start`].
    pub fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenSource>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let (commands, mailbox) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new());
        let state = Arc::new(StateCell::new());
        let worker = Worker {
            events: commands.downgrade(),
            mailbox,
            last_pong: scheduler.now(),
            config,
            connector,
            tokens,
            scheduler,
            dispatcher: Arc::clone(&dispatcher),
            state: Arc::clone(&state),
            link: Link::Idle,
            generation: 0,
            attempts: 0,
            queue: VecDeque::new(),
            retry: None,
        };
        Self {
            commands,
            dispatcher,
            state,
            pending: Mutex::new(Some(worker)),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker and makes the first connection attempt. Returns
    /// `false` if the channel was already started or has been disconnected.
    pub fn start(&self) -> bool {
        let Some(worker) = lock(&self.pending).take() else {
            return false;
        };
        *lock(&self.worker) = Some(tokio::spawn(worker.run()));
        self.commands.send(Command::Start).is_ok()
    }

    /// Transmits `message` now if connected, otherwise queues it and kicks
    /// off a connection attempt.
    pub fn send(&self, message: &WireMessage) -> Result<()> {
        if self.state.is_closed() {
            return Err(SyncError::Closed);
        }
        let text = serde_json::to_string(message)?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| SyncError::Closed)
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

    /// Owner-triggered connect. Resets the attempt counter, so this is also
    /// how a channel leaves the exhausted state.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Stops the worker, cancels its timers, drops the link and the queue, and
    /// clears all subscriptions. Safe to call repeatedly and from any state.
    pub fn disconnect(&self) {
        if self.state.is_closed() {
            return;
        }
        self.state.close();
        self.dispatcher.clear();
        drop(lock(&self.pending).take());
        if let Some(task) = lock(&self.worker).take() {
            task.abort();
        }
        info!("realtime channel disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.tx.subscribe()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.worker).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn post(events: &mpsc::WeakUnboundedSender<Command>, command: Command) {
    if let Some(tx) = events.upgrade() {
        let _ = tx.send(command);
    }
}

/// Aborts the wrapped task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Link {
    Idle,
    Connecting {
        generation: u64,
        _task: TaskGuard,
    },
    Open {
        generation: u64,
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
        _heartbeat: TimerHandle,
        /// Fires when no pong arrives within the heartbeat timeout.
        deadline: TimerHandle,
    },
}

struct Worker {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenSource>,
    scheduler: Arc<dyn Scheduler>,
    dispatcher: Arc<Dispatcher<SyncEvent>>,
    state: Arc<StateCell>,
    mailbox: mpsc::UnboundedReceiver<Command>,
    events: mpsc::WeakUnboundedSender<Command>,
    link: Link,
    generation: u64,
    attempts: u32,
    queue: VecDeque<String>,
    retry: Option<TimerHandle>,
    last_pong: Instant,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let command = match &mut self.link {
                Link::Open { inbound, .. } => tokio::select! {
                    biased;
                    command = self.mailbox.recv() => command,
                    frame = inbound.recv() => Some(Command::Frame(frame)),
                },
                _ => self.mailbox.recv().await,
            };
            let Some(command) = command else {
                debug!("channel handle dropped; worker exiting");
                break;
            };
            if self.state.is_closed() {
                break;
            }
            self.handle(command);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.open(),
            Command::Connect => {
                self.attempts = 0;
                self.open();
            }
            Command::Send(text) => self.send(text),
            Command::Connected { generation, result } => self.on_connected(generation, result),
            Command::Frame(frame) => self.on_frame(frame),
            Command::ReconnectDue => {
                if self.retry.take().is_none() || !matches!(self.link, Link::Idle) {
                    trace!("ignoring stale reconnect timer");
                    return;
                }
                self.attempts += 1;
                self.open();
            }
            Command::HeartbeatTick { generation } => self.on_heartbeat(generation),
            Command::PongOverdue { generation } => self.on_pong_overdue(generation),
        }
    }

    /// Starts a connection attempt unless one is in flight or open.
    fn open(&mut self) {
        if !matches!(self.link, Link::Idle) {
            return;
        }
        let Some(token) = self.tokens.token() else {
            debug!("no credential; realtime channel stays disconnected");
            self.state.publish(ConnectionState::Disconnected);
            return;
        };
        let url = match ws_endpoint(&self.config.endpoint, &token) {
            Ok(url) => url,
            Err(SyncError::MissingCredential) => {
                debug!("empty credential; realtime channel stays disconnected");
                self.state.publish(ConnectionState::Disconnected);
                return;
            }
            Err(err) => {
                error!(error = %err, "cannot build realtime endpoint");
                self.state.publish(ConnectionState::Disconnected);
                return;
            }
        };

        self.retry = None;
        self.generation += 1;
        let generation = self.generation;
        info!(
            endpoint = %redacted(&url),
            generation,
            attempt = self.attempts,
            "connecting realtime channel"
        );
        self.state.publish(ConnectionState::Connecting);

        let connect = self.connector.connect(url);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let result = connect.await;
            post(&events, Command::Connected { generation, result });
        });
        self.link = Link::Connecting {
            generation,
            _task: TaskGuard(task),
        };
    }

    fn on_connected(
        &mut self,
        generation: u64,
        result: std::result::Result<Connection, TransportError>,
    ) {
        let current = matches!(self.link, Link::Connecting { generation: g, .. } if g == generation);
        if !current {
            trace!(generation, "dropping stale connect result");
            return;
        }
        let Connection { outbound, inbound } = match result {
            Ok(connection) => connection,
            Err(err) => {
                warn!(error = %err, generation, attempt = self.attempts, "realtime connect failed");
                self.on_closed();
                return;
            }
        };

        self.attempts = 0;
        self.last_pong = self.scheduler.now();
        let events = self.events.clone();
        let heartbeat = self.scheduler.every(
            self.config.heartbeat.interval,
            Box::new(move || post(&events, Command::HeartbeatTick { generation })),
        );
        let deadline = self.pong_deadline(generation);
        self.link = Link::Open {
            generation,
            outbound,
            inbound,
            _heartbeat: heartbeat,
            deadline,
        };
        self.state.publish(ConnectionState::Connected);
        info!(generation, queued = self.queue.len(), "realtime channel connected");

        while let Some(text) = self.queue.pop_front() {
            if let Err(text) = self.transmit(text) {
                self.queue.push_front(text);
                break;
            }
        }
    }

    fn send(&mut self, text: String) {
        if let Err(text) = self.transmit(text) {
            self.queue.push_back(text);
            if matches!(self.link, Link::Idle) {
                debug!(queued = self.queue.len(), "queued message while disconnected");
                self.open();
            }
        }
    }

    /// Hands `text` to the open link. Gives it back if there is none.
    fn transmit(&mut self, text: String) -> std::result::Result<(), String> {
        let Link::Open { outbound, .. } = &self.link else {
            return Err(text);
        };
        match outbound.send(Outbound::Text(text)) {
            Ok(()) => Ok(()),
            Err(SendError(Outbound::Text(text))) => Err(text),
            Err(SendError(Outbound::Close)) => Ok(()),
        }
    }

    fn on_frame(&mut self, frame: Option<Inbound>) {
        match frame {
            Some(Inbound::Text(text)) => self.on_text(&text),
            Some(Inbound::Closed { code, reason }) => {
                info!(?code, %reason, "realtime connection closed");
                self.on_closed();
            }
            Some(Inbound::Error {
                message,
                closed: true,
            }) => {
                warn!(error = %message, "realtime connection failed");
                self.on_closed();
            }
            Some(Inbound::Error {
                message,
                closed: false,
            }) => {
                warn!(error = %message, "realtime transport error; connection still open");
            }
            None => {
                info!("realtime transport went away");
                self.on_closed();
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        let message: WireMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping unreadable realtime message");
                return;
            }
        };
        match message {
            WireMessage::Pong => {
                self.last_pong = self.scheduler.now();
                if let Link::Open { generation, .. } = self.link {
                    let next = self.pong_deadline(generation);
                    if let Link::Open { deadline, .. } = &mut self.link {
                        *deadline = next;
                    }
                }
                trace!("pong");
            }
            WireMessage::Ping => self.write(&WireMessage::Pong),
            other => {
                if let Some(event) = SyncEvent::from_wire(other) {
                    if !self.state.is_closed() {
                        self.dispatcher.dispatch(&event);
                    }
                }
            }
        }
    }

    fn write(&mut self, message: &WireMessage) {
        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = self.transmit(text);
            }
            Err(err) => error!(error = %err, "cannot encode {}", message.type_name()),
        }
    }

    fn pong_deadline(&self, generation: u64) -> TimerHandle {
        let events = self.events.clone();
        self.scheduler.after(
            self.config.heartbeat.timeout,
            Box::new(move || post(&events, Command::PongOverdue { generation })),
        )
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(self.link, Link::Open { generation: g, .. } if g == generation)
    }

    fn on_heartbeat(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.write(&WireMessage::Ping);
        }
    }

    /// The transport may still claim to be open; reconnect anyway.
    fn on_pong_overdue(&mut self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let silent = self.scheduler.now().saturating_duration_since(self.last_pong);
        warn!(
            silent_ms = silent.as_millis() as u64,
            generation,
            "no pong within heartbeat timeout; forcing reconnect"
        );
        self.state.publish(ConnectionState::Closing);
        if let Link::Open { outbound, .. } = &self.link {
            let _ = outbound.send(Outbound::Close);
        }
        self.link = Link::Idle;
        self.open();
    }

    /// Connection ended or never came up: back off or give up.
    fn on_closed(&mut self) {
        self.link = Link::Idle;
        self.state.publish(ConnectionState::Disconnected);

        match self.config.reconnect.delay_for_attempt(self.attempts) {
            Some(delay) => {
                info!(
                    attempt = self.attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                let events = self.events.clone();
                self.retry = Some(
                    self.scheduler
                        .after(delay, Box::new(move || post(&events, Command::ReconnectDue))),
                );
            }
            None => {
                error!(
                    attempts = self.attempts,
                    "reconnect attempts exhausted; waiting for an explicit connect"
                );
                if !self.state.is_closed() {
                    self.dispatcher.dispatch(&SyncEvent::ConnectionExhausted {
                        attempts: self.attempts,
                    });
                }
            }
        }
    }
}
