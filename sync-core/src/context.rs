use crate::api::IncidentApi;
use crate::board::IncidentBoard;
use crate::channel::{Channel, ConnectionState};
use crate::config::SyncConfig;
use crate::credentials::TokenSource;
use crate::error::Result;
use crate::events::{EventKind, SyncEvent};
use crate::polling::{format_since, PollingSync};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::transport::WsConnector;
use incident_model::Incident;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::{info, warn};

pub type SharedBoard = Arc<RwLock<IncidentBoard>>;

const BOARD_KINDS: [EventKind; 4] = [
    EventKind::IncidentCreated,
    EventKind::IncidentUpdated,
    EventKind::IncidentResolved,
    EventKind::IncidentFlagged,
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub connection: ConnectionState,
    pub polling: bool,
    pub watermark: Option<String>,
    pub incidents: usize,
    pub active: usize,
}

/// Owns one channel, one poller and the board both of them feed.
pub struct SyncContext {
    channel: Arc<Channel>,
    polling: Arc<PollingSync>,
    board: SharedBoard,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl SyncContext {
    pub fn new(channel: Arc<Channel>, polling: Arc<PollingSync>) -> Self {
        Self {
            channel,
            polling,
            board: Arc::new(RwLock::new(IncidentBoard::new())),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Wires the websocket transport and the REST poll source from `config`.
    pub fn from_config(config: &SyncConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler);
        let api = IncidentApi::new(&config.api.base_url, Arc::clone(&tokens))?;
        let channel = Channel::new(
            config.channel_config(),
            Arc::new(WsConnector::default()),
            Arc::clone(&tokens),
            Arc::clone(&scheduler),
        );
        let polling = PollingSync::new(config.polling_config(), Arc::new(api), tokens, scheduler);
        Ok(Self::new(Arc::new(channel), Arc::new(polling)))
    }

    /// Subscribes the board and starts both sources. Only the first call
    /// does anything, and a stopped context stays stopped.
    pub fn start(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        for kind in BOARD_KINDS {
            let board = Arc::clone(&self.board);
            self.channel.subscribe(kind, move |event| fold(&board, event));
        }
        feed_board(&self.polling, &self.board);

        let polling = Arc::clone(&self.polling);
        let board = Arc::clone(&self.board);
        self.channel
            .subscribe(EventKind::ConnectionExhausted, move |event| {
                warn!(?event, "realtime channel gave up; relying on polling");
                // a stopped poller has dropped its subscribers
                if polling.handler_count(EventKind::IncidentUpdated) == 0 {
                    feed_board(&polling, &board);
                }
                polling.start();
            });

        self.channel.start();
        let polling = self.polling.start();
        info!(polling, "sync context started");
        true
    }

    /// Tears down both sources. Final: the channel cannot be restarted.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channel.disconnect();
        self.polling.stop();
        info!("sync context stopped");
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn polling(&self) -> &Arc<PollingSync> {
        &self.polling
    }

    pub fn board(&self) -> SharedBoard {
        Arc::clone(&self.board)
    }

    pub fn status(&self) -> SyncStatus {
        let board = read(&self.board);
        SyncStatus {
            connection: self.channel.state(),
            polling: self.polling.is_running(),
            watermark: self.polling.watermark().last().map(format_since),
            incidents: board.len(),
            active: board.active_count(),
        }
    }

    /// Board contents in display order.
    pub fn snapshot(&self) -> Vec<Incident> {
        read(&self.board).ordered().into_iter().cloned().collect()
    }
}

fn feed_board(polling: &PollingSync, board: &SharedBoard) {
    for kind in BOARD_KINDS {
        let board = Arc::clone(board);
        polling.subscribe(kind, move |event| fold(&board, event));
    }
}

fn fold(board: &RwLock<IncidentBoard>, event: &SyncEvent) {
    board
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .apply(event);
}

fn read(board: &RwLock<IncidentBoard>) -> RwLockReadGuard<'_, IncidentBoard> {
    board.read().unwrap_or_else(PoisonError::into_inner)
}
