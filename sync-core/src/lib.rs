//! Realtime incident synchronization.
//!
//! A [`Channel`] keeps a websocket to the backend alive (backoff, heartbeat,
//! outbound queue) and a [`PollingSync`] covers for it with watermark polling.
//! Both fan changes out through a typed [`Dispatcher`]; a [`SyncContext`]
//! owns one of each and folds their events into an [`IncidentBoard`].
//! [`triage::classify`] scores new incidents before they are submitted.

pub mod api;
pub mod board;
pub mod channel;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod polling;
pub mod scheduler;
pub mod transport;
pub mod triage;

#[cfg(test)]
mod test_support;

pub use api::{IncidentApi, IncidentPatch, IncidentQuery};
pub use board::IncidentBoard;
pub use channel::{Channel, ChannelConfig, ConnectionState, HeartbeatPolicy, ReconnectPolicy};
pub use config::SyncConfig;
pub use context::{SharedBoard, SyncContext, SyncStatus};
pub use credentials::{SharedToken, StaticToken, TokenSource};
pub use dispatcher::{DispatchReport, Dispatchable, Dispatcher, SubscriptionId};
pub use error::{Result, SyncError, TransportError};
pub use events::{EventKind, SyncEvent};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use polling::{PollingConfig, PollingSync, UpdateSource, Watermark};
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler};
pub use transport::{ws_endpoint, Connection, Connector, Inbound, Outbound, WsConnector};
