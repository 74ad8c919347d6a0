//! Bidirectional transport behind the realtime channel.
//!
//! A [`Connector`] produces a [`Connection`]: a pair of mailboxes carrying
//! text frames in each direction plus close/error notifications. The channel
//! worker only ever sees these mailboxes, so the websocket implementation and
//! the in-memory test peer are interchangeable.

use crate::credentials::bare_token;
use crate::error::{SyncError, TransportError};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    /// `closed` tells whether the error also ended the connection.
    Error { message: String, closed: bool },
}

/// Client end of an open connection.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Transport end of an open connection.
#[derive(Debug)]
pub struct Peer {
    pub outgoing: mpsc::UnboundedReceiver<Outbound>,
    pub incoming: mpsc::UnboundedSender<Inbound>,
}

impl Connection {
    pub fn pair() -> (Connection, Peer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Connection {
                outbound: out_tx,
                inbound: in_rx,
            },
            Peer {
                outgoing: out_rx,
                incoming: in_tx,
            },
        )
    }
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Connection, TransportError>>;
}

/// Builds the realtime endpoint from the API base URL: `http` becomes `ws`,
/// `https` becomes `wss`, and the raw token goes into `?token=`.
pub fn ws_endpoint(base: &str, token: &str) -> Result<Url, SyncError> {
    let invalid = |reason: String| SyncError::InvalidEndpoint {
        url: base.to_string(),
        reason,
    };

    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch scheme to {scheme}")))?;

    let token = bare_token(token);
    if token.is_empty() {
        return Err(SyncError::MissingCredential);
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Endpoint with the query stripped, for logs.
pub fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Websocket transport over tokio-tungstenite.
#[derive(Clone, Debug)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let handshake_timeout = self.handshake_timeout;
        Box::pin(async move {
            let handshake = tokio_tungstenite::connect_async(url.as_str());
            let (stream, _response) = tokio::time::timeout(handshake_timeout, handshake)
                .await
                .map_err(|_| TransportError::Handshake("timed out".into()))?
                .map_err(|err| match err {
                    WsError::Io(io) => TransportError::Refused(io.to_string()),
                    WsError::Http(response) => {
                        TransportError::Handshake(format!("http {}", response.status()))
                    }
                    other => TransportError::Handshake(other.to_string()),
                })?;

            let (connection, peer) = Connection::pair();
            let Peer {
                mut outgoing,
                incoming,
            } = peer;
            let (mut sink, mut source) = stream.split();

            tokio::spawn(async move {
                while let Some(frame) = outgoing.recv().await {
                    match frame {
                        Outbound::Text(text) => {
                            if let Err(err) = sink.send(Message::Text(text)).await {
                                debug!(error = %err, "websocket write failed");
                                break;
                            }
                        }
                        Outbound::Close => break,
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    let event = match frame {
                        Ok(Message::Text(text)) => Inbound::Text(text),
                        Ok(Message::Close(frame)) => {
                            let (code, reason) = frame
                                .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                                .unwrap_or((None, String::new()));
                            let _ = incoming.send(Inbound::Closed { code, reason });
                            return;
                        }
                        Ok(_) => continue,
                        Err(err) => {
                            let closed = matches!(
                                err,
                                WsError::ConnectionClosed
                                    | WsError::AlreadyClosed
                                    | WsError::Io(_)
                                    | WsError::Protocol(_)
                            );
                            warn!(error = %err, closed, "websocket read error");
                            let _ = incoming.send(Inbound::Error {
                                message: err.to_string(),
                                closed,
                            });
                            if closed {
                                return;
                            }
                            continue;
                        }
                    };
                    if incoming.send(event).is_err() {
                        return;
                    }
                }
                let _ = incoming.send(Inbound::Closed {
                    code: None,
                    reason: "stream ended".into(),
                });
            });

            Ok(connection)
        })
    }
}
