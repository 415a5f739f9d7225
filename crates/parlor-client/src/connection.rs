//! The persistent duplex channel the stream coordinator is built on.
//!
//! A connection is a pair of halves: the [`DuplexChannel`] the coordinator
//! holds, and the [`DuplexPeer`] a transport task drives. Text frames flow
//! through unbounded queues in both directions and the transport publishes its
//! [`ConnectionState`] through a watch.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use parlor_types::ConnectionState;

/// Client half of a live connection.
pub struct DuplexChannel {
    pub(crate) outbound: mpsc::UnboundedSender<String>,
    pub(crate) inbound: mpsc::UnboundedReceiver<String>,
    pub(crate) state: watch::Receiver<ConnectionState>,
    pub(crate) shutdown: CancellationToken,
}

impl DuplexChannel {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Transport half of a live connection.
pub struct DuplexPeer {
    /// Frames the client wants sent.
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Frames received from the remote end.
    pub inbound: mpsc::UnboundedSender<String>,
    pub state: watch::Sender<ConnectionState>,
    /// Cancelled when the client tears the connection down.
    pub shutdown: CancellationToken,
}

impl DuplexPeer {
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Build a connected channel/peer pair, starting in `Connecting`.
pub fn duplex_pair() -> (DuplexChannel, DuplexPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let shutdown = CancellationToken::new();

    (
        DuplexChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
            state: state_rx,
            shutdown: shutdown.clone(),
        },
        DuplexPeer {
            outbound: outbound_rx,
            inbound: inbound_tx,
            state: state_tx,
            shutdown,
        },
    )
}

/// Opens live connections. Must be called from within a tokio runtime.
pub trait Connector: Send + Sync {
    fn open(&self, url: Url) -> DuplexChannel;
}

/// WebSocket transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: Url) -> DuplexChannel {
        let (channel, peer) = duplex_pair();
        tokio::spawn(run_websocket(url, peer));
        channel
    }
}

async fn run_websocket(url: Url, mut peer: DuplexPeer) {
    let connect = tokio::select! {
        _ = peer.shutdown.cancelled() => {
            peer.set_state(ConnectionState::Closed);
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws = match connect {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!("Live connection to {} failed: {}", url, e);
            peer.set_state(ConnectionState::Closed);
            return;
        }
    };

    info!("Live connection open: {}", url);
    peer.set_state(ConnectionState::Open);

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = peer.shutdown.cancelled() => break,
            outgoing = peer.outbound.recv() => {
                let Some(text) = outgoing else { break };
                if let Err(e) = sink.send(WsMessage::text(text)).await {
                    warn!("Live send on {} failed: {}", url, e);
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if peer.inbound.send(text.as_str().to_owned()).is_err() {
                        break;
                    }
                }
                // Pings are answered by tungstenite on the next read.
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Live connection {} errored: {}", url, e);
                    break;
                }
            },
        }
    }

    peer.set_state(ConnectionState::Closing);
    let _ = sink.close().await;
    peer.set_state(ConnectionState::Closed);
    info!("Live connection closed: {}", url);
}
