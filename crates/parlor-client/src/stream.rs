use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use parlor_types::{ConnectionState, Message, Scope};

use crate::connection::{Connector, DuplexChannel};
use crate::error::ConnectionError;

/// An inbound live message, stamped with the scope it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub generation: u64,
    pub scope: Scope,
    pub message: Message,
}

/// Connection state of the current scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeState {
    pub generation: u64,
    pub scope: Scope,
    pub state: ConnectionState,
}

/// Owns the single live connection and keeps it scoped to the selected channel.
///
/// Handles are cheap to clone and all of them share one connection, so every
/// [`InboundFeed`] sees the same events in the same order.
#[derive(Clone)]
pub struct StreamCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    base_url: Url,
    connector: Box<dyn Connector>,

    /// Fan-out of parsed inbound messages to every feed
    broadcast_tx: broadcast::Sender<Inbound>,

    /// Bumped on every re-scope; events from older generations are dropped
    generation: Arc<AtomicU64>,

    state_tx: watch::Sender<ScopeState>,

    /// Most recent inbound event not yet taken by `latest_inbound`
    latest: Mutex<Option<Inbound>>,

    active: Mutex<Option<ActiveConnection>>,
}

struct ActiveConnection {
    scope: Scope,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl StreamCoordinator {
    pub fn new(base_url: Url, connector: impl Connector + 'static, buffer: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer.max(1));
        let (state_tx, _) = watch::channel(ScopeState {
            generation: 0,
            scope: Scope::Unscoped,
            state: ConnectionState::Closed,
        });

        Self {
            inner: Arc::new(CoordinatorInner {
                base_url,
                connector: Box::new(connector),
                broadcast_tx,
                generation: Arc::new(AtomicU64::new(0)),
                state_tx,
                latest: Mutex::new(None),
                active: Mutex::new(None),
            }),
        }
    }

    /// Retarget the live connection. Returns `false` when the connection is
    /// already on `scope` and nothing was re-established.
    pub fn scope_to(&self, scope: Scope) -> bool {
        let mut active = lock(&self.inner.active);
        if active.as_ref().is_some_and(|a| a.scope == scope) {
            return false;
        }
        self.open(&mut active, scope);
        true
    }

    /// Re-establish the connection for the current scope under a new generation.
    pub fn reconnect(&self) -> bool {
        let mut active = lock(&self.inner.active);
        let Some(scope) = active.as_ref().map(|a| a.scope) else {
            return false;
        };
        self.open(&mut active, scope);
        true
    }

    /// Tear the connection down.
    pub fn close(&self) {
        let mut active = lock(&self.inner.active);
        if let Some(old) = active.take() {
            old.shutdown.cancel();
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.state_tx.send_replace(ScopeState {
                generation,
                scope: old.scope,
                state: ConnectionState::Closed,
            });
            info!("Live connection on {} released", old.scope);
        }
    }

    fn open(&self, active: &mut Option<ActiveConnection>, scope: Scope) {
        if let Some(old) = active.take() {
            old.shutdown.cancel();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let url = scope_url(&self.inner.base_url, scope);
        info!("Scoping live connection to {} ({})", scope, url);

        let DuplexChannel {
            outbound,
            inbound,
            state,
            shutdown,
        } = self.inner.connector.open(url);

        self.inner.state_tx.send_replace(ScopeState {
            generation,
            scope,
            state: *state.borrow(),
        });

        tokio::spawn(pump(
            Arc::downgrade(&self.inner),
            scope,
            generation,
            inbound,
            state,
            shutdown.clone(),
        ));

        *active = Some(ActiveConnection {
            scope,
            outbound,
            shutdown,
        });
    }

    /// Transmit `message` on the current connection.
    pub fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        let active = lock(&self.inner.active);
        let Some(active) = active.as_ref() else {
            return Err(ConnectionError::Detached);
        };

        let state = self.current_state();
        if !state.is_open() {
            return Err(ConnectionError::NotOpen(state));
        }

        let payload = serde_json::to_string(message).map_err(ConnectionError::Encode)?;
        active
            .outbound
            .send(payload)
            .map_err(|_| ConnectionError::Closed)
    }

    /// Take the most recent inbound event since the last call. Events that
    /// arrived in between are not kept here; use [`Self::subscribe`] for those.
    pub fn latest_inbound(&self) -> Option<Inbound> {
        lock(&self.inner.latest).take()
    }

    pub fn subscribe(&self) -> InboundFeed {
        InboundFeed {
            rx: self.inner.broadcast_tx.subscribe(),
            generation: self.inner.generation.clone(),
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().state
    }

    pub fn watch_state(&self) -> watch::Receiver<ScopeState> {
        self.inner.state_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Scope of the live connection, if one is held.
    pub fn scope(&self) -> Option<Scope> {
        lock(&self.inner.active).as_ref().map(|a| a.scope)
    }
}

impl CoordinatorInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// A frame may carry several queued messages, one JSON object per line.
    fn deliver(&self, scope: Scope, generation: u64, frame: &str) {
        if !self.is_current(generation) {
            debug!("Dropping frame from superseded {} connection", scope);
            return;
        }

        for line in frame.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let message: Message = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(e) => {
                    let raw: String = line.chars().take(200).collect();
                    warn!("Bad live payload on {}: {} -- raw: {}", scope, e, raw);
                    continue;
                }
            };

            let event = Inbound {
                generation,
                scope,
                message,
            };
            *lock(&self.latest) = Some(event.clone());
            let _ = self.broadcast_tx.send(event);
        }
    }

    fn publish_state(&self, scope: Scope, generation: u64, state: ConnectionState) {
        if !self.is_current(generation) {
            return;
        }
        debug!("Live connection on {} is {}", scope, state);
        self.state_tx.send_replace(ScopeState {
            generation,
            scope,
            state,
        });
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = active.take() {
            active.shutdown.cancel();
        }
    }
}

/// Forward one connection's frames and state into the coordinator until the
/// connection is cancelled or finishes.
async fn pump(
    inner: Weak<CoordinatorInner>,
    scope: Scope,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<String>,
    mut state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
) {
    let mut frames_done = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = inbound.recv(), if !frames_done => match frame {
                Some(frame) => {
                    let Some(inner) = inner.upgrade() else { return };
                    inner.deliver(scope, generation, &frame);
                }
                None => frames_done = true,
            },
            changed = state.changed() => {
                let Some(inner) = inner.upgrade() else { return };
                if changed.is_err() {
                    inner.publish_state(scope, generation, ConnectionState::Closed);
                    return;
                }
                let current = *state.borrow_and_update();
                inner.publish_state(scope, generation, current);
            }
        }
    }
}

/// One consumer's ordered view of the shared inbound stream.
pub struct InboundFeed {
    rx: broadcast::Receiver<Inbound>,
    generation: Arc<AtomicU64>,
}

impl InboundFeed {
    /// Next event of the current scope. `None` once the coordinator is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.generation == self.generation.load(Ordering::SeqCst) {
                        return Some(event);
                    }
                    debug!("Skipping event {} from superseded scope", event.message.id);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Inbound feed lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// `base` with `roomID` set for channel scopes and removed otherwise.
fn scope_url(base: &Url, scope: Scope) -> Url {
    let mut url = base.clone();
    let retained: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != "roomID")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.set_query(None);
    if !retained.is_empty() || scope.room_id().is_some() {
        let mut pairs = url.query_pairs_mut();
        pairs.extend_pairs(retained);
        if let Some(room_id) = scope.room_id() {
            pairs.append_pair("roomID", &room_id.to_string());
        }
    }
    url
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
