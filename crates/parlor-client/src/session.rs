use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::stream::FuturesUnordered;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parlor_types::{Channel, ChannelId, ConnectionState, Message, Scope};

use crate::api::{HttpMessageApi, MessageApi, list_all};
use crate::composer::Draft;
use crate::config::ClientConfig;
use crate::connection::WsConnector;
use crate::error::{ClientError, ConnectionError};
use crate::identity::{IdentityFile, IdentitySource};
use crate::reconciler::{
    ComposeOutcome, HistoryTicket, LoadKind, LoadOutcome, Observed, Reconciler, TranscriptView,
};
use crate::stream::{Inbound, InboundFeed, ScopeState, StreamCoordinator};

/// Reconnect delay stops doubling at this multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 16;

type PendingLoad = LocalBoxFuture<'static, (HistoryTicket, Result<Vec<Message>, ClientError>)>;

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub history_limit: Option<u32>,
    pub reconnect_delay: Option<Duration>,
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            reconnect_delay: config.reconnect_delay,
        }
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    HistoryLoaded { channel_id: ChannelId, count: usize },
    HistoryFailed { channel_id: ChannelId, error: ClientError },
    /// Messages missed while disconnected were merged.
    CaughtUp { channel_id: ChannelId, appended: usize },
    MessageAppended(Message),
    ConnectionChanged(ScopeState),
    Reconnecting(Scope),
}

/// How the live publish of a sent message went.
#[derive(Debug)]
pub enum Delivery {
    Published,
    /// Publish failed; it is retried when the connection reopens.
    Deferred(ConnectionError),
    /// The channel changed while the write was in flight.
    Skipped,
}

#[derive(Debug)]
pub struct ComposeReport {
    pub message: Message,
    pub delivery: Delivery,
}

/// Drives the reconciler and the stream coordinator from one event loop.
///
/// Not `Send`: run it on a current-thread runtime or a `LocalSet`.
pub struct ChatSession<A> {
    api: A,
    coordinator: StreamCoordinator,
    feed: InboundFeed,
    states: watch::Receiver<ScopeState>,
    reconciler: Reconciler,
    draft: Draft,
    identity: Box<dyn IdentitySource>,
    options: SessionOptions,

    loads: FuturesUnordered<PendingLoad>,
    /// Sent messages whose live publish has not gone out yet
    unpublished: Vec<Message>,
    reconnect_at: Option<Instant>,
    backoff_factor: u32,
    catch_up_on_open: bool,
    closed: bool,
}

impl ChatSession<HttpMessageApi> {
    /// Session over HTTP and WebSocket, as configured.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let api = HttpMessageApi::new(config)?;
        let coordinator = StreamCoordinator::new(config.ws_url.clone(), WsConnector, config.inbound_buffer);
        let identity: Box<dyn IdentitySource> = match &config.identity_file {
            Some(path) => Box::new(IdentityFile::new(path)),
            None => Box::new(config.identity.clone()),
        };
        Ok(Self::new(api, coordinator, identity, SessionOptions::from(config)))
    }
}

impl<A> ChatSession<A>
where
    A: MessageApi + Clone + 'static,
{
    /// Mount the session; the live connection starts out unscoped.
    pub fn new(
        api: A,
        coordinator: StreamCoordinator,
        identity: impl IdentitySource + 'static,
        options: SessionOptions,
    ) -> Self {
        let feed = coordinator.subscribe();
        let states = coordinator.watch_state();
        coordinator.scope_to(Scope::Unscoped);

        Self {
            api,
            coordinator,
            feed,
            states,
            reconciler: Reconciler::new(),
            draft: Draft::default(),
            identity: Box::new(identity),
            options,
            loads: FuturesUnordered::new(),
            unpublished: Vec::new(),
            reconnect_at: None,
            backoff_factor: 1,
            catch_up_on_open: false,
            closed: false,
        }
    }

    /// Change the selected channel: re-scope the connection, drop the old
    /// transcript and any outstanding history request, and load the new one.
    pub fn select_channel(&mut self, channel: Option<Channel>) {
        let channel_id = channel.as_ref().map(|c| c.id);
        self.coordinator.scope_to(Scope::from(channel_id));

        self.loads = FuturesUnordered::new();
        self.unpublished.retain(|m| Some(m.channel_id) == channel_id);
        self.reconnect_at = None;
        self.backoff_factor = 1;
        self.catch_up_on_open = false;

        if let Some(ticket) = self.reconciler.select(channel) {
            self.start_load(ticket);
        }
    }

    /// Request history again after `HistoryFailed`.
    pub fn retry_history(&mut self) -> bool {
        match self.reconciler.retry_history() {
            Some(ticket) => {
                self.loads = FuturesUnordered::new();
                self.start_load(ticket);
                true
            }
            None => false,
        }
    }

    fn start_load(&mut self, ticket: HistoryTicket) {
        let api = self.api.clone();
        let query = ticket.query(self.options.history_limit);
        self.loads.push(
            async move {
                let result = list_all(&api, query).await;
                (ticket, result)
            }
            .boxed_local(),
        );
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft.set(text);
    }

    pub fn draft(&self) -> &str {
        self.draft.text()
    }

    /// Send the draft. On any error the draft is left in place for a retry.
    pub async fn compose(&mut self) -> Result<ComposeReport, ClientError> {
        let ticket = self
            .reconciler
            .prepare_compose(&self.draft, self.identity.current())?;

        let response = self.api.create_message(&ticket.request).await?;
        self.draft.clear();

        match self.reconciler.confirm_compose(ticket, response) {
            ComposeOutcome::Confirmed(message) => {
                let delivery = match self.coordinator.send(&message) {
                    Ok(()) => Delivery::Published,
                    Err(e) => {
                        warn!("Publish of message {} deferred: {}", message.id, e);
                        self.unpublished.push(message.clone());
                        Delivery::Deferred(e)
                    }
                };
                Ok(ComposeReport { message, delivery })
            }
            ComposeOutcome::Stale(message) => Ok(ComposeReport {
                message,
                delivery: Delivery::Skipped,
            }),
        }
    }

    /// Wait for the next thing worth showing. `None` once the session is closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.closed {
                return None;
            }

            let reconnect_at = self.reconnect_at;
            let reconnect = async move {
                match reconnect_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                Some((ticket, result)) = self.loads.next(), if !self.loads.is_empty() => {
                    if let Some(event) = self.finish_load(ticket, result) {
                        return Some(event);
                    }
                }
                inbound = self.feed.recv() => {
                    let inbound = inbound?;
                    if let Some(event) = self.handle_inbound(inbound) {
                        return Some(event);
                    }
                }
                changed = self.states.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    let state = *self.states.borrow_and_update();
                    if let Some(event) = self.handle_state(state) {
                        return Some(event);
                    }
                }
                _ = reconnect => {
                    if let Some(event) = self.fire_reconnect() {
                        return Some(event);
                    }
                }
            }
        }
    }

    fn finish_load(
        &mut self,
        ticket: HistoryTicket,
        result: Result<Vec<Message>, ClientError>,
    ) -> Option<SessionEvent> {
        let channel_id = ticket.channel_id;
        match result {
            Ok(messages) => match self.reconciler.apply_history(ticket, messages) {
                LoadOutcome::Applied { appended } => Some(match ticket.kind {
                    LoadKind::Full => SessionEvent::HistoryLoaded {
                        channel_id,
                        count: appended,
                    },
                    LoadKind::CatchUp => SessionEvent::CaughtUp {
                        channel_id,
                        appended,
                    },
                }),
                LoadOutcome::Failed | LoadOutcome::Stale => None,
            },
            Err(error) => match self.reconciler.fail_history(ticket, error.to_string()) {
                LoadOutcome::Failed if ticket.kind == LoadKind::Full => {
                    warn!("History for channel {} failed: {}", channel_id, error);
                    Some(SessionEvent::HistoryFailed { channel_id, error })
                }
                LoadOutcome::Failed => {
                    warn!("Catch-up for channel {} failed: {}", channel_id, error);
                    None
                }
                _ => {
                    debug!("Ignoring failure of superseded request: {}", error);
                    None
                }
            },
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) -> Option<SessionEvent> {
        let message = inbound.message;
        match self.reconciler.observe_inbound(message.clone()) {
            Observed::Appended => Some(SessionEvent::MessageAppended(message)),
            observed => {
                debug!("Inbound message {}: {:?}", message.id, observed);
                None
            }
        }
    }

    fn handle_state(&mut self, state: ScopeState) -> Option<SessionEvent> {
        if state.generation != self.coordinator.generation() {
            return None;
        }

        match state.state {
            ConnectionState::Open => {
                self.backoff_factor = 1;
                self.flush_unpublished();
                if std::mem::take(&mut self.catch_up_on_open) {
                    if let Some(ticket) = self.reconciler.begin_catch_up() {
                        self.start_load(ticket);
                    }
                }
            }
            ConnectionState::Closed if !self.closed && self.reconnect_at.is_none() => {
                if let Some(delay) = self.options.reconnect_delay {
                    let delay = delay * self.backoff_factor;
                    info!("Live connection on {} lost; reconnecting in {:?}", state.scope, delay);
                    self.reconnect_at = Some(Instant::now() + delay);
                }
            }
            _ => {}
        }

        Some(SessionEvent::ConnectionChanged(state))
    }

    fn fire_reconnect(&mut self) -> Option<SessionEvent> {
        self.reconnect_at = None;
        let scope = self.coordinator.scope()?;
        if !self.coordinator.reconnect() {
            return None;
        }
        self.backoff_factor = (self.backoff_factor * 2).min(MAX_BACKOFF_FACTOR);
        self.catch_up_on_open = true;
        Some(SessionEvent::Reconnecting(scope))
    }

    fn flush_unpublished(&mut self) {
        let pending = std::mem::take(&mut self.unpublished);
        for message in pending {
            match self.coordinator.send(&message) {
                Ok(()) => info!("Published deferred message {}", message.id),
                Err(e) => {
                    warn!("Deferred publish of message {} failed again: {}", message.id, e);
                    self.unpublished.push(message);
                }
            }
        }
    }

    pub fn view(&self) -> TranscriptView<'_> {
        self.reconciler.render()
    }

    pub fn selected(&self) -> Option<&Channel> {
        self.reconciler.selected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.coordinator.current_state()
    }

    pub fn latest_inbound(&self) -> Option<Inbound> {
        self.coordinator.latest_inbound()
    }

    /// Unmount: cancel outstanding requests and release the connection.
    pub fn close(&mut self) {
        self.closed = true;
        self.loads = FuturesUnordered::new();
        self.unpublished.clear();
        self.reconnect_at = None;
        self.reconciler.select(None);
        self.coordinator.close();
    }
}
