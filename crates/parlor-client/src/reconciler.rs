//! Transcript reconciliation for the selected channel.
//!
//! The reconciler never touches the network. Every request it wants made is
//! described by a ticket ([`HistoryTicket`], [`ComposeTicket`]) and the result
//! is fed back together with that ticket. A ticket from an earlier selection is
//! stale and its result is discarded, so a slow response for one channel can
//! never land in another channel's transcript.

use parlor_types::api::{MessageQuery, SendMessageRequest, SendMessageResponse};
use parlor_types::{Channel, ChannelId, Identity, Message, MessageId};
use tracing::debug;

use crate::composer::Draft;
use crate::error::ValidationError;
use crate::transcript::{Merge, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Replace the transcript with the channel's history.
    Full,
    /// Merge whatever arrived after the transcript's tail.
    CatchUp,
}

/// A history request issued for one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryTicket {
    pub channel_id: ChannelId,
    pub kind: LoadKind,
    pub after: Option<MessageId>,
    selection: u64,
    attempt: u64,
}

impl HistoryTicket {
    pub fn query(&self, limit: Option<u32>) -> MessageQuery {
        MessageQuery::channel(self.channel_id)
            .with_limit(limit)
            .after(self.after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { appended: usize },
    Failed,
    /// The selection moved on; nothing was applied.
    Stale,
}

/// A validated send, waiting on the durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeTicket {
    pub request: SendMessageRequest,
    pub identity: Identity,
    selection: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeOutcome {
    /// Merged into the transcript; publish it on the live channel.
    Confirmed(Message),
    /// Stored by the backend, but the user has left that channel since.
    Stale(Message),
}

/// What `observe_inbound` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    Appended,
    Duplicate,
    /// Held until history for the channel arrives.
    Buffered,
    /// Not for the selected channel, nothing is selected, or the last
    /// history load failed.
    Ignored,
}

/// Read-only projection of the reconciler for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptView<'a> {
    NoChannel,
    Loading { channel: &'a Channel },
    Failed { channel: &'a Channel, reason: &'a str },
    Empty { channel: &'a Channel },
    Messages { channel: &'a Channel, messages: &'a [Message] },
}

#[derive(Debug)]
enum Phase {
    Unselected,
    Loading {
        channel: Channel,
        pending: Vec<Message>,
    },
    /// Nothing is buffered here; the retried load brings those messages.
    Failed {
        channel: Channel,
        reason: String,
    },
    Ready {
        channel: Channel,
        transcript: Transcript,
    },
}

/// Produces the authoritative transcript of the selected channel.
#[derive(Debug)]
pub struct Reconciler {
    phase: Phase,
    /// Bumped on every channel change.
    selection: u64,
    /// Bumped on every full history request.
    attempt: u64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            phase: Phase::Unselected,
            selection: 0,
            attempt: 0,
        }
    }

    /// Switch to `channel`, discarding the previous transcript. Returns the
    /// history request to issue, if a channel was selected.
    pub fn select(&mut self, channel: Option<Channel>) -> Option<HistoryTicket> {
        self.selection += 1;
        match channel {
            None => {
                self.phase = Phase::Unselected;
                None
            }
            Some(channel) => {
                let channel_id = channel.id;
                self.phase = Phase::Loading {
                    channel,
                    pending: Vec::new(),
                };
                Some(self.full_ticket(channel_id))
            }
        }
    }

    /// Re-request history after a failed load.
    pub fn retry_history(&mut self) -> Option<HistoryTicket> {
        let phase = std::mem::replace(&mut self.phase, Phase::Unselected);
        let (channel, pending) = match phase {
            Phase::Failed { channel, .. } => (channel, Vec::new()),
            Phase::Loading { channel, pending } => (channel, pending),
            other => {
                self.phase = other;
                return None;
            }
        };
        let channel_id = channel.id;
        self.phase = Phase::Loading { channel, pending };
        Some(self.full_ticket(channel_id))
    }

    fn full_ticket(&mut self, channel_id: ChannelId) -> HistoryTicket {
        self.attempt += 1;
        HistoryTicket {
            channel_id,
            kind: LoadKind::Full,
            after: None,
            selection: self.selection,
            attempt: self.attempt,
        }
    }

    /// Request messages newer than the tail, e.g. after the live connection
    /// dropped for a while.
    pub fn begin_catch_up(&self) -> Option<HistoryTicket> {
        match &self.phase {
            Phase::Ready { transcript, .. } => Some(HistoryTicket {
                channel_id: transcript.channel_id(),
                kind: LoadKind::CatchUp,
                after: transcript.last_id(),
                selection: self.selection,
                attempt: self.attempt,
            }),
            _ => None,
        }
    }

    fn is_current(&self, ticket: &HistoryTicket) -> bool {
        let selected = self.selected().map(|c| c.id);
        ticket.selection == self.selection
            && selected == Some(ticket.channel_id)
            && (ticket.kind == LoadKind::CatchUp || ticket.attempt == self.attempt)
    }

    pub fn apply_history(&mut self, ticket: HistoryTicket, messages: Vec<Message>) -> LoadOutcome {
        if !self.is_current(&ticket) {
            debug!("Discarding stale history for channel {}", ticket.channel_id);
            return LoadOutcome::Stale;
        }

        match ticket.kind {
            LoadKind::Full => {
                let phase = std::mem::replace(&mut self.phase, Phase::Unselected);
                let (channel, pending) = match phase {
                    Phase::Loading { channel, pending } => (channel, pending),
                    Phase::Failed { channel, .. } => (channel, Vec::new()),
                    other => {
                        self.phase = other;
                        return LoadOutcome::Stale;
                    }
                };

                let mut transcript = Transcript::from_history(channel.id, messages);
                let loaded = transcript.len();
                let buffered = transcript.extend(pending);
                debug!(
                    "Channel {} ready: {} from history, {} buffered",
                    channel.id, loaded, buffered
                );
                self.phase = Phase::Ready { channel, transcript };
                LoadOutcome::Applied {
                    appended: loaded + buffered,
                }
            }
            LoadKind::CatchUp => match &mut self.phase {
                Phase::Ready { transcript, .. } => LoadOutcome::Applied {
                    appended: transcript.extend(messages),
                },
                _ => LoadOutcome::Stale,
            },
        }
    }

    pub fn fail_history(&mut self, ticket: HistoryTicket, reason: impl Into<String>) -> LoadOutcome {
        if !self.is_current(&ticket) {
            return LoadOutcome::Stale;
        }
        if ticket.kind == LoadKind::CatchUp {
            return LoadOutcome::Failed;
        }

        let phase = std::mem::replace(&mut self.phase, Phase::Unselected);
        self.phase = match phase {
            Phase::Loading { channel, pending } => {
                if !pending.is_empty() {
                    debug!("Dropping {} buffered messages; the retry reloads them", pending.len());
                }
                Phase::Failed {
                    channel,
                    reason: reason.into(),
                }
            }
            Phase::Failed { channel, .. } => Phase::Failed {
                channel,
                reason: reason.into(),
            },
            other => other,
        };
        LoadOutcome::Failed
    }

    /// Merge a live message. Merging is idempotent by id.
    pub fn observe_inbound(&mut self, message: Message) -> Observed {
        match &mut self.phase {
            Phase::Unselected => Observed::Ignored,
            Phase::Ready { transcript, .. } => match transcript.merge(message) {
                Merge::Appended => Observed::Appended,
                Merge::Duplicate => Observed::Duplicate,
                Merge::ForeignChannel => Observed::Ignored,
            },
            Phase::Failed { .. } => Observed::Ignored,
            Phase::Loading { channel, pending } => {
                if !message.belongs_to(channel.id) {
                    Observed::Ignored
                } else if pending.iter().any(|m| m.id == message.id) {
                    Observed::Duplicate
                } else {
                    pending.push(message);
                    Observed::Buffered
                }
            }
        }
    }

    /// Validate a send and build the durable-write request.
    pub fn prepare_compose(
        &self,
        draft: &Draft,
        identity: Option<Identity>,
    ) -> Result<ComposeTicket, ValidationError> {
        if draft.is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let identity = identity.ok_or(ValidationError::MissingIdentity)?;
        let channel = self.selected().ok_or(ValidationError::NoChannel)?;

        Ok(ComposeTicket {
            request: SendMessageRequest {
                channel_id: channel.id,
                user_id: identity.user_id,
                text: draft.text().to_string(),
            },
            identity,
            selection: self.selection,
        })
    }

    /// Record a successful durable write under the id the backend assigned.
    pub fn confirm_compose(&mut self, ticket: ComposeTicket, response: SendMessageResponse) -> ComposeOutcome {
        let message = Message {
            id: response.id,
            channel_id: ticket.request.channel_id,
            user_id: ticket.identity.user_id,
            user_name: ticket.identity.user_name,
            text: ticket.request.text,
        };

        if ticket.selection != self.selection {
            debug!("Message {} confirmed after leaving channel {}", message.id, message.channel_id);
            return ComposeOutcome::Stale(message);
        }

        self.observe_inbound(message.clone());
        ComposeOutcome::Confirmed(message)
    }

    pub fn selected(&self) -> Option<&Channel> {
        match &self.phase {
            Phase::Unselected => None,
            Phase::Loading { channel, .. } | Phase::Failed { channel, .. } | Phase::Ready { channel, .. } => {
                Some(channel)
            }
        }
    }

    pub fn render(&self) -> TranscriptView<'_> {
        match &self.phase {
            Phase::Unselected => TranscriptView::NoChannel,
            Phase::Loading { channel, .. } => TranscriptView::Loading { channel },
            Phase::Failed { channel, reason, .. } => TranscriptView::Failed { channel, reason },
            Phase::Ready { channel, transcript } if transcript.is_empty() => TranscriptView::Empty { channel },
            Phase::Ready { channel, transcript } => TranscriptView::Messages {
                channel,
                messages: transcript.messages(),
            },
        }
    }
}
