use std::collections::HashSet;

use parlor_types::{ChannelId, Message, MessageId};
use tracing::debug;

/// Result of merging one message into a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Appended,
    /// A message with the same id is already present.
    Duplicate,
    /// The message belongs to another channel and was not merged.
    ForeignChannel,
}

/// Ordered, id-deduplicated messages of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    channel_id: ChannelId,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    max_id: Option<MessageId>,
}

impl Transcript {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            messages: Vec::new(),
            ids: HashSet::new(),
            max_id: None,
        }
    }

    /// Build from a history snapshot, keeping its order.
    pub fn from_history(channel_id: ChannelId, history: Vec<Message>) -> Self {
        let mut transcript = Self::new(channel_id);
        transcript.extend(history);
        transcript
    }

    /// Append `message` after the tail unless its id is already present.
    pub fn merge(&mut self, message: Message) -> Merge {
        if !message.belongs_to(self.channel_id) {
            debug!(
                "Ignoring message {} for channel {} in channel {}",
                message.id, message.channel_id, self.channel_id
            );
            return Merge::ForeignChannel;
        }
        if !self.ids.insert(message.id) {
            return Merge::Duplicate;
        }
        self.max_id = self.max_id.max(Some(message.id));
        self.messages.push(message);
        Merge::Appended
    }

    /// Merge in order; returns the number appended.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut appended = 0;
        for message in messages {
            if self.merge(message) == Merge::Appended {
                appended += 1;
            }
        }
        appended
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Highest id seen; the cursor for fetching what came after.
    pub fn last_id(&self) -> Option<MessageId> {
        self.max_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
