use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, MessageId, UserId};

// -- Messages --

/// Body of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub text: String,
}

/// The backend replies with the id it assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub id: MessageId,
}

/// Query string of `GET /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "channelID")]
    pub channel_id: ChannelId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Only messages with a greater id are returned.
    #[serde(rename = "lastMessageID", skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<MessageId>,
}

impl MessageQuery {
    pub fn channel(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            limit: None,
            last_message_id: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, last_message_id: Option<MessageId>) -> Self {
        self.last_message_id = last_message_id;
        self
    }
}

// -- Errors --

/// Error body the backend sends with non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
