use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub type ChannelId = i64;
pub type MessageId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// A chat message as stored by the backend and carried on the live channel.
///
/// Two messages with the same `id` are the same logical message no matter
/// where they came from (history, live push, or a local echo).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "lenient_id")]
    pub id: MessageId,
    #[serde(deserialize_with = "lenient_id")]
    pub channel_id: ChannelId,
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: UserId,
    /// Joined from the users table; null for users the backend no longer knows.
    #[serde(default, deserialize_with = "nullable_string")]
    pub user_name: String,
    pub text: String,
}

impl Message {
    pub fn belongs_to(&self, channel_id: ChannelId) -> bool {
        self.channel_id == channel_id
    }
}

/// The already-authenticated user attached to outgoing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(alias = "userId", deserialize_with = "lenient_id")]
    pub user_id: UserId,
    #[serde(alias = "userName")]
    pub user_name: String,
}

impl Identity {
    pub fn new(user_id: UserId, user_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
        }
    }
}

// Browser clients publish ids as numeric strings, and `channel_id` as the
// whole `{id, name}` channel object.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Int(i64),
    Text(String),
    Object { id: i64 },
}

fn lenient_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match IdRepr::deserialize(deserializer)? {
        IdRepr::Int(id) | IdRepr::Object { id } => Ok(id),
        IdRepr::Text(raw) => raw
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid id {:?}", raw))),
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
