use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::ChannelId;

/// Target of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scope {
    /// The default endpoint, no `roomID`.
    #[default]
    Unscoped,
    Channel(ChannelId),
}

impl Scope {
    /// The `roomID` query value for this scope, if any.
    pub fn room_id(&self) -> Option<ChannelId> {
        match self {
            Self::Unscoped => None,
            Self::Channel(id) => Some(*id),
        }
    }
}

impl From<Option<ChannelId>> for Scope {
    fn from(channel: Option<ChannelId>) -> Self {
        channel.map_or(Self::Unscoped, Self::Channel)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unscoped => f.write_str("unscoped"),
            Self::Channel(id) => write!(f, "room {}", id),
        }
    }
}

/// Lifecycle of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
