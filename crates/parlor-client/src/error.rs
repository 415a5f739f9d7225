use parlor_types::ConnectionState;
use thiserror::Error;

/// Rejected before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,
    #[error("no identity to send as")]
    MissingIdentity,
    #[error("no channel selected")]
    NoChannel,
}

/// The live channel could not carry an outbound event.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no live connection")]
    Detached,
    #[error("live connection is {0}")]
    NotOpen(ConnectionState),
    #[error("live connection task has stopped")]
    Closed,
    #[error("failed to encode live payload: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl ClientError {
    /// History fetch or durable write did not complete with a usable reply.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. } | Self::Decode(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
