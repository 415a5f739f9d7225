use std::path::PathBuf;
use std::time::Duration;

use parlor_types::Identity;
use thiserror::Error;
use url::Url;

const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";
const DEFAULT_INBOUND_BUFFER: usize = 256;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid url {value:?}: {source}")]
    Url {
        var: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{var}: expected a number, got {value:?}")]
    Number { var: &'static str, value: String },
    #[error("PARLOR_USER_ID and PARLOR_USER_NAME must be set together")]
    PartialIdentity,
}

/// Client settings, read from `PARLOR_*` environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base of the REST endpoints (`/messages`).
    pub http_url: Url,
    /// Live endpoint; `roomID` is appended per scope.
    pub ws_url: Url,
    pub identity: Option<Identity>,
    /// JSON file holding `userId`/`userName`, re-read at every compose.
    pub identity_file: Option<PathBuf>,
    /// Page size for history requests; the backend's default is 100.
    pub history_limit: Option<u32>,
    /// Capacity of the shared inbound queue per feed.
    pub inbound_buffer: usize,
    /// `None` disables reconnecting after an unexpected close.
    pub reconnect_delay: Option<Duration>,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_url: Url::parse(DEFAULT_HTTP_URL).expect("default http url"),
            ws_url: Url::parse(DEFAULT_WS_URL).expect("default ws url"),
            identity: None,
            identity_file: None,
            history_limit: None,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            reconnect_delay: Some(Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_url = parse_url("PARLOR_HTTP_URL", var("PARLOR_HTTP_URL"), DEFAULT_HTTP_URL)?;
        let ws_url = parse_url("PARLOR_WS_URL", var("PARLOR_WS_URL"), DEFAULT_WS_URL)?;

        let identity = match (var("PARLOR_USER_ID"), var("PARLOR_USER_NAME")) {
            (Some(id), Some(name)) => Some(Identity::new(parse_number("PARLOR_USER_ID", &id)?, name)),
            (None, None) => None,
            _ => return Err(ConfigError::PartialIdentity),
        };

        let history_limit = var("PARLOR_HISTORY_LIMIT")
            .map(|v| parse_number("PARLOR_HISTORY_LIMIT", &v))
            .transpose()?;

        let inbound_buffer = match var("PARLOR_INBOUND_BUFFER") {
            Some(v) => parse_number("PARLOR_INBOUND_BUFFER", &v)?,
            None => DEFAULT_INBOUND_BUFFER,
        };

        let reconnect_ms: u64 = match var("PARLOR_RECONNECT_DELAY_MS") {
            Some(v) => parse_number("PARLOR_RECONNECT_DELAY_MS", &v)?,
            None => DEFAULT_RECONNECT_DELAY_MS,
        };

        let timeout_secs: u64 = match var("PARLOR_REQUEST_TIMEOUT_SECS") {
            Some(v) => parse_number("PARLOR_REQUEST_TIMEOUT_SECS", &v)?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            http_url,
            ws_url,
            identity,
            identity_file: var("PARLOR_IDENTITY_FILE").map(PathBuf::from),
            history_limit,
            inbound_buffer: inbound_buffer.max(1),
            reconnect_delay: (reconnect_ms > 0).then(|| Duration::from_millis(reconnect_ms)),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_url(var: &'static str, value: Option<String>, default: &str) -> Result<Url, ConfigError> {
    let value = value.unwrap_or_else(|| default.to_string());
    Url::parse(&value).map_err(|source| ConfigError::Url { var, value, source })
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Number {
        var,
        value: value.to_string(),
    })
}
