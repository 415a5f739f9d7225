//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use url::Url;

use parlor_types::api::{MessageQuery, SendMessageRequest, SendMessageResponse};
use parlor_types::{ChannelId, Message, MessageId};

use crate::api::MessageApi;
use crate::connection::{Connector, DuplexChannel, DuplexPeer, duplex_pair};
use crate::error::ClientError;

pub(crate) fn message(id: MessageId, channel_id: ChannelId, text: &str) -> Message {
    Message {
        id,
        channel_id,
        user_id: 1,
        user_name: "tester".into(),
        text: text.into(),
    }
}

/// Records every URL opened and hands the transport halves to the test.
#[derive(Clone, Default)]
pub(crate) struct RecordingConnector {
    opened: Arc<Mutex<Vec<(Url, Option<DuplexPeer>)>>>,
}

impl RecordingConnector {
    pub(crate) fn urls(&self) -> Vec<Url> {
        self.opened.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub(crate) fn take_peer(&self, index: usize) -> DuplexPeer {
        self.opened.lock().unwrap()[index]
            .1
            .take()
            .expect("peer already taken")
    }
}

impl Connector for RecordingConnector {
    fn open(&self, url: Url) -> DuplexChannel {
        let (channel, peer) = duplex_pair();
        self.opened.lock().unwrap().push((url, Some(peer)));
        channel
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub history: HashMap<ChannelId, Vec<Message>>,
    pub next_id: MessageId,
    pub fail_list: bool,
    pub fail_create: bool,
    pub queries: Vec<MessageQuery>,
    pub created: Vec<SendMessageRequest>,
    /// `list_messages` for these channels waits until notified.
    pub holds: HashMap<ChannelId, Arc<Notify>>,
}

/// In-memory stand-in for the REST backend. Lists ascending by id after
/// `lastMessageID`, at most `limit` (default 100) per page.
#[derive(Clone, Default)]
pub(crate) struct FakeApi {
    backend: Arc<Mutex<FakeBackend>>,
}

impl FakeApi {
    pub(crate) fn backend(&self) -> MutexGuard<'_, FakeBackend> {
        self.backend.lock().unwrap()
    }

    pub(crate) fn hold(&self, channel_id: ChannelId) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.backend().holds.insert(channel_id, notify.clone());
        notify
    }
}

impl MessageApi for FakeApi {
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ClientError> {
        let hold = {
            let mut backend = self.backend();
            backend.queries.push(query.clone());
            backend.holds.get(&query.channel_id).cloned()
        };
        if let Some(hold) = hold {
            hold.notified().await;
        }

        let backend = self.backend();
        if backend.fail_list {
            return Err(ClientError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(backend
            .history
            .get(&query.channel_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| query.last_message_id.is_none_or(|after| m.id > after))
                    .take(query.limit.unwrap_or(100) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse, ClientError> {
        let mut backend = self.backend();
        backend.created.push(req.clone());
        if backend.fail_create {
            return Err(ClientError::Status {
                status: 500,
                message: "database is locked".into(),
            });
        }
        let id = backend.next_id;
        backend.next_id += 1;
        Ok(SendMessageResponse { id })
    }
}
