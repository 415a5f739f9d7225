use std::future::Future;

use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use parlor_types::Message;
use parlor_types::api::{ErrorBody, MessageQuery, SendMessageRequest, SendMessageResponse};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Request/response side of the backend.
pub trait MessageApi {
    /// `GET /messages`, ascending by id.
    fn list_messages(
        &self,
        query: &MessageQuery,
    ) -> impl Future<Output = Result<Vec<Message>, ClientError>>;

    /// `POST /messages`, the durable write.
    fn create_message(
        &self,
        req: &SendMessageRequest,
    ) -> impl Future<Output = Result<SendMessageResponse, ClientError>>;
}

/// Page size the backend applies when a request carries no `limit`.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Fetch everything matching `query`, one page at a time. A full page means
/// there may be more, so the next request continues after its highest id.
pub async fn list_all<A: MessageApi>(api: &A, query: MessageQuery) -> Result<Vec<Message>, ClientError> {
    let page_size = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let mut query = query.with_limit(Some(page_size));
    let mut messages = Vec::new();

    loop {
        let page = api.list_messages(&query).await?;
        let full = page.len() >= page_size as usize;
        let cursor = page.iter().map(|m| m.id).max();
        messages.extend(page);

        match cursor {
            // A cursor that does not advance would request the same page again.
            Some(last) if full && query.last_message_id.is_none_or(|prev| last > prev) => {
                debug!("Channel {} has more after message {}", query.channel_id, last);
                query = query.after(Some(last));
            }
            _ => return Ok(messages),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpMessageApi {
    client: Client,
    messages_url: Url,
}

impl HttpMessageApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        let mut base = config.http_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            messages_url: base.join("messages")?,
        })
    }
}

impl MessageApi for HttpMessageApi {
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .client
            .get(self.messages_url.clone())
            .query(query)
            .send()
            .await?;

        let body = check_status(resp).await?.bytes().await?;

        // An empty channel comes back as `null`, not `[]`.
        let messages: Option<Vec<Message>> = serde_json::from_slice(&body)?;
        let messages = messages.unwrap_or_default();
        debug!("Fetched {} messages for channel {}", messages.len(), query.channel_id);
        Ok(messages)
    }

    async fn create_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse, ClientError> {
        let resp = self
            .client
            .post(self.messages_url.clone())
            .json(req)
            .send()
            .await?;

        let body = check_status(resp).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, message};

    fn seeded(count: i64) -> FakeApi {
        let api = FakeApi::default();
        let history = (1..=count).map(|id| message(id, 5, "x")).collect();
        api.backend().history.insert(5, history);
        api
    }

    fn cursors(api: &FakeApi) -> Vec<(Option<u32>, Option<i64>)> {
        api.backend()
            .queries
            .iter()
            .map(|q| (q.limit, q.last_message_id))
            .collect()
    }

    #[tokio::test]
    async fn test_list_all_follows_pages() {
        let api = seeded(5);
        let messages = list_all(&api, MessageQuery::channel(5).with_limit(Some(2))).await.unwrap();

        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(cursors(&api), vec![(Some(2), None), (Some(2), Some(2)), (Some(2), Some(4))]);
    }

    #[tokio::test]
    async fn test_list_all_uses_backend_default_page() {
        let api = seeded(150);
        let messages = list_all(&api, MessageQuery::channel(5)).await.unwrap();

        assert_eq!(messages.len(), 150);
        assert_eq!(messages.last().map(|m| m.id), Some(150));
        assert_eq!(cursors(&api), vec![(Some(100), None), (Some(100), Some(100))]);
    }

    #[tokio::test]
    async fn test_list_all_exact_multiple_ends_on_empty_page() {
        let api = seeded(4);
        let messages = list_all(&api, MessageQuery::channel(5).with_limit(Some(2)).after(Some(0)))
            .await
            .unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(api.backend().queries.len(), 3);
    }

    #[test]
    fn test_messages_url_keeps_base_path() {
        let mut config = ClientConfig::default();
        config.http_url = Url::parse("https://chat.example.com/api").unwrap();
        let api = HttpMessageApi::new(&config).unwrap();
        assert_eq!(api.messages_url.as_str(), "https://chat.example.com/api/messages");

        config.http_url = Url::parse("http://127.0.0.1:8080").unwrap();
        let api = HttpMessageApi::new(&config).unwrap();
        assert_eq!(api.messages_url.as_str(), "http://127.0.0.1:8080/messages");
    }
}
