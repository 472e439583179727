//! Long-polling over HTTP POST.

use std::time::Duration;

use async_trait::async_trait;

use super::{AbortSignal, ClientTransport};
use crate::client::TransportError;
use crate::domain::entities::{connection_types, Message};

#[derive(Debug)]
pub struct LongPollingTransport {
    url: String,
    http: reqwest::Client,
    abort: AbortSignal,
}

impl LongPollingTransport {
    /// The cookie store keeps the browser cookie across requests.
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self::with_client(url, http))
    }

    pub fn with_client(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http,
            abort: AbortSignal::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, messages: &[Message]) -> Result<Vec<Message>, TransportError> {
        let response = self.http.post(&self.url).json(messages).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ClientTransport for LongPollingTransport {
    fn name(&self) -> &'static str {
        connection_types::LONG_POLLING
    }

    async fn send(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let token = self.abort.token();
        tokio::select! {
            result = self.post(&messages) => result,
            _ = token.cancelled() => Err(TransportError::Aborted),
        }
    }

    fn abort(&self) {
        tracing::debug!(url = %self.url, "Aborting long-polling requests");
        self.abort.abort();
    }
}
