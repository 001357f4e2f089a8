use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response, Url};
use tracing::{debug, info, warn};

use super::types::ChatRequest;
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::stream::{decode_stream, DeltaAggregator, FragmentSink, SseRecord};

/// Streaming client for one chat-completion endpoint.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    url: Url,
    api_key: String,
    model: String,
    system_prompt: String,
    max_retries: u32,
    retry_backoff: Duration,
    stall_timeout: Option<Duration>,
}

impl ChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self, ChatError> {
        let url = config.validate()?;

        // Only connecting is bounded by reqwest. A whole-request timeout
        // would cut off long replies that are still streaming.
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            stall_timeout: config.request_timeout(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn request_for(&self, prompt: &str) -> ChatRequest {
        ChatRequest::single_turn(&self.model, &self.system_prompt, prompt)
    }

    /// Send `prompt` and stream the reply into `sink`.
    ///
    /// Returns the full text once the stream has finished, or
    /// `EmptyContent` if it carried no text at all.
    pub async fn send(&self, prompt: &str, mut sink: impl FragmentSink) -> Result<String, ChatError> {
        let records = self.send_events(prompt).await?;
        let mut records = std::pin::pin!(records);
        let mut aggregator = DeltaAggregator::new();

        while let Some(record) = records.next().await {
            if aggregator.push(record?, &mut sink) {
                break;
            }
        }

        if !aggregator.is_finished() {
            debug!("body ended without stop or [DONE]");
        }
        info!(
            fragments = aggregator.fragment_count(),
            bytes = aggregator.text().len(),
            saw_stop = aggregator.saw_stop(),
            "chat reply complete"
        );
        aggregator.into_result()
    }

    /// Send `prompt` and return the decoded records as they arrive.
    pub async fn send_events(
        &self,
        prompt: &str,
    ) -> Result<impl Stream<Item = Result<SseRecord, ChatError>> + Send, ChatError> {
        let request = self.request_for(prompt);
        let response = self.open(&request).await?;
        Ok(decode_stream(response.bytes_stream(), self.stall_timeout))
    }

    async fn open(&self, request: &ChatRequest) -> Result<Response, ChatError> {
        let mut attempt = 0;
        loop {
            match self.post(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_backoff * attempt;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "chat request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(error = %e, "chat request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn post(&self, request: &ChatRequest) -> Result<Response, ChatError> {
        debug!(url = %self.url, model = %request.model, "sending chat request");

        let pending = self
            .client
            .post(self.url.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send();

        let response = match self.stall_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| ChatError::Stalled {
                    stage: "waiting for response headers",
                    after: limit,
                })??,
            None => pending.await?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status: status.as_u16(), body });
        }

        Ok(response)
    }
}
