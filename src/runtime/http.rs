//! HTTP transport and fetcher for the chat API

use super::traits::{ByteStream, ChatFetcher, StreamTransport};
use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::wire::{
    Attachment, ChatDetail, CreateChatRequest, CreateMessageRequest, ModelConfiguration,
    ResponseMode, StreamRequest,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde_json::Value;
use std::io;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Optional fields for a new turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub system: Option<String>,
    pub attachments: Vec<Attachment>,
    pub project_id: Option<String>,
    pub chat_privacy: Option<String>,
}

/// `reqwest` client for both seams
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        // A total timeout would cut long replies; only idle reads are bounded
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| StreamError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request that starts a new conversation
    pub fn create_chat_request(&self, message: &str, options: &RequestOptions) -> StreamRequest {
        let mut body = CreateChatRequest::new(message);
        body.system.clone_from(&options.system);
        body.attachments.clone_from(&options.attachments);
        body.project_id.clone_from(&options.project_id);
        body.chat_privacy.clone_from(&options.chat_privacy);
        body.model_configuration = self.model_configuration();
        body.response_mode = Some(ResponseMode::ExperimentalStream);

        self.stream_request(
            self.config.chats_url(),
            serde_json::to_value(&body).unwrap_or(Value::Null),
        )
    }

    /// Request that adds a turn to an existing conversation
    pub fn follow_up_request(
        &self,
        chat_id: &str,
        message: &str,
        options: &RequestOptions,
    ) -> StreamRequest {
        let mut body = CreateMessageRequest::new(message);
        body.attachments.clone_from(&options.attachments);
        body.model_configuration = self.model_configuration();
        body.response_mode = Some(ResponseMode::ExperimentalStream);

        self.stream_request(
            self.config.messages_url(chat_id),
            serde_json::to_value(&body).unwrap_or(Value::Null),
        )
    }

    fn model_configuration(&self) -> Option<ModelConfiguration> {
        self.config.model.as_ref().map(|model| ModelConfiguration {
            model_id: Some(model.clone()),
            ..ModelConfiguration::default()
        })
    }

    fn stream_request(&self, url: String, body: Value) -> StreamRequest {
        let mut headers = self.config.auth_headers();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        StreamRequest {
            url,
            headers,
            body,
            debug: self.config.debug,
        }
    }
}

fn request_error(e: &reqwest::Error) -> StreamError {
    if e.is_timeout() {
        StreamError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        StreamError::network(format!("Connection failed: {e}"))
    } else {
        StreamError::unknown(format!("Request failed: {e}"))
    }
}

#[async_trait]
impl StreamTransport for HttpClient {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| request_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::from_status(status.as_u16(), &body));
        }

        tracing::info!(url = %request.url, status = status.as_u16(), "Stream opened");
        Ok(response.bytes_stream().map_err(io::Error::other).boxed())
    }
}

#[async_trait]
impl ChatFetcher for HttpClient {
    async fn fetch_chat(&self, chat_id: &str) -> Result<ChatDetail, StreamError> {
        let url = self.config.chat_url(chat_id);
        let mut builder = self.client.get(&url).timeout(self.config.timeout);
        for (name, value) in self.config.auth_headers() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| request_error(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StreamError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(StreamError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| StreamError::protocol(format!("Failed to parse chat detail: {e}")))
    }
}
