//! Conversational client for the hosted responses endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt;
use parley_config::Configuration;
use parley_conversation::{ConversationStore, HistoryConfig, HistoryStats};
use parley_core::{ChatMessage, Error, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::codec::{self, LineBuffer, ResponsesRequest, StreamLine};
use crate::retry::retry_with_backoff;

const ACCEPT_VALUE: &str = "application/json, text/event-stream";

struct ClientState {
    config: Configuration,
    history: ConversationStore,
}

/// Multi-turn client owning its configuration and conversation history.
///
/// Clones share the same history. History reads and writes go through one
/// async mutex that is never held across a network call, so concurrent
/// callers see whole turns only.
#[derive(Clone)]
pub struct ResponsesClient {
    http: Client,
    state: Arc<Mutex<ClientState>>,
}

impl ResponsesClient {
    pub fn new(config: Configuration) -> Self {
        Self::with_http_client(Client::new(), config)
    }

    pub fn with_http_client(http: Client, config: Configuration) -> Self {
        info!(
            "Creating ResponsesClient: model={}, endpoint={}",
            config.model(),
            config.endpoint()
        );
        let history = ConversationStore::new(history_config(&config));
        Self {
            http,
            state: Arc::new(Mutex::new(ClientState { config, history })),
        }
    }

    /// Send one user turn and wait for the complete reply.
    ///
    /// The turn is added to history only when the reply arrives.
    pub async fn send(&self, text: &str, extra_instructions: Option<&str>) -> Result<String> {
        self.send_with_cancellation(text, extra_instructions, &CancellationToken::new())
            .await
    }

    pub async fn send_with_cancellation(
        &self,
        text: &str,
        extra_instructions: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let (config, request) = self.prepare(text, extra_instructions, false).await?;

        let reply = retry_with_backoff(config.retry_policy(), cancel, |attempt| {
            self.post_once(&config, &request, attempt)
        })
        .await?;

        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        state.history.commit_turn(text, &reply);
        drop(state);
        info!("Received response ({} chars)", reply.chars().count());
        Ok(reply)
    }

    /// Send one user turn and receive the reply incrementally.
    ///
    /// Nothing happens until the stream is first polled. Each item is one
    /// text delta; the turn is added to history once, after the stream has
    /// completed. Dropping the stream early leaves history untouched, as does
    /// cancelling the token passed to [`Self::stream_with_cancellation`]: the
    /// token is checked before every decoded line and again under the history
    /// lock before the commit.
    pub fn stream(
        &self,
        text: &str,
        extra_instructions: Option<&str>,
    ) -> impl Stream<Item = Result<String>> + Send + use<> {
        self.stream_with_cancellation(text, extra_instructions, CancellationToken::new())
    }

    pub fn stream_with_cancellation(
        &self,
        text: &str,
        extra_instructions: Option<&str>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<String>> + Send + use<> {
        let client = self.clone();
        let text = text.to_string();
        let extra_instructions = extra_instructions.map(str::to_string);

        try_stream! {
            let (config, request) = client
                .prepare(&text, extra_instructions.as_deref(), true)
                .await?;

            let response = retry_with_backoff(config.retry_policy(), &cancel, |attempt| {
                client.open_stream(&config, &request, attempt)
            })
            .await?;

            let idle_timeout = config.request_timeout();
            let mut body = response.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut reply = String::new();
            let mut done = false;

            while !done {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(Error::Cancelled),
                    next = tokio::time::timeout(idle_timeout, body.next()) => {
                        next.map_err(|_| timed_out(idle_timeout))
                    }
                }?;

                let pending = match next {
                    Some(chunk) => {
                        let chunk = chunk.map_err(network_error)?;
                        trace!("chunk: {}", String::from_utf8_lossy(&chunk));
                        lines.push(&chunk)?
                    }
                    None => {
                        done = true;
                        lines.finish().into_iter().collect()
                    }
                };

                for line in pending {
                    if cancel.is_cancelled() {
                        Err::<(), _>(Error::Cancelled)?;
                    }
                    match codec::decode_stream_line(&line)? {
                        StreamLine::Delta(delta) => {
                            reply.push_str(&delta);
                            yield delta;
                        }
                        StreamLine::Done => {
                            done = true;
                            break;
                        }
                        StreamLine::Skip => {}
                    }
                }
            }

            if reply.is_empty() {
                Err::<(), _>(Error::EmptyResponse)?;
            }

            let mut state = client.state.lock().await;
            if cancel.is_cancelled() {
                Err::<(), _>(Error::Cancelled)?;
            }
            state.history.commit_turn(&text, &reply);
            drop(state);
            info!("Stream completed ({} chars)", reply.chars().count());
        }
    }

    pub async fn clear_history(&self) {
        self.state.lock().await.history.clear();
        debug!("Conversation history cleared");
    }

    pub async fn conversation_history(&self) -> Vec<ChatMessage> {
        self.state.lock().await.history.snapshot()
    }

    pub async fn history_stats(&self) -> HistoryStats {
        self.state.lock().await.history.stats()
    }

    pub async fn configuration(&self) -> Configuration {
        self.state.lock().await.config.clone()
    }

    /// Replace the configuration; the new history bounds apply immediately.
    pub async fn update_configuration(&self, config: Configuration) {
        let mut state = self.state.lock().await;
        state.history.reconfigure(history_config(&config));
        info!("Configuration updated: model={}", config.model());
        state.config = config;
    }

    /// Pre-flight for a call: check the key, trim and build the context, and
    /// encode the request against a snapshot of the configuration.
    async fn prepare(
        &self,
        text: &str,
        extra_instructions: Option<&str>,
        stream: bool,
    ) -> Result<(Configuration, ResponsesRequest)> {
        let mut state = self.state.lock().await;
        if state.config.api_key().trim().is_empty() {
            return Err(Error::MissingApiKey);
        }

        let input = state.history.build_context(text);
        debug!(
            "Built context: {} items, {} chars",
            input.len(),
            input.iter().map(ChatMessage::char_count).sum::<usize>()
        );

        let request = ResponsesRequest::new(&state.config, input, extra_instructions, stream);
        Ok((state.config.clone(), request))
    }

    fn request(&self, config: &Configuration, body: &ResponsesRequest) -> RequestBuilder {
        if let Ok(body) = serde_json::to_string(body) {
            trace!("request: {}", body);
        }
        self.http
            .post(config.endpoint().clone())
            .bearer_auth(config.api_key())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_VALUE)
            .json(body)
    }

    async fn post_once(
        &self,
        config: &Configuration,
        request: &ResponsesRequest,
        attempt: u32,
    ) -> Result<String> {
        info!(
            "Sending request to {} (attempt {attempt}): model={}",
            config.endpoint(),
            request.model
        );
        let response = self
            .request(config, request)
            .timeout(config.request_timeout())
            .send()
            .await
            .map_err(network_error)?;

        let response = check_status(response).await?;
        let body = response.text().await.map_err(network_error)?;
        codec::decode_response(&body)
    }

    async fn open_stream(
        &self,
        config: &Configuration,
        request: &ResponsesRequest,
        attempt: u32,
    ) -> Result<Response> {
        info!(
            "Opening stream to {} (attempt {attempt}): model={}",
            config.endpoint(),
            request.model
        );
        let timeout = config.request_timeout();
        let response = tokio::time::timeout(timeout, self.request(config, request).send())
            .await
            .map_err(|_| timed_out(timeout))?
            .map_err(network_error)?;

        check_status(response).await
    }
}

fn history_config(config: &Configuration) -> HistoryConfig {
    HistoryConfig::new(config.max_history_items(), config.max_context_characters())
}

/// Pass 2xx responses through; drain anything else into a status error.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_informational() {
        return Err(Error::InvalidResponse);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> Error {
    Error::BadResponse {
        status_code: status.as_u16(),
        message: codec::error_message(body),
    }
}

fn network_error(err: reqwest::Error) -> Error {
    Error::Network(err.to_string())
}

fn timed_out(after: Duration) -> Error {
    Error::Network(format!("timed out after {}s", after.as_secs_f64()))
}
