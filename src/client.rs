//! HTTP client for the run status endpoints.
//!
//! `GET /status/runs/{run_id}` is a `text/event-stream` of snapshots for one
//! run. The client behaves like a browser EventSource: when the connection
//! drops it waits the server-advertised `retry` delay and reconnects with
//! `Last-Event-ID`; a bad status or content type fails the subscription for
//! good. The subscription ends normally once the session reports the run
//! inactive.
//!
//! `GET /status/runs` is the run listing. It is fetched once for information
//! only; nothing consumes its contents yet.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;

use crate::session::CounterSession;
use crate::sse::SseDecoder;

/// Reconnection delay used until the server sends a `retry` field.
pub const DEFAULT_RETRY: Duration = Duration::from_millis(3000);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("could not reach {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url} is not an event stream (content type {content_type:?})")]
    ContentType { url: String, content_type: String },

    #[error("invalid listing from {url}: {source}")]
    Listing {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// Whether an EventSource would try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// How one connection ended without a permanent failure.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// The session closed its subscription.
    Closed,
    /// The server ended the response or the transport failed.
    Dropped,
}

#[derive(Clone)]
pub struct StatusClient {
    http: reqwest::Client,
    base_url: String,
    retry: Duration,
}

impl StatusClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: DEFAULT_RETRY,
        })
    }

    /// Override the reconnection delay used before the server sends `retry`.
    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn listing_url(&self) -> String {
        format!("{}/status/runs", self.base_url)
    }

    pub fn run_url(&self, run_id: &str) -> String {
        format!("{}/status/runs/{}", self.base_url, encode_path_segment(run_id))
    }

    /// Fetch the run listing and return its parsed body.
    pub async fn list_runs(&self) -> Result<serde_json::Value, ClientError> {
        let url = self.listing_url();
        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| ClientError::Connect {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status { url, status });
        }

        let body = resp.text().await.map_err(|source| ClientError::Connect {
            url: url.clone(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|source| ClientError::Listing { url, source })
    }

    /// Feed `session` from its run's event stream until the run finishes.
    ///
    /// Returns `Ok(())` once the session closed its subscription. A malformed
    /// payload is logged and dropped; the stream stays open.
    pub async fn subscribe(&self, session: Arc<CounterSession>) -> Result<(), ClientError> {
        let url = self.run_url(session.run_id());
        let closed = session.subscription_token();
        let mut decoder = SseDecoder::new();

        loop {
            let outcome = tokio::select! {
                biased;
                _ = closed.cancelled() => return Ok(()),
                outcome = self.stream_once(&url, &session, &mut decoder) => outcome,
            };

            match outcome {
                Ok(StreamEnd::Closed) => return Ok(()),
                Ok(StreamEnd::Dropped) => {}
                Err(e) if e.is_retryable() => {
                    tracing::debug!(run_id = %session.run_id(), error = %e, "connect failed");
                }
                Err(e) => return Err(e),
            }

            let delay = decoder.retry().unwrap_or(self.retry);
            tracing::warn!(
                run_id = %session.run_id(),
                delay_ms = delay.as_millis() as u64,
                "status stream lost, reconnecting"
            );
            decoder.reset_connection();

            tokio::select! {
                _ = closed.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream_once(
        &self,
        url: &str,
        session: &CounterSession,
        decoder: &mut SseDecoder,
    ) -> Result<StreamEnd, ClientError> {
        let mut req = self
            .http
            .get(url)
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = decoder.last_event_id() {
            req = req.header("Last-Event-ID", id);
        }

        let resp = req.send().await.map_err(|source| ClientError::Connect {
            url: url.to_string(),
            source,
        })?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ClientError::Status {
                url: url.to_string(),
                status,
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.trim_start().starts_with(EVENT_STREAM) {
            return Err(ClientError::ContentType {
                url: url.to_string(),
                content_type: content_type.to_string(),
            });
        }

        tracing::info!(run_id = %session.run_id(), "status stream connected");

        let mut body = std::pin::pin!(resp.bytes_stream());
        loop {
            let chunk = match body.next().await {
                Some(Ok(chunk)) => chunk,
                None => return Ok(StreamEnd::Dropped),
                Some(Err(e)) => {
                    tracing::debug!(run_id = %session.run_id(), error = %e, "stream read failed");
                    return Ok(StreamEnd::Dropped);
                }
            };

            for event in decoder.feed(&chunk) {
                if !event.is_message() {
                    tracing::trace!(event = %event.event, "ignoring named event");
                    continue;
                }
                if let Err(e) = session.on_message(&event.data) {
                    tracing::error!(
                        run_id = %session.run_id(),
                        error = %e,
                        "dropping malformed snapshot"
                    );
                    continue;
                }
                if session.is_closed() {
                    return Ok(StreamEnd::Closed);
                }
            }
        }
    }

    /// Run [`subscribe`](Self::subscribe) on its own task, logging how it ended.
    pub fn spawn_subscription(
        &self,
        session: Arc<CounterSession>,
    ) -> tokio::task::JoinHandle<Result<(), ClientError>> {
        let client = self.clone();
        tokio::spawn(async move {
            let run_id = session.run_id().to_string();
            let result = client.subscribe(session).await;
            match &result {
                Ok(()) => tracing::debug!(%run_id, "subscription finished"),
                Err(e) => tracing::error!(%run_id, error = %e, "subscription failed"),
            }
            result
        })
    }
}

/// Percent-encode a run id for use as a single URL path segment.
fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(b as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", b)),
        }
    }
    encoded
}
