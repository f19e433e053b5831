use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use tracing::debug;

use crate::{
    backend::{BackendError, BackendLineStream, ChatBackend},
    config::BackendConfig,
    models::{BackendCompletion, BackendRequest},
};

pub const MISSING_API_KEY: &str = "CEREBRAS_API_KEY environment variable is required";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a hosted OpenAI-style `/chat/completions` endpoint.
#[derive(Clone)]
pub struct CerebrasClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    request_timeout: Duration,
    stream_idle_timeout: Option<Duration>,
}

impl CerebrasClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|error| {
                BackendError::Configuration(format!("failed to build backend HTTP client: {error}"))
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            request_timeout: config.request_timeout,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendError::Configuration(MISSING_API_KEY.to_owned()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ChatBackend for CerebrasClient {
    fn name(&self) -> &str {
        "cerebras"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendCompletion, BackendError> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(api_key)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(map_http_error(
                response.status(),
                response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown backend error".to_owned()),
            ));
        }

        response
            .json::<BackendCompletion>()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))
    }

    async fn open_stream(&self, request: BackendRequest) -> Result<BackendLineStream, BackendError> {
        let api_key = self.api_key()?;

        let pending = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(api_key)
            .json(&request)
            .send();
        let response = match self.stream_idle_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| idle_timeout_error(limit))?,
            None => pending.await,
        }
        .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(map_http_error(
                response.status(),
                response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown backend error".to_owned()),
            ));
        }

        let lines = line_stream(response.bytes_stream(), self.stream_idle_timeout);

        debug!(backend = self.name(), "stream opened");
        Ok(lines)
    }
}

/// Turns a raw body stream into backend lines. With an idle limit, a gap longer than
/// the limit between reads ends the stream with a timeout error.
fn line_stream<S, B>(upstream: S, idle_timeout: Option<Duration>) -> BackendLineStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut lines = LineBuffer::default();

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, upstream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield Err(idle_timeout_error(limit));
                        return;
                    }
                },
                None => upstream.next().await,
            };

            let Some(next) = next else {
                break;
            };

            let bytes = match next {
                Ok(bytes) => bytes,
                Err(error) => {
                    yield Err(BackendError::Unavailable(error.to_string()));
                    return;
                }
            };

            for line in lines.push(bytes.as_ref()) {
                yield Ok(line);
            }
        }

        if let Some(line) = lines.finish() {
            yield Ok(line);
        }
    };

    stream.boxed()
}

/// Splits a byte stream into lines without assuming chunk boundaries line up with
/// line or UTF-8 character boundaries.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(index) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=index).collect::<Vec<_>>();
            lines.push(decode_line(&line[..index]));
        }
        lines
    }

    fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(decode_line(&self.pending))
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn map_transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout(error.to_string())
    } else {
        BackendError::Unavailable(error.to_string())
    }
}

fn map_http_error(status: StatusCode, body: String) -> BackendError {
    BackendError::Http {
        status: status.as_u16(),
        body: body.chars().take(400).collect(),
    }
}

fn idle_timeout_error(limit: Duration) -> BackendError {
    BackendError::Timeout(format!("no data from backend within {limit:?}"))
}
