use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{
    backend::{BackendError, BackendLineStream, ChatBackend},
    models::{BackendCompletion, BackendRequest},
};

/// Scripted backend for tests: replays a fixed completion and a fixed list of raw
/// stream lines, and records every request it receives.
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    completion: String,
    stream_lines: Vec<String>,
    failure: Option<(u16, String)>,
    line_delay: Duration,
    break_after: Option<usize>,
    requests: Arc<Mutex<Vec<BackendRequest>>>,
    abandoned: Arc<AtomicBool>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            name: "mock-backend".to_owned(),
            completion: "Mock response".to_owned(),
            stream_lines: sse_lines(&["Mock ", "response"]),
            failure: None,
            line_delay: Duration::ZERO,
            break_after: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MockBackend {
    /// Replies with `content` to unary calls and streams it back as a single delta.
    pub fn replying(content: &str) -> Self {
        Self {
            completion: content.to_owned(),
            stream_lines: sse_lines(&[content]),
            ..Self::default()
        }
    }

    /// Streams each delta as its own event, followed by the `[DONE]` sentinel.
    pub fn streaming(deltas: &[&str]) -> Self {
        Self::default().with_stream_lines(sse_lines(deltas))
    }

    /// Every call fails as if the backend answered with `status`.
    pub fn failing(status: u16, body: &str) -> Self {
        Self {
            failure: Some((status, body.to_owned())),
            ..Self::default()
        }
    }

    pub fn with_stream_lines(mut self, lines: Vec<String>) -> Self {
        self.stream_lines = lines;
        self
    }

    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// Delivers the first `lines` scripted lines, then fails the read as a dropped
    /// connection would.
    pub fn with_stream_error_after(mut self, lines: usize) -> Self {
        self.break_after = Some(lines);
        self
    }

    pub fn recorded_requests(&self) -> Vec<BackendRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// True once a stream consumer went away before all scripted lines were delivered.
    pub fn stream_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn record(&self, request: BackendRequest) -> Result<(), BackendError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        match &self.failure {
            Some((status, body)) => Err(BackendError::Http {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendCompletion, BackendError> {
        self.record(request)?;
        Ok(BackendCompletion::from_content(self.completion.clone()))
    }

    async fn open_stream(&self, request: BackendRequest) -> Result<BackendLineStream, BackendError> {
        self.record(request)?;

        let lines = self.stream_lines.clone();
        let delay = self.line_delay;
        let break_after = self.break_after;
        let abandoned = self.abandoned.clone();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            for (index, line) in lines.into_iter().enumerate() {
                if break_after == Some(index) {
                    let _ = tx
                        .send(Err(BackendError::Unavailable("connection reset".to_owned())))
                        .await;
                    return;
                }

                if tx.send(Ok(line)).await.is_err() {
                    abandoned.store(true, Ordering::SeqCst);
                    return;
                }

                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        });

        debug!(backend = %self.name, "stream prepared");
        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Renders deltas the way the hosted backend frames them, ending with `[DONE]`.
pub fn sse_lines(deltas: &[&str]) -> Vec<String> {
    let mut lines = Vec::with_capacity(deltas.len() * 2 + 1);
    for delta in deltas {
        let event = json!({
            "object": "chat.completion.chunk",
            "choices": [{
                "index": 0,
                "delta": { "content": delta },
                "finish_reason": null
            }]
        });
        lines.push(format!("data: {event}"));
        lines.push(String::new());
    }
    lines.push("data: [DONE]".to_owned());
    lines
}
