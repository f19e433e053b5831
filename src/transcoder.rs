//! Re-frames a backend event stream as an outbound stream, one line at a time.
//!
//! A transcoder moves through `started -> emitting* -> terminating -> closed`. Opening
//! the backend happens on first poll, after response headers are already committed, so
//! every failure from then on travels inside the stream as a single error chunk
//! (`errored`) instead of as an HTTP status. Dropping the outbound stream (client
//! disconnect) drops the backend line stream with it, which closes the upstream
//! connection.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::{
    backend::ChatBackend,
    metrics::AppMetrics,
    models::{BackendRequest, BackendStreamEvent},
    translate::{self, OutboundChunk, ResponseContext},
};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const DONE_SENTINEL: &str = "[DONE]";

/// Classification of one raw backend line.
#[derive(Debug)]
pub enum BackendLine {
    Event(BackendStreamEvent),
    Done,
    /// Blank lines, SSE comments and non-`data` fields.
    Ignored,
    Malformed(serde_json::Error),
}

pub fn parse_backend_line(line: &str) -> BackendLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return BackendLine::Ignored;
    }

    let Some(payload) = line.strip_prefix("data:") else {
        return BackendLine::Ignored;
    };
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return BackendLine::Done;
    }

    match serde_json::from_str::<BackendStreamEvent>(payload) {
        Ok(event) => BackendLine::Event(event),
        Err(error) => BackendLine::Malformed(error),
    }
}

/// Drives one backend stream and yields the outbound chunks for it.
///
/// A successful stream yields one chunk per content-bearing event followed by exactly
/// one terminal chunk. A failed stream ends with exactly one error chunk.
pub fn transcode(
    backend: Arc<dyn ChatBackend>,
    request: BackendRequest,
    context: ResponseContext,
    metrics: Arc<AppMetrics>,
) -> impl Stream<Item = OutboundChunk> + Send + 'static {
    async_stream::stream! {
        let flavor = context.flavor.label();

        let mut lines = match backend.open_stream(request).await {
            Ok(lines) => lines,
            Err(error) => {
                metrics.observe_backend_error("stream_open", error.kind());
                metrics.observe_stream_chunk(flavor, "error");
                warn!(backend = backend.name(), flavor, error = %error, "backend stream failed to open");
                yield translate::error_chunk(context.flavor, error.to_string());
                return;
            }
        };

        let mut emitted = 0_u64;
        let mut malformed = 0_u64;
        let mut saw_sentinel = false;

        while let Some(next) = lines.next().await {
            let line = match next {
                Ok(line) => line,
                Err(error) => {
                    metrics.observe_backend_error("stream_read", error.kind());
                    metrics.observe_stream_chunk(flavor, "error");
                    if malformed > 0 {
                        metrics.observe_malformed_lines(malformed);
                    }
                    warn!(flavor, emitted, error = %error, "backend stream broke mid-response");
                    yield translate::error_chunk(context.flavor, error.to_string());
                    return;
                }
            };

            match parse_backend_line(&line) {
                BackendLine::Done => {
                    saw_sentinel = true;
                    break;
                }
                BackendLine::Ignored => {}
                BackendLine::Malformed(error) => {
                    malformed += 1;
                    debug!(flavor, error = %error, "skipping malformed backend line");
                }
                BackendLine::Event(event) => {
                    if let Some(chunk) = translate::to_stream_chunk(&event, &context) {
                        emitted += 1;
                        metrics.observe_stream_chunk(flavor, "content");
                        yield chunk;
                    }
                }
            }
        }

        drop(lines);

        if malformed > 0 {
            metrics.observe_malformed_lines(malformed);
            warn!(flavor, malformed, "skipped malformed backend stream lines");
        }
        info!(flavor, emitted, saw_sentinel, "stream completed");

        metrics.observe_stream_chunk(flavor, "terminal");
        yield translate::terminal_chunk(&context);
    }
}

/// Newline-delimited JSON framing: one object per line, no end sentinel.
pub fn ndjson_response<S>(chunks: S) -> Response
where
    S: Stream<Item = OutboundChunk> + Send + 'static,
{
    let body = chunks.map(|chunk| Ok::<String, Infallible>(ndjson_line(&chunk)));

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Server-sent-event framing: `data: {json}` per chunk, then `data: [DONE]` once the
/// terminal chunk has gone out.
pub fn sse_response<S>(chunks: S) -> Response
where
    S: Stream<Item = OutboundChunk> + Send + 'static,
{
    let events = async_stream::stream! {
        tokio::pin!(chunks);
        while let Some(chunk) = chunks.next().await {
            let terminal = chunk.is_terminal();
            yield Ok::<Event, Infallible>(Event::default().data(to_json(&chunk)));
            if terminal {
                yield Ok::<Event, Infallible>(Event::default().data(DONE_SENTINEL));
            }
        }
    };

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
        .into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn ndjson_line(chunk: &OutboundChunk) -> String {
    let mut line = to_json(chunk);
    line.push('\n');
    line
}

fn to_json(chunk: &OutboundChunk) -> String {
    match serde_json::to_string(chunk) {
        Ok(serialized) => serialized,
        Err(error) => {
            let fallback = serde_json::json!({
                "error": format!("serialization error: {error}")
            });
            fallback.to_string()
        }
    }
}
