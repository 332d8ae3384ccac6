//! SSE (Server-Sent Events) relay for streaming chat completions.
//!
//! The response headers are committed before the upstream call is made, so
//! everything after that point, including upstream failures, is reported
//! in-band as `data:` events. Each upstream byte chunk becomes exactly one
//! `chat.completion.chunk` event, in arrival order, and a successful stream
//! ends with a single `data: [DONE]`.
//!
//! The relay task owns the only write handle ([`SseSink`]); closing consumes
//! it, so nothing can be written after the stream is closed and the stream
//! cannot be closed twice.

use std::convert::Infallible;
use std::future::Future;
use std::time::Instant;

use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::server::error::ApiError;
use crate::server::transcoder::to_chunk;
use crate::upstream::client::ByteStream;

/// Terminal sentinel sent after the last chunk.
pub const DONE_SENTINEL: &str = "[DONE]";

const CHANNEL_CAPACITY: usize = 32;

/// Client side of the relay: the SSE body stream.
pub type EventStream = ReceiverStream<Result<Event, Infallible>>;

/// The client went away; nothing more can be delivered.
#[derive(Debug, Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Single-writer handle to the client event stream.
#[derive(Debug)]
pub struct SseSink {
    tx: mpsc::Sender<Result<Event, Infallible>>,
}

impl SseSink {
    pub async fn send(&mut self, event: Event) -> Result<(), ClientGone> {
        self.tx.send(Ok(event)).await.map_err(|_| ClientGone)
    }

    /// Send `data: <json>`.
    ///
    /// A value that fails to serialize is replaced by an in-band error frame
    /// so the client never sees an empty `data:` line.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), ClientGone> {
        let event = match Event::default().json_data(value) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Failed to serialize SSE payload");
                Event::default().data(r#"{"error":"failed to serialize event"}"#)
            }
        };
        self.send(event).await
    }

    /// Resolves once the client side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// End the stream. Consumes the sink.
    pub fn close(self) {
        drop(self.tx);
    }
}

/// Create a connected sink / event stream pair.
pub fn sse_channel() -> (SseSink, EventStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (SseSink { tx }, ReceiverStream::new(rx))
}

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished; `[DONE]` was sent.
    Done { chunks: usize },
    /// An error event was sent instead of `[DONE]`.
    Failed { chunks: usize },
    /// The client disconnected; the upstream read was abandoned.
    ClientDisconnected { chunks: usize },
}

/// Incremental UTF-8 decoding across chunk boundaries.
///
/// A multi-byte sequence split between two chunks is held back and emitted
/// with the next chunk. Invalid bytes become U+FFFD. Output is produced per
/// input chunk only, so the number of decoded fragments always equals the
/// number of chunks.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut pos = 0;
        while pos < self.pending.len() {
            match std::str::from_utf8(&self.pending[pos..]) {
                Ok(s) => {
                    out.push_str(s);
                    pos = self.pending.len();
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[pos..pos + valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            pos += valid + bad;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            pos += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..pos);
        out
    }

    /// Number of bytes of a sequence the upstream never completed.
    fn finish(self) -> usize {
        self.pending.len()
    }
}

fn error_event_body(err: &ApiError) -> serde_json::Value {
    serde_json::json!({ "error": err.to_string() })
}

/// Drive one relay to completion and close the sink.
///
/// `upstream` resolves to the upstream body stream, or to the error that
/// prevented streaming from starting.
pub async fn relay<F>(upstream: F, mut sink: SseSink, model: &str) -> RelayOutcome
where
    F: Future<Output = Result<ByteStream, ApiError>>,
{
    let outcome = pump(upstream, &mut sink, model).await;
    sink.close();
    outcome
}

async fn pump<F>(upstream: F, sink: &mut SseSink, model: &str) -> RelayOutcome
where
    F: Future<Output = Result<ByteStream, ApiError>>,
{
    tokio::pin!(upstream);

    let started = tokio::select! {
        biased;
        _ = sink.closed() => return RelayOutcome::ClientDisconnected { chunks: 0 },
        res = &mut upstream => res,
    };

    let mut body = match started {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Upstream failed before streaming began");
            return match sink.send_json(&error_event_body(&e)).await {
                Ok(()) => RelayOutcome::Failed { chunks: 0 },
                Err(ClientGone) => RelayOutcome::ClientDisconnected { chunks: 0 },
            };
        }
    };

    let mut decoder = Utf8Decoder::default();
    let mut chunks = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.closed() => return RelayOutcome::ClientDisconnected { chunks },
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                let text = decoder.decode(&bytes);
                if sink.send_json(&to_chunk(&text, model)).await.is_err() {
                    return RelayOutcome::ClientDisconnected { chunks };
                }
                chunks += 1;
            }
            Some(Err(e)) => {
                warn!(error = %e, chunks, "Upstream stream broke off");
                return match sink.send_json(&error_event_body(&e)).await {
                    Ok(()) => RelayOutcome::Failed { chunks },
                    Err(ClientGone) => RelayOutcome::ClientDisconnected { chunks },
                };
            }
            None => break,
        }
    }

    let truncated = decoder.finish();
    if truncated > 0 {
        warn!(bytes = truncated, chunks, "Upstream ended inside a UTF-8 sequence; dropping tail");
    }

    match sink.send(Event::default().data(DONE_SENTINEL)).await {
        Ok(()) => RelayOutcome::Done { chunks },
        Err(ClientGone) => RelayOutcome::ClientDisconnected { chunks },
    }
}

/// Wrap an event stream in an SSE response with the streaming headers set.
pub fn sse_response(events: EventStream) -> Response {
    (
        [(header::CONNECTION, HeaderValue::from_static("keep-alive"))],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// Commit an SSE response now and relay `upstream` into it from a background task.
pub fn stream_chat_completion<F>(upstream: F, model: String, request_id: String) -> Response
where
    F: Future<Output = Result<ByteStream, ApiError>> + Send + 'static,
{
    let (sink, events) = sse_channel();

    tokio::spawn(async move {
        let started = Instant::now();
        let outcome = relay(upstream, sink, &model).await;
        info!(
            request_id,
            model,
            ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stream finished"
        );
    });

    sse_response(events)
}
