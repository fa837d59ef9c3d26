//! Streamed versus buffered delivery of backend events
//!
//! Every streaming call is relayed through a producer task and a bounded channel. The HTTP
//! side then either writes each event as one NDJSON line as soon as it arrives, or waits for
//! the completing event and answers with a single JSON document.
use crate::api::{Progress, StreamPreference};
use crate::errors::RouterError;
use crate::traits::EventStream;
use axum::{
    Json,
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 16;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Streaming,
    Buffered,
}

impl Delivery {
    /// Streaming unless the caller explicitly asked for `"stream": false`.
    pub fn of(request: &impl StreamPreference) -> Self {
        match request.stream() {
            Some(false) => Delivery::Buffered,
            _ => Delivery::Streaming,
        }
    }
}

/// Drains `events` on a dedicated task into a bounded channel.
///
/// The task stops, dropping (and so cancelling) the backend call, as soon as the receiving
/// side is closed.
pub fn spawn_producer<T: Send + 'static>(
    mut events: EventStream<T>,
) -> ReceiverStream<Result<T, RouterError>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = tx.closed() => {
                    trace!("event consumer went away, stopping producer");
                    break;
                }
                next = events.next() => match next {
                    Some(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Consumes events until one completes the response, accumulating them in arrival order.
pub async fn collect<T, S>(mut events: S) -> Result<T, RouterError>
where
    T: Progress,
    S: Stream<Item = Result<T, RouterError>> + Unpin,
{
    let mut pending: Option<T> = None;
    while let Some(event) = events.next().await {
        let event = event?;
        let merged = match pending.take() {
            Some(mut acc) => {
                acc.merge_next(event);
                acc
            }
            None => event,
        };
        if merged.is_complete() {
            return Ok(merged);
        }
        pending = Some(merged);
    }
    Err(RouterError::Protocol(
        "unexpected end of progress response".into(),
    ))
}

/// Writes each event as one JSON line. Mid-stream errors become `{"error": "..."}` lines.
pub fn ndjson_response<T, S>(events: S) -> Response
where
    T: Serialize,
    S: Stream<Item = Result<T, RouterError>> + Send + 'static,
{
    let body = events.map(|event| {
        let mut line = match event {
            Ok(event) => serde_json::to_vec(&event),
            Err(e) => serde_json::to_vec(&json!({ "error": e.to_string() })),
        }
        .map_err(std::io::Error::other)?;
        line.push(b'\n');
        Ok::<_, std::io::Error>(Bytes::from(line))
    });

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response()
}

/// Relays a backend event stream to the client in the requested delivery mode.
pub async fn respond<T: Progress>(
    delivery: Delivery,
    events: EventStream<T>,
) -> Result<Response, RouterError> {
    let events = spawn_producer(events);
    match delivery {
        Delivery::Streaming => Ok(ndjson_response(events)),
        Delivery::Buffered => Ok(Json(collect(events).await?).into_response()),
    }
}
