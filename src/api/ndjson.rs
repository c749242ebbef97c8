//! Newline-delimited JSON streaming responses
//!
//! The chat-stream and session-stream endpoints emit one JSON object per
//! line and end by closing the transport; there is no end-of-stream
//! sentinel. The content type stays `text/event-stream` for compatibility
//! with the clients already consuming these routes.

use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::Response;
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;

/// Wrap a line stream into a streaming HTTP response.
pub fn ndjson_response<S>(lines: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    // Builder only fails on malformed parts; ours are constants.
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(lines))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Serialize one value as a single newline-terminated line.
pub fn line<T: Serialize>(value: &T) -> Bytes {
    let mut buf = match serde_json::to_vec(value) {
        Ok(buf) => buf,
        // Serialize on these types cannot fail; keep the stream alive if
        // it ever does.
        Err(_) => b"{}".to_vec(),
    };
    buf.push(b'\n');
    Bytes::from(buf)
}
