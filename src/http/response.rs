//! Reply formatting.
//!
//! # Responsibilities
//! - Render a worker [`ResponseRecord`] as an HTTP/1.1 reply
//! - Provide the fixed empty replies (400, 502, 503, 504)
//!
//! # Design Decisions
//! - Every reply closes the connection; one request per connection
//! - `Content-Length` is computed from the body actually sent
//! - A status the worker should never produce maps to 502 Bad Gateway

use axum::http::StatusCode;

use crate::channel::layout::ResponseRecord;

/// Status line, headers and body of a reply.
pub fn format_reply(status: u16, reason: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        body.len()
    );
    let mut reply = Vec::with_capacity(head.len() + body.len());
    reply.extend_from_slice(head.as_bytes());
    reply.extend_from_slice(body);
    reply
}

/// Reason phrase for a status code, "Unknown" when it has none.
pub fn reason_phrase(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown")
}

/// Render the worker's response. Returns the status actually sent.
pub fn render(record: &ResponseRecord) -> (StatusCode, Vec<u8>) {
    match u16::try_from(record.status_code)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
    {
        Some(status) => {
            let reply = format_reply(
                status.as_u16(),
                reason_phrase(status.as_u16()),
                record.body(),
            );
            (status, reply)
        }
        None => {
            tracing::warn!(
                request_id = record.request_id,
                status = record.status_code,
                "Worker returned an invalid status code"
            );
            (StatusCode::BAD_GATEWAY, empty(StatusCode::BAD_GATEWAY))
        }
    }
}

/// A reply with no body.
pub fn empty(status: StatusCode) -> Vec<u8> {
    format_reply(status.as_u16(), reason_phrase(status.as_u16()), b"")
}
