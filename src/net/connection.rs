//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Assign each accepted connection its request id
//! - Drive one request through read → parse → submit → await → reply
//! - Shut the stream down on every exit path
//! - Track live connections for shutdown and metrics
//!
//! # Data Flow
//! ```text
//! Accepted
//!     → Handshaking (TLS, optional, bounded by read timeout)
//!     → Reading (until head + declared body, buffer full, EOF, or timeout)
//!     → Submitted (RequestSubmitter)
//!     → AwaitingResponse (ResponseCorrelator, bounded by response timeout)
//!     → Replying
//!     → Closed(reason)
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::channel::correlator::ResponseCorrelator;
use crate::channel::layout::{RequestRecord, BODY_LEN};
use crate::channel::submitter::{RequestSubmitter, SubmitError};
use crate::http::parser::{self, scan};
use crate::http::response;
use crate::observability::metrics;

/// Read buffer per connection: twice the body block.
pub const REQUEST_BUFFER_LEN: usize = 2 * BODY_LEN;

/// Hands out request ids. Starts at 1; a zeroed slot carries id 0.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Next id. Wraps at `u64::MAX`.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Handshaking,
    Reading,
    Submitted,
    AwaitingResponse,
    Replying,
    Closed(CloseReason),
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A worker response was delivered.
    Completed,
    HandshakeFailed,
    /// EOF, error, or timeout before any request bytes.
    ReadFailed,
    /// Answered 400.
    ParseFailed,
    /// Request ring full; answered 503.
    Rejected,
    /// No response in time; answered 504.
    TimedOut,
    WriteFailed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Completed => "completed",
            CloseReason::HandshakeFailed => "handshake_failed",
            CloseReason::ReadFailed => "read_failed",
            CloseReason::ParseFailed => "parse_failed",
            CloseReason::Rejected => "rejected",
            CloseReason::TimedOut => "timed_out",
            CloseReason::WriteFailed => "write_failed",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection bookkeeping. Owned by the task serving the connection.
#[derive(Debug)]
pub struct ConnectionContext {
    pub request_id: u64,
    pub peer: SocketAddr,
    pub accepted_at: Instant,
    state: ConnectionState,
}

impl ConnectionContext {
    pub fn new(request_id: u64, peer: SocketAddr) -> Self {
        Self {
            request_id,
            peer,
            accepted_at: Instant::now(),
            state: ConnectionState::Accepted,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(
            request_id = self.request_id,
            from = ?self.state,
            to = ?next,
            "Connection state"
        );
        self.state = next;
    }
}

/// Read until the head and the (capped) declared body are in, the buffer is
/// full, the peer closes, or `timeout` expires.
///
/// Fails only when nothing at all was read.
pub async fn read_request<S>(stream: &mut S, timeout: Duration) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = vec![0u8; REQUEST_BUFFER_LEN];
    let mut filled = 0;

    while filled < buf.len() {
        match tokio::time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                filled += n;
                if request_complete(&buf[..filled]) {
                    break;
                }
            }
            Ok(Err(e)) => {
                if filled == 0 {
                    return Err(e);
                }
                break;
            }
            Err(_) => {
                if filled == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no request bytes before read timeout",
                    ));
                }
                break;
            }
        }
    }

    if filled == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before request",
        ));
    }
    buf.truncate(filled);
    Ok(buf)
}

fn request_complete(raw: &[u8]) -> bool {
    let head = scan(raw);
    if !head.complete {
        return false;
    }
    let wanted = usize::try_from(head.content_length())
        .unwrap_or(0)
        .min(BODY_LEN - 1);
    head.body.len() >= wanted
}

/// Keeps metric label cardinality bounded.
fn method_label(record: &RequestRecord) -> &'static str {
    match record.method() {
        b"GET" => "GET",
        b"POST" => "POST",
        b"PUT" => "PUT",
        b"DELETE" => "DELETE",
        b"PATCH" => "PATCH",
        b"HEAD" => "HEAD",
        b"OPTIONS" => "OPTIONS",
        b"" => "NONE",
        _ => "OTHER",
    }
}

/// Runs the per-connection exchange. Shared by every connection task.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    submitter: RequestSubmitter,
    correlator: Arc<ResponseCorrelator>,
    read_timeout: Duration,
    response_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        submitter: RequestSubmitter,
        correlator: Arc<ResponseCorrelator>,
        read_timeout: Duration,
        response_timeout: Duration,
    ) -> Self {
        Self {
            submitter,
            correlator,
            read_timeout,
            response_timeout,
        }
    }

    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.correlator
    }

    pub fn submitter(&self) -> &RequestSubmitter {
        &self.submitter
    }

    /// Serve one accepted TCP connection, terminating TLS if configured.
    pub async fn serve(
        &self,
        stream: TcpStream,
        tls: Option<&TlsAcceptor>,
        ctx: &mut ConnectionContext,
    ) -> CloseReason {
        let reason = match tls {
            None => self.exchange(stream, ctx).await,
            Some(acceptor) => {
                ctx.transition(ConnectionState::Handshaking);
                match tokio::time::timeout(self.read_timeout, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => self.exchange(tls_stream, ctx).await,
                    Ok(Err(e)) => {
                        tracing::warn!(request_id = ctx.request_id, peer = %ctx.peer, error = %e, "TLS handshake failed");
                        CloseReason::HandshakeFailed
                    }
                    Err(_) => {
                        tracing::warn!(request_id = ctx.request_id, peer = %ctx.peer, "TLS handshake timed out");
                        CloseReason::HandshakeFailed
                    }
                }
            }
        };

        ctx.transition(ConnectionState::Closed(reason));
        metrics::record_connection_closed(reason.as_str());
        tracing::debug!(
            request_id = ctx.request_id,
            peer = %ctx.peer,
            reason = %reason,
            elapsed_ms = ctx.accepted_at.elapsed().as_millis() as u64,
            "Connection closed"
        );
        reason
    }

    /// Handle one request on an established stream, then shut the stream down.
    pub async fn exchange<S>(&self, mut stream: S, ctx: &mut ConnectionContext) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let reason = self.run(&mut stream, ctx).await;
        if let Err(e) = stream.shutdown().await {
            tracing::trace!(request_id = ctx.request_id, error = %e, "Stream shutdown failed");
        }
        reason
    }

    async fn run<S>(&self, stream: &mut S, ctx: &mut ConnectionContext) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ctx.transition(ConnectionState::Reading);
        let raw = match read_request(stream, self.read_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(request_id = ctx.request_id, peer = %ctx.peer, error = %e, "Read failed");
                return CloseReason::ReadFailed;
            }
        };

        let mut record = RequestRecord::new(ctx.request_id);
        if let Err(e) = parser::parse_into(&raw, &mut record) {
            tracing::info!(request_id = ctx.request_id, peer = %ctx.peer, error = %e, "Malformed request");
            let reply = response::empty(StatusCode::BAD_REQUEST);
            return self
                .reply(stream, ctx, &record, StatusCode::BAD_REQUEST, &reply, CloseReason::ParseFailed)
                .await;
        }

        tracing::info!(
            request_id = ctx.request_id,
            peer = %ctx.peer,
            method = %record.method_text(),
            path = %record.path_text(),
            content_length = record.content_length,
            "Request received"
        );

        let ticket = self.correlator.expect(ctx.request_id);
        if let Err(SubmitError::BufferFull { capacity }) = self.submitter.submit(&record) {
            tracing::warn!(request_id = ctx.request_id, capacity, "Request ring full, rejecting");
            let reply = response::empty(StatusCode::SERVICE_UNAVAILABLE);
            return self
                .reply(stream, ctx, &record, StatusCode::SERVICE_UNAVAILABLE, &reply, CloseReason::Rejected)
                .await;
        }
        ctx.transition(ConnectionState::Submitted);

        ctx.transition(ConnectionState::AwaitingResponse);
        match ticket.wait(self.response_timeout).await {
            Ok(found) => {
                let (status, reply) = response::render(&found);
                drop(ticket);
                self.reply(stream, ctx, &record, status, &reply, CloseReason::Completed)
                    .await
            }
            Err(e) => {
                drop(ticket);
                tracing::warn!(request_id = ctx.request_id, error = %e, "Worker response timed out");
                let reply = response::empty(StatusCode::GATEWAY_TIMEOUT);
                self.reply(stream, ctx, &record, StatusCode::GATEWAY_TIMEOUT, &reply, CloseReason::TimedOut)
                    .await
            }
        }
    }

    async fn reply<S>(
        &self,
        stream: &mut S,
        ctx: &mut ConnectionContext,
        record: &RequestRecord,
        status: StatusCode,
        bytes: &[u8],
        reason: CloseReason,
    ) -> CloseReason
    where
        S: AsyncWrite + Unpin,
    {
        ctx.transition(ConnectionState::Replying);
        let written = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                metrics::record_request(method_label(record), status.as_u16(), ctx.accepted_at);
                tracing::debug!(request_id = ctx.request_id, status = status.as_u16(), "Reply sent");
                reason
            }
            Err(e) => {
                tracing::warn!(request_id = ctx.request_id, peer = %ctx.peer, error = %e, "Write failed");
                CloseReason::WriteFailed
            }
        }
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let count = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_connections(count);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `timeout` passes. Returns
    /// whether the server drained.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

/// Decrements the active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_connections(count);
    }
}
