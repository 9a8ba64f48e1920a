//! Response Correlator: match worker responses to waiting connections.
//!
//! # Responsibilities
//! - Track which request ids still have a live waiter (tickets)
//! - Claim the head of the response ring for its owner
//! - Discard unowned heads so a late response cannot stall the ring
//! - Bound every wait by a deadline
//!
//! # Design Decisions
//! - The worker has no response notification, so waiters poll the ring. An
//!   in-process `Notify` wakes every waiter whenever anyone consumes the head,
//!   letting the next owner claim immediately.
//! - A waiter never advances past an entry whose id has a live ticket.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::channel::layout::ResponseRecord;
use crate::channel::shm::SharedChannel;
use crate::observability::metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("no response for request {request_id} within {timeout:?}")]
    Timeout { request_id: u64, timeout: Duration },
}

/// Outcome of one look at the ring head.
#[derive(Debug)]
enum Claim {
    Matched(ResponseRecord),
    /// Head belongs to another live waiter, or the ring is empty.
    Pending,
}

/// Reads the shared response ring on behalf of many waiters.
pub struct ResponseCorrelator {
    channel: Arc<SharedChannel>,
    poll_interval: Duration,
    tickets: DashSet<u64>,
    progress: Notify,
}

impl ResponseCorrelator {
    pub fn new(channel: Arc<SharedChannel>, poll_interval: Duration) -> Self {
        Self {
            channel,
            poll_interval,
            tickets: DashSet::new(),
            progress: Notify::new(),
        }
    }

    /// Register interest in `request_id`. Call before submitting the request
    /// so a fast response is never mistaken for an orphan.
    pub fn expect(&self, request_id: u64) -> ResponseTicket<'_> {
        self.tickets.insert(request_id);
        ResponseTicket {
            correlator: self,
            request_id,
        }
    }

    /// Number of live tickets.
    pub fn in_flight(&self) -> usize {
        self.tickets.len()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait up to `timeout` for the response to `request_id`.
    ///
    /// Registers a ticket for the duration of the call if the caller holds
    /// none. Never returns a timeout before `timeout` has elapsed.
    pub async fn await_response(
        &self,
        request_id: u64,
        timeout: Duration,
    ) -> Result<ResponseRecord, CorrelationError> {
        let _ticket = if self.tickets.contains(&request_id) {
            None
        } else {
            Some(self.expect(request_id))
        };
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Claim::Matched(record) = self.try_claim(request_id) {
                return Ok(record);
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::record_response_timeout();
                tracing::debug!(request_id, ?timeout, "Response wait timed out");
                return Err(CorrelationError::Timeout {
                    request_id,
                    timeout,
                });
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Inspect the head of the ring under its lock.
    ///
    /// Consumes the head if it is ours or if nobody owns it, repeating until
    /// the ring is empty or the head belongs to another live waiter.
    fn try_claim(&self, request_id: u64) -> Claim {
        let mut consumed = false;
        let claim = {
            let mut ring = self.channel.responses();
            loop {
                let Some(head) = ring.peek() else {
                    break Claim::Pending;
                };
                if head.request_id == request_id {
                    ring.advance_read();
                    consumed = true;
                    break Claim::Matched(head);
                }
                if self.tickets.contains(&head.request_id) {
                    break Claim::Pending;
                }
                ring.advance_read();
                consumed = true;
                metrics::record_orphan_response();
                tracing::warn!(
                    request_id = head.request_id,
                    status = head.status_code,
                    "Discarded response with no waiter"
                );
            }
        };

        if consumed {
            metrics::record_ring_depth("response", self.channel.snapshot().responses.depth as usize);
            self.progress.notify_waiters();
        }
        claim
    }
}

impl std::fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCorrelator")
            .field("poll_interval", &self.poll_interval)
            .field("in_flight", &self.tickets.len())
            .finish_non_exhaustive()
    }
}

/// A waiter's claim on one request id. Dropping it makes any later response
/// with that id an orphan.
#[derive(Debug)]
pub struct ResponseTicket<'a> {
    correlator: &'a ResponseCorrelator,
    request_id: u64,
}

impl ResponseTicket<'_> {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub async fn wait(&self, timeout: Duration) -> Result<ResponseRecord, CorrelationError> {
        self.correlator.await_response(self.request_id, timeout).await
    }
}

impl Drop for ResponseTicket<'_> {
    fn drop(&mut self) {
        self.correlator.tickets.remove(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlator() -> (Arc<SharedChannel>, ResponseCorrelator) {
        let channel = Arc::new(SharedChannel::anonymous().unwrap());
        let correlator = ResponseCorrelator::new(channel.clone(), Duration::from_millis(5));
        (channel, correlator)
    }

    #[tokio::test]
    async fn returns_matching_head() {
        let (channel, correlator) = correlator();
        channel.responses().push(&ResponseRecord::new(1, 200, b"{}"));

        let ticket = correlator.expect(1);
        let record = ticket.wait(Duration::from_millis(100)).await.unwrap();
        assert_eq!(record.status_code, 200);
        assert_eq!(record.body(), b"{}");
        assert!(channel.responses().is_empty());
    }

    #[tokio::test]
    async fn does_not_skip_entry_owned_by_live_waiter() {
        let (channel, correlator) = correlator();
        let _first = correlator.expect(1);
        let second = correlator.expect(2);
        {
            let mut ring = channel.responses();
            ring.push(&ResponseRecord::new(1, 200, b"one"));
            ring.push(&ResponseRecord::new(2, 200, b"two"));
        }

        let err = second.wait(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, CorrelationError::Timeout { request_id: 2, .. }));
        assert_eq!(channel.responses().len(), 2);
    }

    #[tokio::test]
    async fn orphan_head_is_discarded() {
        let (channel, correlator) = correlator();
        {
            let mut ring = channel.responses();
            ring.push(&ResponseRecord::new(7, 200, b"late"));
            ring.push(&ResponseRecord::new(8, 201, b"mine"));
        }

        let record = correlator
            .await_response(8, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(record.status_code, 201);
        assert!(channel.responses().is_empty());
    }

    #[tokio::test]
    async fn ticket_drop_releases_id() {
        let (_, correlator) = correlator();
        {
            let _ticket = correlator.expect(3);
            assert_eq!(correlator.in_flight(), 1);
        }
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn sibling_wakes_after_head_is_claimed() {
        let (channel, correlator) = correlator();
        let t1 = correlator.expect(1);
        let t2 = correlator.expect(2);
        {
            let mut ring = channel.responses();
            ring.push(&ResponseRecord::new(1, 200, b"a"));
            ring.push(&ResponseRecord::new(2, 200, b"b"));
        }

        let (r2, r1) = tokio::join!(
            t2.wait(Duration::from_secs(1)),
            t1.wait(Duration::from_secs(1))
        );
        assert_eq!(r1.unwrap().body(), b"a");
        assert_eq!(r2.unwrap().body(), b"b");
    }

    #[tokio::test]
    async fn timeout_never_fires_early() {
        let (_, correlator) = correlator();
        let start = Instant::now();
        let timeout = Duration::from_millis(60);
        let err = correlator.await_response(9, timeout).await.unwrap_err();
        assert_eq!(
            err,
            CorrelationError::Timeout {
                request_id: 9,
                timeout
            }
        );
        assert!(start.elapsed() >= timeout);
    }
}
