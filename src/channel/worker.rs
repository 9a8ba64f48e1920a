//! The worker's side of the channel.
//!
//! The real worker is an external process; this endpoint does what it does
//! (drain requests, publish responses) so the reference worker and the tests
//! can stand in for it.

use std::sync::Arc;

use crate::channel::layout::{RequestRecord, ResponseRecord};
use crate::channel::ring::Pushed;
use crate::channel::shm::{ChannelError, SharedChannel};

#[derive(Debug, Clone)]
pub struct WorkerEndpoint {
    channel: Arc<SharedChannel>,
}

impl WorkerEndpoint {
    pub fn new(channel: Arc<SharedChannel>) -> Self {
        Self { channel }
    }

    /// Attach to a region created by the bridge.
    pub fn attach(name: &str) -> Result<Self, ChannelError> {
        Ok(Self::new(Arc::new(SharedChannel::attach(name)?)))
    }

    pub fn channel(&self) -> &Arc<SharedChannel> {
        &self.channel
    }

    /// Consume the oldest pending request, if any.
    pub fn next_request(&self) -> Option<RequestRecord> {
        self.channel.requests().pop()
    }

    /// Publish a response for `request_id`. The body is truncated to the
    /// response block size.
    pub fn respond(&self, request_id: u64, status_code: i32, body: &[u8]) -> Pushed {
        let pushed = self
            .channel
            .responses()
            .push(&ResponseRecord::new(request_id, status_code, body));
        if pushed.overwrote {
            tracing::warn!(request_id, slot = pushed.slot, "Response ring full, overwrote an unclaimed entry");
        }
        pushed
    }

    pub fn pending_requests(&self) -> usize {
        self.channel.requests().len()
    }
}
