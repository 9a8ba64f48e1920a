//! Request Submitter: enqueue a parsed request and wake the worker.

use std::sync::Arc;

use thiserror::Error;

use crate::channel::layout::RequestRecord;
use crate::channel::shm::SharedChannel;
use crate::channel::signal::RequestNotifier;
use crate::config::OverflowPolicy;
use crate::observability::metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The worker has not drained the ring and the policy is `reject`.
    #[error("request ring is full ({capacity} undrained entries)")]
    BufferFull { capacity: usize },
}

/// Where a record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub slot: usize,
    pub cursor: u32,
    /// An undrained entry was destroyed (only under `overwrite`).
    pub overwrote: bool,
    /// The notification was delivered.
    pub signaled: bool,
}

/// Writes requests into the shared request ring.
///
/// Cloning is cheap; every clone shares the same channel and notifier.
#[derive(Clone)]
pub struct RequestSubmitter {
    channel: Arc<SharedChannel>,
    notifier: Arc<dyn RequestNotifier>,
    policy: OverflowPolicy,
}

impl RequestSubmitter {
    pub fn new(
        channel: Arc<SharedChannel>,
        notifier: Arc<dyn RequestNotifier>,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            channel,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Copy `record` into the next slot and post the notification.
    ///
    /// Only the slot write happens under the ring lock. A failed notification
    /// is logged; the record stays enqueued for a polling worker.
    pub fn submit(&self, record: &RequestRecord) -> Result<Submission, SubmitError> {
        let pushed = {
            let mut ring = self.channel.requests();
            if self.policy == OverflowPolicy::Reject && ring.is_full() {
                metrics::record_submission("rejected");
                return Err(SubmitError::BufferFull {
                    capacity: ring.capacity(),
                });
            }
            let pushed = ring.push(record);
            metrics::record_ring_depth("request", ring.len());
            pushed
        };

        if pushed.overwrote {
            tracing::warn!(
                request_id = record.request_id,
                slot = pushed.slot,
                cursor = pushed.cursor,
                "Request ring full, overwrote an undrained entry"
            );
            metrics::record_request_overwrite();
        }

        let signaled = match self.notifier.notify() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    request_id = record.request_id,
                    error = %e,
                    "Failed to signal worker, request left in ring"
                );
                false
            }
        };

        metrics::record_submission(if pushed.overwrote {
            "overwrote"
        } else {
            "accepted"
        });
        tracing::debug!(
            request_id = record.request_id,
            slot = pushed.slot,
            cursor = pushed.cursor,
            "Request submitted"
        );

        Ok(Submission {
            slot: pushed.slot,
            cursor: pushed.cursor,
            overwrote: pushed.overwrote,
            signaled,
        })
    }
}

impl std::fmt::Debug for RequestSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSubmitter")
            .field("channel", &self.channel.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::layout::REQ_BUFFER_CAPACITY;
    use crate::channel::signal::LocalNotifier;
    use std::io;

    struct BrokenNotifier;

    impl RequestNotifier for BrokenNotifier {
        fn notify(&self) -> io::Result<()> {
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        }
    }

    fn submitter(policy: OverflowPolicy) -> (RequestSubmitter, Arc<SharedChannel>, Arc<LocalNotifier>) {
        let channel = Arc::new(SharedChannel::anonymous().unwrap());
        let notifier = Arc::new(LocalNotifier::new());
        let submitter = RequestSubmitter::new(channel.clone(), notifier.clone(), policy);
        (submitter, channel, notifier)
    }

    #[test]
    fn submit_writes_slot_and_signals_once() {
        let (submitter, channel, notifier) = submitter(OverflowPolicy::Reject);
        let mut record = RequestRecord::new(5);
        record.set_method(b"GET");

        let submission = submitter.submit(&record).unwrap();
        assert_eq!(submission.slot, 0);
        assert!(submission.signaled);
        assert!(!submission.overwrote);
        assert_eq!(notifier.count(), 1);

        let seen = channel.requests().pop().unwrap();
        assert_eq!(seen.request_id, 5);
        assert_eq!(seen.method(), b"GET");
    }

    #[test]
    fn reject_policy_refuses_when_full_and_keeps_pending_entries() {
        let (submitter, channel, notifier) = submitter(OverflowPolicy::Reject);
        for id in 1..=REQ_BUFFER_CAPACITY as u64 {
            submitter.submit(&RequestRecord::new(id)).unwrap();
        }

        let err = submitter
            .submit(&RequestRecord::new(99))
            .unwrap_err();
        assert_eq!(
            err,
            SubmitError::BufferFull {
                capacity: REQ_BUFFER_CAPACITY
            }
        );
        assert_eq!(notifier.count(), REQ_BUFFER_CAPACITY as u64);

        let mut ring = channel.requests();
        for id in 1..=REQ_BUFFER_CAPACITY as u64 {
            assert_eq!(ring.pop().unwrap().request_id, id);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn overwrite_policy_destroys_oldest_entry() {
        let (submitter, channel, _) = submitter(OverflowPolicy::Overwrite);
        for id in 1..=REQ_BUFFER_CAPACITY as u64 {
            submitter.submit(&RequestRecord::new(id)).unwrap();
        }
        let submission = submitter.submit(&RequestRecord::new(17)).unwrap();
        assert!(submission.overwrote);
        assert_eq!(submission.slot, 0);

        let head = channel.requests().pop().unwrap();
        assert_eq!(head.request_id, 17);
    }

    #[test]
    fn failed_signal_still_enqueues() {
        let channel = Arc::new(SharedChannel::anonymous().unwrap());
        let submitter =
            RequestSubmitter::new(channel.clone(), Arc::new(BrokenNotifier), OverflowPolicy::Reject);

        let submission = submitter.submit(&RequestRecord::new(3)).unwrap();
        assert!(!submission.signaled);
        assert_eq!(channel.requests().pop().unwrap().request_id, 3);
    }
}
