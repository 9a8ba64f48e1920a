//! Lock-holding accessor for one ring of the shared channel.
//!
//! A [`RingGuard`] pairs a reference to a [`RingBuffer`] in shared memory with
//! the process-local mutex that serializes access to it. All slot reads and
//! writes go through the guard, so callers never see raw offsets.

use std::ptr;

use bytemuck::Pod;
use parking_lot::MutexGuard;
use serde::Serialize;

use crate::channel::layout::RingBuffer;

/// Result of a [`RingGuard::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pushed {
    /// Slot index written.
    pub slot: usize,
    /// Cursor value the entry was written at.
    pub cursor: u32,
    /// An undrained entry was overwritten to make room.
    pub overwrote: bool,
}

/// Exclusive (within this process) access to a ring.
pub struct RingGuard<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
    _lock: MutexGuard<'a, ()>,
}

impl<'a, T: Pod, const N: usize> RingGuard<'a, T, N> {
    pub(crate) fn new(ring: &'a RingBuffer<T, N>, lock: MutexGuard<'a, ()>) -> Self {
        Self { ring, _lock: lock }
    }

    pub fn write_cursor(&self) -> u32 {
        self.ring.write_cursor()
    }

    pub fn read_cursor(&self) -> u32 {
        self.ring.read_cursor()
    }

    /// Live (unconsumed) entries. Can exceed `N` after overwrites; the reader
    /// then sees the overwritten slot once per cursor that maps to it.
    pub fn len(&self) -> usize {
        self.write_cursor().wrapping_sub(self.read_cursor()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor() == self.read_cursor()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Zero the slot at the write cursor, copy `item` in, and publish it.
    ///
    /// Never fails: when the ring is full the oldest undrained entry for that
    /// slot is overwritten and the result says so.
    pub fn push(&mut self, item: &T) -> Pushed {
        let cursor = self.write_cursor();
        let overwrote = self.is_full();
        let slot = self.ring.slot_ptr(cursor);
        // SAFETY: `slot_ptr` indexes a live slot of the mapped ring and the
        // guard holds the ring lock. Volatile because the peer process reads it.
        unsafe {
            ptr::write_bytes(slot, 0, 1);
            ptr::write_volatile(slot, *item);
        }
        self.ring.publish_write(cursor.wrapping_add(1));
        Pushed {
            slot: RingBuffer::<T, N>::slot_index(cursor),
            cursor,
            overwrote,
        }
    }

    /// Copy of the entry at the read cursor, without consuming it.
    pub fn peek(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let slot = self.ring.slot_ptr(self.read_cursor());
        // SAFETY: in-bounds slot, lock held; the Acquire load of the write
        // cursor in `is_empty` orders this read after the producer's write.
        Some(unsafe { ptr::read_volatile(slot) })
    }

    /// Advance the read cursor past the current head entry.
    pub fn advance_read(&mut self) {
        if !self.is_empty() {
            self.ring.publish_read(self.read_cursor().wrapping_add(1));
        }
    }

    /// Consume the head entry.
    pub fn pop(&mut self) -> Option<T> {
        let item = self.peek()?;
        self.advance_read();
        Some(item)
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot::of(self.ring)
    }
}

/// Point-in-time view of a ring's cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RingSnapshot {
    pub write_cursor: u32,
    pub read_cursor: u32,
    pub depth: u32,
    pub capacity: usize,
}

impl RingSnapshot {
    /// Read the cursors without taking the ring lock (monitoring only).
    pub fn of<T, const N: usize>(ring: &RingBuffer<T, N>) -> Self {
        let read_cursor = ring.read_cursor();
        let write_cursor = ring.write_cursor();
        Self {
            write_cursor,
            read_cursor,
            depth: write_cursor.wrapping_sub(read_cursor),
            capacity: N,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::layout::{RequestRecord, ResponseRecord};
    use crate::channel::shm::SharedChannel;

    #[test]
    fn push_then_pop_preserves_order() {
        let channel = SharedChannel::anonymous().unwrap();
        {
            let mut ring = channel.responses();
            ring.push(&ResponseRecord::new(1, 200, b"a"));
            ring.push(&ResponseRecord::new(2, 201, b"b"));
            assert_eq!(ring.len(), 2);
        }
        let mut ring = channel.responses();
        assert_eq!(ring.pop().unwrap().request_id, 1);
        let second = ring.pop().unwrap();
        assert_eq!(second.request_id, 2);
        assert_eq!(second.status_code, 201);
        assert!(ring.pop().is_none());
    }

    #[test]
    fn peek_does_not_consume() {
        let channel = SharedChannel::anonymous().unwrap();
        let mut ring = channel.requests();
        ring.push(&RequestRecord::new(7));
        assert_eq!(ring.peek().unwrap().request_id, 7);
        assert_eq!(ring.len(), 1);
        ring.advance_read();
        assert!(ring.is_empty());
    }

    #[test]
    fn push_into_full_ring_reports_overwrite_of_oldest_slot() {
        let channel = SharedChannel::anonymous().unwrap();
        let mut ring = channel.requests();
        let capacity = ring.capacity();
        for id in 0..capacity as u64 {
            assert!(!ring.push(&RequestRecord::new(id)).overwrote);
        }
        assert!(ring.is_full());

        let pushed = ring.push(&RequestRecord::new(99));
        assert!(pushed.overwrote);
        assert_eq!(pushed.slot, 0);
        assert_eq!(ring.peek().unwrap().request_id, 99);
    }

    #[test]
    fn cursors_wrap_without_losing_slot_mapping() {
        let channel = SharedChannel::anonymous().unwrap();
        channel.layout().responses.publish_write(u32::MAX);
        channel.layout().responses.publish_read(u32::MAX);

        let mut ring = channel.responses();
        let first = ring.push(&ResponseRecord::new(1, 200, b""));
        let second = ring.push(&ResponseRecord::new(2, 200, b""));
        assert_eq!(first.slot, 15);
        assert_eq!(second.slot, 0);
        assert_eq!(ring.write_cursor(), 1);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop().unwrap().request_id, 1);
        assert_eq!(ring.pop().unwrap().request_id, 2);
        assert_eq!(ring.read_cursor(), 1);
    }
}
