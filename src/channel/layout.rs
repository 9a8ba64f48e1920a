//! Byte-exact layout of the shared channel.
//!
//! Both this process and the external worker map the same region, so every
//! type here is `#[repr(C)]` with explicit padding. The sizes and offsets are
//! pinned by compile-time assertions at the bottom of the file; changing any
//! of them breaks the worker.
//!
//! ```text
//! ChannelLayout (147216 bytes)
//! ├── requests  : RingBuffer<RequestRecord, 16>   @ 0
//! │   ├── write_cursor u32 @ 0
//! │   ├── read_cursor  u32 @ 4
//! │   └── slots[16]        @ 8   (5088 bytes each)
//! └── responses : RingBuffer<ResponseRecord, 16>  @ 81416
//!     ├── write_cursor u32 @ 0
//!     ├── read_cursor  u32 @ 4
//!     └── slots[16]        @ 8   (4112 bytes each)
//! ```

use std::borrow::Cow;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};

/// Slots in the request ring.
pub const REQ_BUFFER_CAPACITY: usize = 16;
/// Slots in the response ring.
pub const RES_BUFFER_CAPACITY: usize = 16;

pub const METHOD_LEN: usize = 8;
pub const PATH_LEN: usize = 256;
pub const QUERY_PARAMS_LEN: usize = 256;
pub const CONTENT_TYPE_LEN: usize = 128;
pub const BOUNDARY_LEN: usize = 70;
pub const AUTH_HEADER_LEN: usize = 256;
pub const BODY_LEN: usize = 4096;
pub const RESPONSE_LEN: usize = 4096;

/// Default name of the shared region.
pub const DEFAULT_CHANNEL_NAME: &str = "/toolb_ipc";
/// Default name of the request-ready semaphore.
pub const DEFAULT_REQUEST_SIGNAL: &str = "/toolb_sem_req";

/// Total byte size of the mapped region.
pub const CHANNEL_SIZE: usize = size_of::<ChannelLayout>();

/// Copy `src` into a fixed-capacity, NUL-terminated field.
///
/// At most `dest.len() - 1` bytes are copied; the remainder of the field is
/// zeroed. Returns the number of bytes copied.
pub fn copy_field(dest: &mut [u8], src: &[u8]) -> usize {
    let Some(max) = dest.len().checked_sub(1) else {
        return 0;
    };
    let n = src.len().min(max);
    dest[..n].copy_from_slice(&src[..n]);
    dest[n..].fill(0);
    n
}

/// Copy `src[start..end]` into `dest`.
///
/// An inverted or out-of-range span writes the empty string.
pub fn copy_span(dest: &mut [u8], src: &[u8], start: usize, end: usize) -> usize {
    match src.get(start..end) {
        Some(span) => copy_field(dest, span),
        None => {
            dest.fill(0);
            0
        }
    }
}

/// Bytes of a NUL-terminated field, up to (not including) the first NUL.
pub fn field_bytes(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(n) => &field[..n],
        None => field,
    }
}

fn field_text(field: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(field_bytes(field))
}

/// One parsed client request, as the worker sees it.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RequestRecord {
    pub request_id: u64,
    method: [u8; METHOD_LEN],
    path: [u8; PATH_LEN],
    query: [u8; QUERY_PARAMS_LEN],
    content_type: [u8; CONTENT_TYPE_LEN],
    boundary: [u8; BOUNDARY_LEN],
    authorization: [u8; AUTH_HEADER_LEN],
    _pad0: [u8; 2],
    /// Declared `Content-Length`, not the number of bytes copied.
    pub content_length: i32,
    body: [u8; BODY_LEN],
    _pad1: [u8; 4],
}

impl RequestRecord {
    /// A zeroed record tagged with `request_id`.
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            ..Self::zeroed()
        }
    }

    pub fn set_method(&mut self, src: &[u8]) -> usize {
        copy_field(&mut self.method, src)
    }

    pub fn set_path(&mut self, src: &[u8]) -> usize {
        copy_field(&mut self.path, src)
    }

    pub fn set_query(&mut self, src: &[u8]) -> usize {
        copy_field(&mut self.query, src)
    }

    pub fn set_content_type(&mut self, src: &[u8]) -> usize {
        copy_field(&mut self.content_type, src)
    }

    pub fn set_boundary(&mut self, src: &[u8]) -> usize {
        copy_field(&mut self.boundary, src)
    }

    pub fn set_authorization(&mut self, src: &[u8]) -> usize {
        copy_field(&mut self.authorization, src)
    }

    /// Record the declared length and copy up to `min(declared, BODY_LEN - 1)`
    /// bytes of `src`. Returns the number of bytes copied.
    pub fn set_body(&mut self, src: &[u8], declared: i32) -> usize {
        self.content_length = declared;
        self.body.fill(0);
        let wanted = usize::try_from(declared).unwrap_or(0).min(BODY_LEN - 1);
        let n = wanted.min(src.len());
        self.body[..n].copy_from_slice(&src[..n]);
        n
    }

    pub fn method(&self) -> &[u8] {
        field_bytes(&self.method)
    }

    pub fn path(&self) -> &[u8] {
        field_bytes(&self.path)
    }

    pub fn query(&self) -> &[u8] {
        field_bytes(&self.query)
    }

    pub fn content_type(&self) -> &[u8] {
        field_bytes(&self.content_type)
    }

    pub fn boundary(&self) -> &[u8] {
        field_bytes(&self.boundary)
    }

    pub fn authorization(&self) -> &[u8] {
        field_bytes(&self.authorization)
    }

    /// The body block up to the declared length, capped at `BODY_LEN - 1`.
    ///
    /// This spans what the client *declared*, not what arrived: when fewer
    /// bytes were received the tail is NUL padding. The record carries no
    /// received-length field, so the worker cannot tell the two apart.
    pub fn body_block(&self) -> &[u8] {
        let n = usize::try_from(self.content_length)
            .unwrap_or(0)
            .min(BODY_LEN - 1);
        &self.body[..n]
    }

    pub fn method_text(&self) -> Cow<'_, str> {
        field_text(&self.method)
    }

    pub fn path_text(&self) -> Cow<'_, str> {
        field_text(&self.path)
    }

    pub fn query_text(&self) -> Cow<'_, str> {
        field_text(&self.query)
    }

    pub fn boundary_text(&self) -> Cow<'_, str> {
        field_text(&self.boundary)
    }
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRecord")
            .field("request_id", &self.request_id)
            .field("method", &self.method_text())
            .field("path", &self.path_text())
            .field("query", &self.query_text())
            .field("content_type", &field_text(&self.content_type))
            .field("boundary", &self.boundary_text())
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// The worker's answer to one request.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ResponseRecord {
    pub request_id: u64,
    pub status_code: i32,
    body: [u8; RESPONSE_LEN],
    _pad0: [u8; 4],
}

impl ResponseRecord {
    pub fn new(request_id: u64, status_code: i32, body: &[u8]) -> Self {
        let mut record = Self {
            request_id,
            status_code,
            ..Self::zeroed()
        };
        copy_field(&mut record.body, body);
        record
    }

    /// Body bytes up to the first NUL.
    pub fn body(&self) -> &[u8] {
        field_bytes(&self.body)
    }
}

impl fmt::Debug for ResponseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseRecord")
            .field("request_id", &self.request_id)
            .field("status_code", &self.status_code)
            .field("body", &field_text(&self.body))
            .finish()
    }
}

/// Fixed array of `N` slots plus a write and a read cursor.
///
/// Cursors increase without bound (wrapping at `u32`) and map to a slot by
/// `cursor % N`. The producer owns `write_cursor`, the consumer owns
/// `read_cursor`. Slot contents are only touched through
/// [`RingGuard`](crate::channel::ring::RingGuard).
#[repr(C)]
pub struct RingBuffer<T, const N: usize> {
    write_cursor: AtomicU32,
    read_cursor: AtomicU32,
    slots: [UnsafeCell<T>; N],
}

// SAFETY: slots are only read or written while holding the ring's process-local
// lock, and the cross-process handoff is ordered by the cursor atomics.
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T, const N: usize> RingBuffer<T, N> {
    pub const CAPACITY: usize = N;

    pub fn write_cursor(&self) -> u32 {
        self.write_cursor.load(Ordering::Acquire)
    }

    pub fn read_cursor(&self) -> u32 {
        self.read_cursor.load(Ordering::Acquire)
    }

    pub(crate) fn publish_write(&self, cursor: u32) {
        self.write_cursor.store(cursor, Ordering::Release);
    }

    pub(crate) fn publish_read(&self, cursor: u32) {
        self.read_cursor.store(cursor, Ordering::Release);
    }

    /// Slot index for a cursor value.
    pub fn slot_index(cursor: u32) -> usize {
        cursor as usize % N
    }

    /// Raw pointer to the slot for `cursor`. Indexing keeps it in bounds.
    pub(crate) fn slot_ptr(&self, cursor: u32) -> *mut T {
        self.slots[Self::slot_index(cursor)].get()
    }
}

pub type RequestRing = RingBuffer<RequestRecord, REQ_BUFFER_CAPACITY>;
pub type ResponseRing = RingBuffer<ResponseRecord, RES_BUFFER_CAPACITY>;

/// The whole shared region.
#[repr(C)]
pub struct ChannelLayout {
    pub requests: RequestRing,
    pub responses: ResponseRing,
}

const _: () = {
    assert!(size_of::<RequestRecord>() == 5088);
    assert!(offset_of!(RequestRecord, method) == 8);
    assert!(offset_of!(RequestRecord, path) == 16);
    assert!(offset_of!(RequestRecord, query) == 272);
    assert!(offset_of!(RequestRecord, content_type) == 528);
    assert!(offset_of!(RequestRecord, boundary) == 656);
    assert!(offset_of!(RequestRecord, authorization) == 726);
    assert!(offset_of!(RequestRecord, content_length) == 984);
    assert!(offset_of!(RequestRecord, body) == 988);

    assert!(size_of::<ResponseRecord>() == 4112);
    assert!(offset_of!(ResponseRecord, status_code) == 8);
    assert!(offset_of!(ResponseRecord, body) == 12);

    assert!(offset_of!(RequestRing, slots) == 8);
    assert!(size_of::<RequestRing>() == 8 + REQ_BUFFER_CAPACITY * 5088);
    assert!(size_of::<ResponseRing>() == 8 + RES_BUFFER_CAPACITY * 4112);
    assert!(offset_of!(ChannelLayout, responses) == 81416);
    assert!(size_of::<ChannelLayout>() == 147216);
};
