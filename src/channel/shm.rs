//! Named shared-memory region holding the two rings.
//!
//! # Responsibilities
//! - Create or attach the POSIX shared-memory object (`shm_open`)
//! - Map exactly [`CHANNEL_SIZE`] bytes and zero them on first creation
//! - Hand out lock-holding ring accessors
//! - Unmap and unlink on teardown, tolerating an already-removed name

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::FromRawFd;
use std::ptr::NonNull;

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::channel::layout::{
    ChannelLayout, RequestRecord, ResponseRecord, CHANNEL_SIZE, REQ_BUFFER_CAPACITY,
    RES_BUFFER_CAPACITY,
};
use crate::channel::ring::{RingGuard, RingSnapshot};

/// Longest accepted object name, including the leading slash.
pub const MAX_NAME_LEN: usize = 255;

/// Errors from mapping or removing the shared region.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid shared object name {0:?}: must start with '/', contain no other '/', and be at most 255 bytes")]
    InvalidName(String),

    #[error("failed to open shared region {name}: {source}")]
    Open { name: String, source: io::Error },

    #[error("failed to size shared region {name}: {source}")]
    Resize { name: String, source: io::Error },

    #[error("failed to map shared region: {0}")]
    Map(io::Error),

    #[error("shared region {name} is {found} bytes, layout needs {expected}")]
    LayoutMismatch {
        name: String,
        expected: usize,
        found: u64,
    },

    #[error("failed to unlink shared region {name}: {source}")]
    Unlink { name: String, source: io::Error },
}

/// Validate a POSIX IPC object name and convert it for libc.
pub fn object_name(name: &str) -> Result<CString, ChannelError> {
    let valid = name.len() > 1
        && name.len() <= MAX_NAME_LEN
        && name.starts_with('/')
        && !name[1..].contains('/');
    if !valid {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| ChannelError::InvalidName(name.to_string()))
}

/// The mapped channel plus the process-local locks guarding each ring.
pub struct SharedChannel {
    base: NonNull<ChannelLayout>,
    _mmap: MmapMut,
    name: Option<String>,
    created: bool,
    request_lock: Mutex<()>,
    response_lock: Mutex<()>,
}

// SAFETY: `base` points into `_mmap`, which lives as long as the channel and is
// never remapped. Shared access goes through atomics or the ring locks.
unsafe impl Send for SharedChannel {}
unsafe impl Sync for SharedChannel {}

impl SharedChannel {
    /// Create the named region, or attach to it if it already exists.
    ///
    /// A newly created region is sized to [`CHANNEL_SIZE`] and zeroed. An
    /// existing region must be at least that large.
    pub fn create_or_attach(name: &str) -> Result<Self, ChannelError> {
        let c_name = object_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o666 as libc::mode_t,
            )
        };
        if fd >= 0 {
            // SAFETY: fd was just returned by shm_open and is owned here.
            let file = unsafe { File::from_raw_fd(fd) };
            file.set_len(CHANNEL_SIZE as u64)
                .map_err(|source| ChannelError::Resize {
                    name: name.to_string(),
                    source,
                })?;
            let mut channel = Self::map(&file, Some(name.to_string()), true)?;
            channel.zero();
            tracing::info!(name, size = CHANNEL_SIZE, "Shared channel created");
            return Ok(channel);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(ChannelError::Open {
                name: name.to_string(),
                source: err,
            });
        }
        Self::attach(name)
    }

    /// Attach to an existing named region (the worker's side of things).
    pub fn attach(name: &str) -> Result<Self, ChannelError> {
        let c_name = object_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0 as libc::mode_t) };
        if fd < 0 {
            return Err(ChannelError::Open {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: fd was just returned by shm_open and is owned here.
        let file = unsafe { File::from_raw_fd(fd) };
        let found = file
            .metadata()
            .map_err(|source| ChannelError::Open {
                name: name.to_string(),
                source,
            })?
            .len();
        if found < CHANNEL_SIZE as u64 {
            return Err(ChannelError::LayoutMismatch {
                name: name.to_string(),
                expected: CHANNEL_SIZE,
                found,
            });
        }

        let channel = Self::map(&file, Some(name.to_string()), false)?;
        tracing::info!(name, "Attached to shared channel");
        Ok(channel)
    }

    /// A private, zeroed mapping with the same layout. Not visible to other
    /// processes; used when the worker runs in-process.
    pub fn anonymous() -> Result<Self, ChannelError> {
        let mmap = MmapOptions::new()
            .len(CHANNEL_SIZE)
            .map_anon()
            .map_err(ChannelError::Map)?;
        Ok(Self::from_mmap(mmap, None, true))
    }

    fn map(file: &File, name: Option<String>, created: bool) -> Result<Self, ChannelError> {
        // SAFETY: the object is sized to at least CHANNEL_SIZE; concurrent
        // modification by the peer is the point of the mapping and is handled
        // through atomics and volatile slot access.
        let mmap = unsafe { MmapOptions::new().len(CHANNEL_SIZE).map_mut(file) }
            .map_err(ChannelError::Map)?;
        Ok(Self::from_mmap(mmap, name, created))
    }

    fn from_mmap(mut mmap: MmapMut, name: Option<String>, created: bool) -> Self {
        // Mappings are page aligned, which satisfies ChannelLayout's alignment.
        let base = NonNull::new(mmap.as_mut_ptr().cast::<ChannelLayout>())
            .unwrap_or_else(NonNull::dangling);
        Self {
            base,
            _mmap: mmap,
            name,
            created,
            request_lock: Mutex::new(()),
            response_lock: Mutex::new(()),
        }
    }

    fn zero(&mut self) {
        // SAFETY: the mapping is CHANNEL_SIZE bytes long and we hold `&mut self`.
        unsafe { self.base.as_ptr().cast::<u8>().write_bytes(0, CHANNEL_SIZE) };
    }

    /// Typed view of the whole region.
    pub fn layout(&self) -> &ChannelLayout {
        // SAFETY: base points at a live, aligned mapping of CHANNEL_SIZE bytes.
        unsafe { self.base.as_ref() }
    }

    /// Lock the request ring.
    pub fn requests(&self) -> RingGuard<'_, RequestRecord, REQ_BUFFER_CAPACITY> {
        RingGuard::new(&self.layout().requests, self.request_lock.lock())
    }

    /// Lock the response ring.
    pub fn responses(&self) -> RingGuard<'_, ResponseRecord, RES_BUFFER_CAPACITY> {
        RingGuard::new(&self.layout().responses, self.response_lock.lock())
    }

    /// Cursor snapshot of both rings, taken without locking.
    pub fn snapshot(&self) -> ChannelSnapshot {
        let layout = self.layout();
        ChannelSnapshot {
            requests: RingSnapshot::of(&layout.requests),
            responses: RingSnapshot::of(&layout.responses),
        }
    }

    /// Object name, or `None` for an anonymous mapping.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this handle created (and zeroed) the region.
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// Unmap and remove the named object so the next `create_or_attach`
    /// starts clean. Other processes keep their mappings until they unmap.
    pub fn teardown(self) -> Result<(), ChannelError> {
        let Self { _mmap, name, .. } = self;
        drop(_mmap);
        match name {
            Some(name) => Self::remove(&name).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Unlink a named region. Returns `false` when it did not exist.
    pub fn remove(name: &str) -> Result<bool, ChannelError> {
        let c_name = object_name(name)?;
        // SAFETY: c_name is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } == 0 {
            tracing::debug!(name, "Shared channel unlinked");
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Ok(false);
        }
        Err(ChannelError::Unlink {
            name: name.to_string(),
            source: err,
        })
    }
}

impl std::fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedChannel")
            .field("name", &self.name)
            .field("created", &self.created)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Cursor snapshot of both rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub requests: RingSnapshot,
    pub responses: RingSnapshot,
}
