//! Cross-process "request ready" notification.
//!
//! The worker blocks on a POSIX named semaphore; every submitted request posts
//! it once. The submitter only depends on [`RequestNotifier`], so an
//! in-process counter can stand in when no worker process is involved.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::channel::shm::object_name;

/// Something the submitter can poke after enqueueing a request.
pub trait RequestNotifier: Send + Sync {
    /// Increment the signal by one.
    fn notify(&self) -> io::Result<()>;
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid semaphore name {0:?}")]
    InvalidName(String),

    #[error("failed to open semaphore {name}: {source}")]
    Open { name: String, source: io::Error },

    #[error("failed to unlink semaphore {name}: {source}")]
    Unlink { name: String, source: io::Error },
}

fn semaphore_name(name: &str) -> Result<CString, SignalError> {
    object_name(name).map_err(|_| SignalError::InvalidName(name.to_string()))
}

/// A POSIX named counting semaphore.
///
/// The handle is closed only when dropped, so every `&self` operation runs
/// on an open handle. Unlinking the name ([`NamedSemaphore::remove`]) does
/// not affect handles that are still open.
#[derive(Debug)]
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: POSIX semaphores are safe to operate on from any thread; `sem` is
// closed only in `Drop`, when no other reference exists.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create (or open, if it exists) the semaphore with an initial value of 0.
    pub fn create(name: &str) -> Result<Self, SignalError> {
        let c_name = semaphore_name(name)?;
        // SAFETY: valid C string; sem_open is variadic and takes mode and value
        // as promoted unsigned ints when O_CREAT is set.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        Self::wrap(sem, name)
    }

    /// Open an existing semaphore.
    pub fn open(name: &str) -> Result<Self, SignalError> {
        let c_name = semaphore_name(name)?;
        // SAFETY: valid C string, no O_CREAT so no variadic arguments.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::wrap(sem, name)
    }

    fn wrap(sem: *mut libc::sem_t, name: &str) -> Result<Self, SignalError> {
        if sem == libc::SEM_FAILED {
            return Err(SignalError::Open {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self) -> io::Result<()> {
        // SAFETY: sem is open for the lifetime of self.
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Decrement without blocking. Returns `false` when the count is zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            // SAFETY: sem is open for the lifetime of self.
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Block until the count can be decremented or `timeout` elapses.
    /// Returns `false` on timeout.
    #[cfg(target_os = "linux")]
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `now` is a valid out-pointer.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let total_nanos = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        let deadline = libc::timespec {
            tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + (total_nanos / 1_000_000_000) as libc::time_t,
            tv_nsec: (total_nanos % 1_000_000_000) as _,
        };

        loop {
            // SAFETY: sem is open; deadline is a valid timespec.
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Block until the count can be decremented or `timeout` elapses.
    /// Returns `false` on timeout.
    #[cfg(not(target_os = "linux"))]
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Current count, where the platform reports it.
    #[cfg(target_os = "linux")]
    pub fn value(&self) -> io::Result<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: sem is open; value is a valid out-pointer.
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } == 0 {
            Ok(value)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Remove a named semaphore. Returns `false` when it did not exist.
    pub fn remove(name: &str) -> Result<bool, SignalError> {
        let c_name = semaphore_name(name)?;
        // SAFETY: valid C string.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            tracing::debug!(name, "Semaphore unlinked");
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Ok(false);
        }
        Err(SignalError::Unlink {
            name: name.to_string(),
            source: err,
        })
    }
}

impl RequestNotifier for NamedSemaphore {
    fn notify(&self) -> io::Result<()> {
        self.post()
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: sem was opened by sem_open; `&mut self` means no post or
        // wait is in progress.
        if unsafe { libc::sem_close(self.sem) } != 0 {
            tracing::warn!(
                name = %self.name,
                error = %io::Error::last_os_error(),
                "sem_close failed"
            );
        }
    }
}

/// In-process stand-in that only counts notifications.
#[derive(Debug, Default)]
pub struct LocalNotifier {
    count: AtomicU64,
}

impl LocalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl RequestNotifier for LocalNotifier {
    fn notify(&self) -> io::Result<()> {
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn unique_name() -> String {
        format!("/shm-bridge-sem-{}", uuid::Uuid::new_v4().simple())
    }

    #[test]
    fn local_notifier_counts() {
        let notifier = LocalNotifier::new();
        notifier.notify().unwrap();
        notifier.notify().unwrap();
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn posts_are_counted_and_consumed() {
        let name = unique_name();
        let producer = NamedSemaphore::create(&name).unwrap();
        let consumer = NamedSemaphore::open(&name).unwrap();

        assert!(!consumer.try_wait().unwrap());
        producer.notify().unwrap();
        producer.notify().unwrap();

        assert!(consumer.wait_timeout(Duration::from_millis(100)).unwrap());
        assert!(consumer.try_wait().unwrap());
        assert!(!consumer.try_wait().unwrap());

        assert!(NamedSemaphore::remove(&name).unwrap());
        assert!(!NamedSemaphore::remove(&name).unwrap());
    }

    #[test]
    fn wait_times_out_when_nothing_posted() {
        let name = unique_name();
        let sem = NamedSemaphore::create(&name).unwrap();
        let start = std::time::Instant::now();
        assert!(!sem.wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));
        NamedSemaphore::remove(&name).unwrap();
    }

    #[test]
    fn posting_threads_outlive_unlink_and_owner_drop() {
        const THREADS: usize = 4;
        const POSTS: usize = 200;
        let name = unique_name();
        let owner = Arc::new(NamedSemaphore::create(&name).unwrap());
        let start = Arc::new(Barrier::new(THREADS + 1));

        let posters: Vec<_> = (0..THREADS)
            .map(|_| {
                let sem = Arc::clone(&owner);
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    start.wait();
                    for _ in 0..POSTS {
                        sem.post().unwrap();
                    }
                    sem
                })
            })
            .collect();

        // Shutdown path: unlink the name and give up this handle mid-stream.
        start.wait();
        assert!(NamedSemaphore::remove(&name).unwrap());
        drop(owner);

        let mut last = None;
        for poster in posters {
            last = Some(poster.join().unwrap());
        }
        let last = last.unwrap();
        assert_eq!(Arc::strong_count(&last), 1);
        #[cfg(target_os = "linux")]
        assert_eq!(last.value().unwrap(), (THREADS * POSTS) as i32);
        assert!(NamedSemaphore::open(&name).is_err());
    }

    #[test]
    fn open_missing_semaphore_fails() {
        assert!(matches!(
            NamedSemaphore::open(&unique_name()),
            Err(SignalError::Open { .. })
        ));
    }
}
