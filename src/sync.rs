//! Shared concurrency primitives: cooperative shutdown, crash reporting, and
//! a lock adapter over the non-reentrant archive library.
//!
//! The pipeline runs as a handful of named OS threads rather than a single
//! event loop (DMA producer, sample dispatcher, per-peripheral workers,
//! camera grab thread, per-frame-handler publish/log workers, time-tag
//! producer, window-driver consumer). Each owns a [`StopSignal`]; shutdown is
//! always stop -> drain -> join: producers stop signalling, consumers exit
//! once they both see the stop flag and observe an empty source, then the
//! caller joins every handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative stop signal shared between a thread's owner and its body.
///
/// Grounded in the teacher's stop/drain/join shutdown convention: rather than
/// cancelling a thread out from under it, callers set a flag and the thread
/// checks it at its own suspension points.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        StopSignal {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Request that the owning thread stop at its next suspension point.
    pub fn notify_stop(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    /// Clear the stop flag, allowing the signal to be reused for a fresh run.
    pub fn reset(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    /// True if `notify_stop` has been called since the last `reset`.
    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until either stop is requested or `deadline` elapses. Returns
    /// `true` if stop was observed, `false` on timeout.
    pub fn should_stop(&self, deadline: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if *guard {
            return true;
        }
        let (guard, timeout) = cvar
            .wait_timeout(guard, deadline)
            .unwrap_or_else(|e| e.into_inner());
        *guard || !timeout.timed_out()
    }
}

/// A single crashed-thread report, as filed by a supervised thread wrapper.
#[derive(Debug, Clone)]
pub struct CrashReport {
    pub thread_name: String,
    pub error_kind: &'static str,
    pub message: String,
    pub at: Instant,
}

/// Process-wide singleton recording thread crashes.
///
/// Modeled after the teacher's weak-pointer + try-lock global-handle
/// pattern: a single `OnceLock`-backed instance, constructed lazily on first
/// use and shared by every `Arc` clone thereafter (unlike the message-bus
/// context, a crash monitor has no meaningful teardown-and-rebuild lifecycle,
/// so it is a plain lazily-initialized singleton rather than a weak-pointer
/// cache).
pub struct ThreadMonitor {
    crashes: Mutex<Vec<CrashReport>>,
}

static THREAD_MONITOR: once_cell::sync::OnceCell<Arc<ThreadMonitor>> = once_cell::sync::OnceCell::new();

impl ThreadMonitor {
    /// Get the process-wide monitor, constructing it on first call.
    pub fn get() -> Arc<ThreadMonitor> {
        THREAD_MONITOR
            .get_or_init(|| {
                Arc::new(ThreadMonitor {
                    crashes: Mutex::new(Vec::new()),
                })
            })
            .clone()
    }

    /// Record that `thread_name` exited due to an error.
    pub fn report(&self, thread_name: impl Into<String>, error_kind: &'static str, message: impl Into<String>) {
        let report = CrashReport {
            thread_name: thread_name.into(),
            error_kind,
            message: message.into(),
            at: Instant::now(),
        };
        tracing::error!(
            thread = %report.thread_name,
            kind = report.error_kind,
            message = %report.message,
            "thread crashed"
        );
        self.crashes.lock().unwrap_or_else(|e| e.into_inner()).push(report);
    }

    /// Snapshot of all crashes observed so far.
    pub fn crashes(&self) -> Vec<CrashReport> {
        self.crashes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True once at least one thread has crashed; a session-level supervisor
    /// polls this to decide whether to trigger stop-drain-join on every
    /// other thread.
    pub fn has_crash(&self) -> bool {
        !self.crashes.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Run `body` as a named, supervised thread: any `Err` it returns is logged,
/// filed with the [`ThreadMonitor`], and the thread exits — matching the
/// "exceptions as control flow become Result propagation to a top-level
/// wrapper" redesign.
pub fn supervised_spawn<F>(name: impl Into<String>, body: F) -> std::thread::JoinHandle<()>
where
    F: FnOnce() -> crate::error::CoreResult<()> + Send + 'static,
{
    let name = name.into();
    let builder = std::thread::Builder::new().name(name.clone());
    builder
        .spawn(move || {
            if let Err(err) = body() {
                ThreadMonitor::get().report(&name, err.kind_name(), err.to_string());
            }
        })
        .expect("failed to spawn supervised thread")
}

/// RAII guard over a non-reentrant resource, acquiring a recursive lock
/// around both construction and destruction of the wrapped handle.
///
/// Grounds the "lock adapter" pattern required because the archive backend
/// (HDF5) is not thread-safe: every table/dataset mutation across the whole
/// process must serialize through one lock, and that lock must still be held
/// while the wrapped handle's own `Drop` runs so that close-time I/O is safe
/// too.
pub struct LockAdapter<T> {
    guard: parking_lot::ReentrantMutexGuard<'static, ()>,
    inner: Option<T>,
}

impl<T> LockAdapter<T> {
    pub fn new(lock: &'static parking_lot::ReentrantMutex<()>, make: impl FnOnce() -> T) -> Self {
        let guard = lock.lock();
        let inner = make();
        LockAdapter {
            guard,
            inner: Some(inner),
        }
    }

    pub fn get(&self) -> &T {
        self.inner.as_ref().expect("LockAdapter inner taken")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("LockAdapter inner taken")
    }
}

impl<T> Drop for LockAdapter<T> {
    fn drop(&mut self) {
        // Dropping `inner` (which may itself perform I/O) happens while
        // `self.guard` is still held; both are released together when this
        // `Drop` returns.
        self.inner.take();
    }
}

/// Process-wide archive serialization lock (§5): one recursive mutex guards
/// every interaction with the archive backend.
pub static ARCHIVE_LOCK: parking_lot::ReentrantMutex<()> = parking_lot::ReentrantMutex::new(());
