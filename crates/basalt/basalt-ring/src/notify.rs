//! Consumer wakeups.
//!
//! Two paths are fired on every upward watermark crossing:
//! - the in-process [`ReadinessGate`], for a consumer thread blocked in
//!   `Control::wait_ready`;
//! - the bound [`Notifier`], if any, for a consumer in another context.
//!
//! Wakeups are advisory. A woken consumer must still compare head and tail.
//!
//! Neither path blocks the producer. The gate only takes its mutex while a
//! consumer thread is parked on it, and the notifier slot is read with a
//! non-blocking `try_read`; a signal that races a rebind is counted as
//! pending and delivered by the rebind.

use parking_lot::{Condvar, Mutex, RwLock};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering, fence};
use std::time::{Duration, Instant};

/// A cross-context wakeup target.
pub trait Notifier: Send + Sync {
    /// Delivers one wakeup. Must not block.
    fn signal(&self) -> io::Result<()>;
}

impl<N: Notifier> Notifier for std::sync::Arc<N> {
    fn signal(&self) -> io::Result<()> {
        (**self).signal()
    }
}

#[cfg(target_os = "linux")]
pub use eventfd::{EVENTFD_ENV, EventFdNotifier};

#[cfg(target_os = "linux")]
mod eventfd {
    use super::Notifier;
    use std::io::{self, ErrorKind};
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
    use std::time::Duration;

    /// Environment variable through which a parent hands an inherited
    /// eventfd number to a consumer it spawns.
    pub const EVENTFD_ENV: &str = "BASALT_EVENTFD";

    /// Notifier backed by a non-blocking Linux eventfd.
    ///
    /// Each signal adds 1 to the eventfd counter, so signals the consumer has
    /// not drained yet coalesce into a single readable event.
    pub struct EventFdNotifier {
        fd: OwnedFd,
    }

    impl EventFdNotifier {
        pub fn new() -> io::Result<Self> {
            // SAFETY: plain syscall, no pointers involved.
            let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: eventfd returned a fresh descriptor that nothing else owns.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };
            Ok(Self { fd })
        }

        /// Wraps an eventfd received from elsewhere, e.g. inherited by a child.
        pub fn from_fd(fd: OwnedFd) -> Self {
            Self { fd }
        }

        /// Adopts the descriptor named by [`EVENTFD_ENV`], if set.
        ///
        /// The variable is a contract with the spawning parent: the numbered
        /// descriptor was inherited for this process and nothing else owns it.
        pub fn from_env() -> io::Result<Option<Self>> {
            let Ok(value) = std::env::var(EVENTFD_ENV) else {
                return Ok(None);
            };
            let raw: RawFd = value.trim().parse().map_err(|_| {
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{EVENTFD_ENV}={value} is not a descriptor"),
                )
            })?;
            // SAFETY: F_GETFD only inspects the descriptor table.
            if raw < 0 || unsafe { libc::fcntl(raw, libc::F_GETFD) } < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: the descriptor is open, and per the variable's contract
            // it was handed to this process to own.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };
            Ok(Some(Self::from_fd(fd)))
        }

        /// Duplicates the descriptor without close-on-exec so a spawned child
        /// inherits it. Drop the returned fd once the child is running.
        pub fn dup_inheritable(&self) -> io::Result<OwnedFd> {
            // SAFETY: F_DUPFD returns a fresh descriptor or -1.
            let raw = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_DUPFD, 0) };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: the duplicate is new and owned by nobody else.
            Ok(unsafe { OwnedFd::from_raw_fd(raw) })
        }

        /// Duplicates the descriptor so one end can be bound and one kept.
        pub fn try_clone(&self) -> io::Result<Self> {
            Ok(Self {
                fd: self.fd.try_clone()?,
            })
        }

        /// Reads and resets the counter. Returns 0 when nothing was pending.
        pub fn drain(&self) -> io::Result<u64> {
            let mut value = 0u64;
            // SAFETY: fd is a valid eventfd and `value` is 8 writable bytes.
            let ret = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    &mut value as *mut u64 as *mut libc::c_void,
                    size_of::<u64>(),
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::WouldBlock {
                    return Ok(0);
                }
                return Err(err);
            }
            Ok(value)
        }

        /// Blocks until the eventfd is signalled or `timeout` passes, then
        /// drains it. Returns the drained count, 0 on timeout or interrupt.
        /// `None` waits indefinitely.
        pub fn wait(&self, timeout: Option<Duration>) -> io::Result<u64> {
            let mut pfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as libc::c_int);
            // SAFETY: `pfd` is one valid pollfd for the duration of the call.
            let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }
            if ret == 0 {
                return Ok(0);
            }
            self.drain()
        }
    }

    impl Notifier for EventFdNotifier {
        fn signal(&self) -> io::Result<()> {
            let one = 1u64;
            // SAFETY: fd is a valid eventfd and `one` is 8 readable bytes.
            let ret = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    &one as *const u64 as *const libc::c_void,
                    size_of::<u64>(),
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                // Counter saturated: the consumer is already signalled.
                if err.kind() != ErrorKind::WouldBlock {
                    return Err(err);
                }
            }
            Ok(())
        }
    }

    impl AsFd for EventFdNotifier {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.fd.as_fd()
        }
    }

    impl AsRawFd for EventFdNotifier {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }
}

/// The bound cross-context notifier.
pub(crate) struct NotifierSlot {
    slot: RwLock<Option<Box<dyn Notifier>>>,
    /// Signals not yet delivered because the slot was being rebound.
    pending: AtomicUsize,
}

impl NotifierSlot {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            pending: AtomicUsize::new(0),
        }
    }

    /// Signals the bound notifier, if any. Never waits for the slot.
    pub fn signal(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        // On contention the rebind in progress delivers what is pending.
        if let Some(guard) = self.slot.try_read() {
            fire(guard.as_deref(), self.pending.swap(0, Ordering::SeqCst));
        }
    }

    /// Installs `notifier`, returning the previous one, then delivers the
    /// signals that arrived while the slot was locked.
    pub fn replace(&self, notifier: Option<Box<dyn Notifier>>) -> Option<Box<dyn Notifier>> {
        let old = std::mem::replace(&mut *self.slot.write(), notifier);
        let guard = self.slot.read();
        fire(guard.as_deref(), self.pending.swap(0, Ordering::SeqCst));
        old
    }
}

fn fire(notifier: Option<&dyn Notifier>, times: usize) {
    let Some(n) = notifier else { return };
    for _ in 0..times {
        if let Err(e) = n.signal() {
            tracing::warn!(error = %e, "notifier signal failed");
            return;
        }
    }
}

/// In-process wait point for a consumer thread.
pub(crate) struct ReadinessGate {
    wakeups: Mutex<u64>,
    cv: Condvar,
    waiters: AtomicUsize,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            wakeups: Mutex::new(0),
            cv: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Wakes parked waiters. Lock-free when nobody is parked.
    pub fn wake(&self) {
        // Pairs with the fence in `wait`: either the waiter sees the new fill
        // level, or we see it registered.
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        *self.wakeups.lock() += 1;
        self.cv.notify_all();
    }

    /// Blocks until `ready()` holds or a wakeup arrives, or `timeout` passes.
    ///
    /// Returns true if the caller was woken or the level already held.
    pub fn wait(&self, timeout: Option<Duration>, ready: impl Fn() -> bool) -> bool {
        let mut seen = self.wakeups.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let woke = self.wait_locked(&mut seen, timeout, ready);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        woke
    }

    fn wait_locked(
        &self,
        seen: &mut parking_lot::MutexGuard<'_, u64>,
        timeout: Option<Duration>,
        ready: impl Fn() -> bool,
    ) -> bool {
        if ready() {
            return true;
        }
        let start = **seen;
        let deadline = timeout.map(|t| Instant::now() + t);
        while **seen == start {
            match deadline {
                Some(d) => {
                    if self.cv.wait_until(seen, d).timed_out() {
                        break;
                    }
                }
                None => self.cv.wait(seen),
            }
        }
        **seen != start || ready()
    }

    #[cfg(test)]
    fn parked(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn gate_returns_immediately_when_ready() {
        let gate = ReadinessGate::new();
        assert!(gate.wait(None, || true));
    }

    #[test]
    fn gate_times_out_without_wakeup() {
        let gate = ReadinessGate::new();
        assert!(!gate.wait(Some(Duration::from_millis(10)), || false));
    }

    #[test]
    fn gate_wakes_blocked_waiter() {
        let gate = Arc::new(ReadinessGate::new());
        let done = Arc::new(AtomicBool::new(false));

        let waiter = {
            let gate = gate.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let woke = gate.wait(Some(Duration::from_secs(5)), || false);
                done.store(true, Ordering::SeqCst);
                woke
            })
        };

        while gate.parked() == 0 {
            std::thread::yield_now();
        }
        while !done.load(Ordering::SeqCst) {
            gate.wake();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(waiter.join().unwrap());
        assert_eq!(gate.parked(), 0);
    }

    #[test]
    fn wake_without_waiters_does_not_touch_the_lock() {
        let gate = ReadinessGate::new();
        let _held = gate.wakeups.lock();
        // Would deadlock if wake() locked with nobody parked.
        gate.wake();
        gate.wake();
    }

    struct Counter(AtomicUsize);

    impl Notifier for Counter {
        fn signal(&self) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn slot_signals_bound_notifier() {
        let slot = NotifierSlot::new();
        slot.signal();
        let hits = Arc::new(Counter(AtomicUsize::new(0)));
        slot.replace(Some(Box::new(hits.clone())));
        assert_eq!(hits.0.load(Ordering::SeqCst), 0, "unbound signals are not replayed");

        slot.signal();
        slot.signal();
        assert_eq!(hits.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn signal_during_rebind_is_delivered_by_the_rebind() {
        let slot = NotifierSlot::new();
        let hits = Arc::new(Counter(AtomicUsize::new(0)));
        slot.replace(Some(Box::new(hits.clone())));

        {
            let _rebinding = slot.slot.write();
            // Must return without waiting for the writer.
            slot.signal();
            slot.signal();
        }
        assert_eq!(hits.0.load(Ordering::SeqCst), 0);

        let next = Arc::new(Counter(AtomicUsize::new(0)));
        let prev = slot.replace(Some(Box::new(next.clone())));
        assert!(prev.is_some());
        assert_eq!(next.0.load(Ordering::SeqCst), 2);
        assert_eq!(hits.0.load(Ordering::SeqCst), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn eventfd_signals_coalesce() {
        let n = EventFdNotifier::new().unwrap();
        assert_eq!(n.drain().unwrap(), 0);
        n.signal().unwrap();
        n.signal().unwrap();
        assert_eq!(n.drain().unwrap(), 2);
        assert_eq!(n.drain().unwrap(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn eventfd_wait_times_out_then_sees_signal() {
        let n = EventFdNotifier::new().unwrap();
        assert_eq!(n.wait(Some(Duration::from_millis(5))).unwrap(), 0);

        let remote = n.try_clone().unwrap();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.signal().unwrap();
        });
        assert_eq!(n.wait(Some(Duration::from_secs(5))).unwrap(), 1);
        t.join().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn inheritable_duplicate_drops_close_on_exec() {
        use std::os::fd::AsRawFd;
        let n = EventFdNotifier::new().unwrap();
        let cloexec = |fd: i32| unsafe { libc::fcntl(fd, libc::F_GETFD) } & libc::FD_CLOEXEC;
        assert_ne!(cloexec(n.as_raw_fd()), 0);

        let dup = n.dup_inheritable().unwrap();
        assert_eq!(cloexec(dup.as_raw_fd()), 0);
        let other = EventFdNotifier::from_fd(dup);
        other.signal().unwrap();
        assert_eq!(n.drain().unwrap(), 1);
    }
}
