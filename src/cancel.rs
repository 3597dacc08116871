//! Run cancellation and per-test deadlines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// How long in-flight processes may keep running after cancellation.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Shared flag telling workers to stop.
///
/// Cancelling stops the scheduler from starting new tests at once. Processes
/// that are already running get [`DEFAULT_GRACE`] to finish before they are
/// killed, or at once after [`CancelToken::force`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    forced: AtomicBool,
    requested_at: OnceLock<Instant>,
    grace: Duration,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                forced: AtomicBool::new(false),
                requested_at: OnceLock::new(),
                grace,
            }),
        }
    }

    pub fn cancel(&self) {
        let _ = self.inner.requested_at.set(Instant::now());
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancel and drop the grace period, so running processes are killed
    /// now. Scratch directories are still cleaned up by their tests.
    pub fn force(&self) {
        self.cancel();
        self.inner.forced.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancelled, and the grace period is over or was dropped.
    pub fn should_kill(&self) -> bool {
        if self.inner.forced.load(Ordering::SeqCst) {
            return true;
        }
        self.is_cancelled()
            && self
                .inner
                .requested_at
                .get()
                .is_some_and(|at| at.elapsed() >= self.inner.grace)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline and cancellation state for one test.
#[derive(Debug, Clone)]
pub struct Watchdog {
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl Watchdog {
    pub fn new(timeout: Option<Duration>, cancel: CancelToken) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
            cancel,
        }
    }

    /// No deadline and a token nobody cancels.
    pub fn unbounded() -> Self {
        Self::new(None, CancelToken::new())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn interrupted(&self) -> bool {
        self.cancel.should_kill()
    }
}

#[cfg(unix)]
static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_: nix::libc::c_int) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

/// Cancel `token` on Ctrl-C. A second Ctrl-C kills running tests without
/// waiting for the grace period.
#[cfg(unix)]
pub fn install_interrupt_handler(token: &CancelToken) -> std::io::Result<()> {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic.
    unsafe { sigaction(Signal::SIGINT, &action) }?;

    let token = token.clone();
    std::thread::Builder::new()
        .name("sigint".to_string())
        .spawn(move || {
            loop {
                if SIGINT_RECEIVED.swap(false, Ordering::SeqCst) {
                    if token.is_cancelled() {
                        tracing::warn!("interrupted again, killing running tests");
                        token.force();
                    } else {
                        tracing::warn!("interrupted, finishing running tests");
                        token.cancel();
                    }
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        })?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install_interrupt_handler(_token: &CancelToken) -> std::io::Result<()> {
    Ok(())
}
