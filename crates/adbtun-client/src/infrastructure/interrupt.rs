//! Cross-thread cancellation of blocking bridge and socket operations.
//!
//! # Why an interruptor? (for beginners)
//!
//! Everything adbtun does blocks: waiting for `adb` to exit, reading its
//! output, accepting the device's connection.  There is no event loop to
//! cancel.  When the user presses Ctrl-C, a *different* thread must be able to
//! make the blocked call return early.
//!
//! The trick is to force-close whatever the worker is blocked on:
//!
//! 1. Before a blocking call the worker **arms** the [`Interruptor`] with the
//!    resource it is about to block on (a socket or a child process).
//! 2. After the call returns it **disarms** it.
//! 3. [`Interruptor::interrupt`], called from another thread, sets a sticky
//!    flag, then shuts the armed socket down or kills the armed process, which
//!    makes the blocked call return with an error.
//!
//! Once interrupted, every later `arm_*` call fails, so the worker never starts
//! a new blocking call that nobody would cancel.
//!
//! ```text
//! worker thread                         cancelling thread
//! ─────────────                         ─────────────────
//! arm_process(child)  → true
//! child.wait()  (blocks) ...            interrupt()
//!                                         flag = true
//!                                         child.terminate()
//! wait returns
//! disarm()
//! is_interrupted()    → true  ⇒ Err(Interrupted)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use socket2::Socket;
use tracing::{debug, warn};

use super::process::ProcessHandle;

/// The single resource an [`Interruptor`] may hold at a time.
#[derive(Debug)]
pub enum ArmedResource {
    /// A duplicate handle of a socket the worker is blocked on.
    Socket(Socket),
    /// A child process the worker is waiting for.
    Process(ProcessHandle),
}

/// Per-operation cancellation token.
///
/// Holds at most one armed resource.  The `interrupted` flag is sticky and
/// readable without taking the lock.
#[derive(Debug, Default)]
pub struct Interruptor {
    interrupted: AtomicBool,
    armed: Mutex<Option<ArmedResource>>,
    wakeup: Condvar,
}

impl Interruptor {
    /// Creates an idle, non-interrupted interruptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the interruptor with a duplicate of the socket about to block.
    ///
    /// Returns `false` (and drops `socket`) if [`interrupt`](Self::interrupt)
    /// has already been called; the caller must then abort with an
    /// "interrupted" error instead of starting the blocking call.
    pub fn arm_socket(&self, socket: Socket) -> bool {
        self.arm(ArmedResource::Socket(socket))
    }

    /// Arms the interruptor with the child process about to be waited for.
    ///
    /// Same contract as [`arm_socket`](Self::arm_socket).
    pub fn arm_process(&self, process: ProcessHandle) -> bool {
        self.arm(ArmedResource::Process(process))
    }

    fn arm(&self, resource: ArmedResource) -> bool {
        let mut armed = self.lock();
        if self.is_interrupted() {
            return false;
        }
        if armed.is_some() {
            // Callers pair every arm with a disarm; replacing keeps the
            // one-resource invariant.
            warn!("interruptor armed twice without disarm; replacing resource");
        }
        *armed = Some(resource);
        true
    }

    /// Forgets the armed resource.  Always allowed, even after interruption.
    pub fn disarm(&self) {
        self.lock().take();
    }

    /// Sets the sticky interrupted flag and force-closes the armed resource.
    ///
    /// Idempotent.  Meant to be called from the cancelling thread.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);

        let mut armed = self.lock();
        match armed.take() {
            Some(ArmedResource::Socket(socket)) => {
                debug!("interrupting blocked socket");
                if let Err(e) = socket.shutdown(std::net::Shutdown::Both) {
                    // A listening socket reports ENOTCONN on some platforms;
                    // dropping the duplicate below still closes our handle.
                    debug!("socket shutdown on interrupt: {e}");
                }
            }
            Some(ArmedResource::Process(process)) => {
                debug!("interrupting process {}", process.id());
                if let Err(e) = process.terminate() {
                    warn!("could not terminate process {}: {e}", process.id());
                }
            }
            None => {}
        }
        drop(armed);
        self.wakeup.notify_all();
    }

    /// Lock-free check of the interrupted flag.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless interrupted first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the interruptor
    /// was (or became) interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.lock();
        loop {
            if self.is_interrupted() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            guard = self
                .wakeup
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ArmedResource>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
