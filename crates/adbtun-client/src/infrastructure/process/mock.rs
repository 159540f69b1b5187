//! Scripted process backend for tests.
//!
//! # Why a scripted backend?
//!
//! The real backend runs `adb`, which needs the Android SDK on the machine and
//! usually a phone on the desk.  [`ScriptedProcessBackend`] replaces it with a
//! table of canned replies:
//!
//! ```ignore
//! let backend = ScriptedProcessBackend::new()
//!     .on(&["reverse", "localabstract:adbtun", "tcp:27183"], Reply::exit(1))
//!     .on(&["forward"], Reply::exit(0))
//!     .on(&["devices", "-l"], Reply::exit(0).with_stdout(LISTING));
//! ```
//!
//! A rule matches when its pattern appears as a contiguous run of arguments
//! in the command line; among matching rules the longest pattern wins.  Each
//! rule holds a queue of replies: every call consumes one, and the last reply
//! is reused once the queue is down to a single entry.
//!
//! Every command line is recorded so tests can assert on what was invoked
//! and in which order.
//!
//! [`Reply::hang`] produces a child that never exits on its own (and whose
//! output pipe never reaches EOF) until it is terminated, which is how tests
//! exercise interruption.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::{
    ChildProcess, ExitOutcome, OutputPipe, ProcessBackend, ProcessHandle, SpawnError, SpawnFlags,
};

// ── Fake child ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FakeState {
    outcome: Option<ExitOutcome>,
    terminated: bool,
}

/// A child process whose outcome is decided by the test.
#[derive(Debug, Default)]
pub struct FakeChild {
    pid: u32,
    state: Mutex<FakeState>,
    changed: Condvar,
}

impl FakeChild {
    /// A child that has already exited with `code`.
    pub fn exited(code: i32) -> Self {
        Self::with_outcome(Some(ExitOutcome::Code(code)))
    }

    /// A child that terminated abnormally.
    pub fn abnormal() -> Self {
        Self::with_outcome(Some(ExitOutcome::Unknown))
    }

    /// A child that runs until terminated.
    pub fn blocking() -> Self {
        Self::with_outcome(None)
    }

    fn with_outcome(outcome: Option<ExitOutcome>) -> Self {
        Self {
            pid: 0,
            state: Mutex::new(FakeState {
                outcome,
                terminated: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// `true` once [`ChildProcess::terminate`] has been called.
    pub fn was_terminated(&self) -> bool {
        self.lock().terminated
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_outcome(&self) -> ExitOutcome {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome {
                return outcome;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&self, _reap: bool) -> ExitOutcome {
        self.wait_outcome()
    }

    fn terminate(&self) -> io::Result<()> {
        let mut state = self.lock();
        state.terminated = true;
        if state.outcome.is_none() {
            state.outcome = Some(ExitOutcome::Unknown);
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }
}

/// Output pipe of a hanging child: blocks until the child is terminated,
/// then reports EOF.
struct HangingPipe {
    child: Arc<FakeChild>,
}

impl Read for HangingPipe {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        self.child.wait_outcome();
        Ok(0)
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplyKind {
    Exit(ExitOutcome),
    Hang,
    MissingBinary,
    SpawnFailure,
}

/// What a scripted command does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    kind: ReplyKind,
    stdout: String,
}

impl Reply {
    /// Exits with `code`.
    pub fn exit(code: i32) -> Self {
        Self {
            kind: ReplyKind::Exit(ExitOutcome::Code(code)),
            stdout: String::new(),
        }
    }

    /// Terminates abnormally (as if killed by a signal).
    pub fn abnormal() -> Self {
        Self {
            kind: ReplyKind::Exit(ExitOutcome::Unknown),
            stdout: String::new(),
        }
    }

    /// Never exits until terminated.
    pub fn hang() -> Self {
        Self {
            kind: ReplyKind::Hang,
            stdout: String::new(),
        }
    }

    /// Fails to spawn because the executable is missing.
    pub fn missing_binary() -> Self {
        Self {
            kind: ReplyKind::MissingBinary,
            stdout: String::new(),
        }
    }

    /// Fails to spawn for another reason.
    pub fn spawn_failure() -> Self {
        Self {
            kind: ReplyKind::SpawnFailure,
            stdout: String::new(),
        }
    }

    /// Sets the text written to standard output (captured commands only).
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Rule {
    pattern: Vec<String>,
    replies: VecDeque<Reply>,
}

impl Rule {
    fn matches(&self, argv: &[String]) -> bool {
        !self.pattern.is_empty()
            && argv
                .windows(self.pattern.len())
                .any(|window| window == self.pattern.as_slice())
    }

    fn next_reply(&mut self) -> Reply {
        if self.replies.len() > 1 {
            if let Some(reply) = self.replies.pop_front() {
                return reply;
            }
        }
        self.replies.front().cloned().unwrap_or_else(|| Reply::exit(0))
    }
}

/// A [`ProcessBackend`] that answers from a script and records every call.
#[derive(Debug)]
pub struct ScriptedProcessBackend {
    rules: Mutex<Vec<Rule>>,
    default_reply: Reply,
    calls: Mutex<Vec<Vec<String>>>,
    children: Mutex<Vec<Arc<FakeChild>>>,
    next_pid: AtomicU32,
}

impl Default for ScriptedProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProcessBackend {
    /// Creates a backend where every unscripted command exits with code 0.
    pub fn new() -> Self {
        Self::with_default(Reply::exit(0))
    }

    /// Creates a backend where every unscripted command gets `reply`.
    pub fn with_default(reply: Reply) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: reply,
            calls: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(1000),
        }
    }

    /// Adds `reply` to the queue of the rule for `pattern`.
    pub fn on(self, pattern: &[&str], reply: Reply) -> Self {
        let pattern: Vec<String> = pattern.iter().map(|s| s.to_string()).collect();
        {
            let mut rules = lock(&self.rules);
            match rules.iter_mut().find(|rule| rule.pattern == pattern) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    pattern,
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Every command line received so far, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        lock(&self.calls).clone()
    }

    /// Number of recorded command lines containing `pattern`.
    pub fn count(&self, pattern: &[&str]) -> usize {
        let rule = Rule {
            pattern: pattern.iter().map(|s| s.to_string()).collect(),
            replies: VecDeque::new(),
        };
        lock(&self.calls)
            .iter()
            .filter(|argv| rule.matches(argv))
            .count()
    }

    /// Children spawned so far, in order.
    pub fn children(&self) -> Vec<Arc<FakeChild>> {
        lock(&self.children).clone()
    }

    fn reply_for(&self, argv: &[String]) -> Reply {
        lock(&self.calls).push(argv.to_vec());
        let mut rules = lock(&self.rules);
        rules
            .iter_mut()
            .filter(|rule| rule.matches(argv))
            .max_by_key(|rule| rule.pattern.len())
            .map(Rule::next_reply)
            .unwrap_or_else(|| self.default_reply.clone())
    }

    fn spawn(&self, argv: &[String]) -> Result<(Arc<FakeChild>, Reply), SpawnError> {
        let program = argv.first().cloned().ok_or(SpawnError::EmptyCommand)?;
        let reply = self.reply_for(argv);
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let child = match reply.kind {
            ReplyKind::Exit(ExitOutcome::Code(code)) => FakeChild::exited(code),
            ReplyKind::Exit(ExitOutcome::Unknown) => FakeChild::abnormal(),
            ReplyKind::Hang => FakeChild::blocking(),
            ReplyKind::MissingBinary => return Err(SpawnError::MissingBinary { program }),
            ReplyKind::SpawnFailure => {
                return Err(SpawnError::Generic {
                    program,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "scripted failure"),
                })
            }
        };
        let child = Arc::new(child.with_pid(pid));
        lock(&self.children).push(Arc::clone(&child));
        Ok((child, reply))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessBackend for ScriptedProcessBackend {
    fn execute(&self, argv: &[String], _flags: SpawnFlags) -> Result<ProcessHandle, SpawnError> {
        let (child, _reply) = self.spawn(argv)?;
        let handle: ProcessHandle = child;
        Ok(handle)
    }

    fn execute_capturing(
        &self,
        argv: &[String],
        _flags: SpawnFlags,
    ) -> Result<(ProcessHandle, OutputPipe), SpawnError> {
        let (child, reply) = self.spawn(argv)?;
        let pipe: OutputPipe = if reply.kind == ReplyKind::Hang {
            Box::new(HangingPipe {
                child: Arc::clone(&child),
            })
        } else {
            Box::new(Cursor::new(reply.stdout.into_bytes()))
        };
        let handle: ProcessHandle = child;
        Ok((handle, pipe))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
