//! Process invocation: spawning the bridge executable and observing its exit.
//!
//! # Why a trait? (for beginners)
//!
//! The bridge client never calls `std::process::Command` directly.  It talks
//! to a [`ProcessBackend`], which turns an argument vector into a running
//! [`ChildProcess`].  Production code injects [`native::NativeProcessBackend`];
//! tests inject [`mock::ScriptedProcessBackend`], which answers with canned
//! exit codes and output so no real `adb` or device is needed.
//!
//! # Exit outcomes
//!
//! A finished process either exited with a numeric code or was terminated
//! abnormally (for example killed by a signal).  [`ExitOutcome`] models the
//! two cases explicitly instead of exposing OS-specific status words.

use std::fmt::Debug;
use std::io::{self, Read};
use std::sync::Arc;

use thiserror::Error;

pub mod mock;
pub mod native;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited normally with this code.
    Code(i32),
    /// The process terminated abnormally (signal, or status unavailable).
    Unknown,
}

impl ExitOutcome {
    /// `true` only for a normal exit with code 0.
    pub fn success(self) -> bool {
        self == ExitOutcome::Code(0)
    }
}

/// Why a process could not be started.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The executable does not exist or is not on the search path.
    #[error("executable not found: {program}")]
    MissingBinary { program: String },

    /// Any other spawn failure (permissions, resource limits, ...).
    #[error("could not spawn {program}: {source}")]
    Generic {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The argument vector was empty.
    #[error("empty command line")]
    EmptyCommand,
}

/// Standard stream passthrough options for a spawned process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnFlags {
    /// Discard the child's standard output instead of inheriting it.
    /// Ignored by [`ProcessBackend::execute_capturing`], which always pipes it.
    pub no_stdout: bool,
    /// Discard the child's standard error instead of inheriting it.
    pub no_stderr: bool,
}

impl SpawnFlags {
    /// Silence both standard output and standard error.
    pub const QUIET: SpawnFlags = SpawnFlags {
        no_stdout: true,
        no_stderr: true,
    };
}

/// A running (or finished) child process.
///
/// All methods take `&self` so the process can be waited on by the worker
/// thread and terminated by the cancelling thread at the same time.
pub trait ChildProcess: Send + Sync + Debug {
    /// OS process identifier, for logs.
    fn id(&self) -> u32;

    /// Blocks until the process has finished.
    ///
    /// With `reap = false` the handle stays waitable: a later `wait` returns
    /// the same outcome.  With `reap = true` the OS resources still held for
    /// the child are released after the outcome is known; later calls keep
    /// returning the recorded outcome.
    fn wait(&self, reap: bool) -> ExitOutcome;

    /// Forcefully kills the process.  A no-op once it has been reaped.
    fn terminate(&self) -> io::Result<()>;
}

/// Shared handle to a child process.
pub type ProcessHandle = Arc<dyn ChildProcess>;

/// Read end of a pipe connected to a child's standard output.
pub type OutputPipe = Box<dyn Read + Send>;

/// Spawns processes from argument vectors.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessBackend: Send + Sync {
    /// Spawns `argv[0]` with the remaining arguments.
    ///
    /// # Errors
    ///
    /// [`SpawnError::MissingBinary`] when the executable cannot be found,
    /// [`SpawnError::Generic`] for any other failure.
    fn execute(&self, argv: &[String], flags: SpawnFlags) -> Result<ProcessHandle, SpawnError>;

    /// Like [`execute`](Self::execute), with standard output captured through
    /// a pipe.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    fn execute_capturing(
        &self,
        argv: &[String],
        flags: SpawnFlags,
    ) -> Result<(ProcessHandle, OutputPipe), SpawnError>;
}

/// Result of reading a pipe with an upper size bound.
#[derive(Debug, PartialEq, Eq)]
pub enum BoundedRead {
    /// The whole output, at most `limit` bytes.
    Complete(Vec<u8>),
    /// The producer wrote more than `limit` bytes; reading stopped.  Holds
    /// the first `limit` bytes.
    Overflow(Vec<u8>),
}

/// Reads `pipe` to EOF, giving up once more than `limit` bytes arrive.
///
/// Only `limit + 1` bytes are consumed; the rest stays in the pipe.
///
/// # Errors
///
/// Propagates I/O errors from the pipe.
pub fn read_bounded(pipe: &mut dyn Read, limit: usize) -> io::Result<BoundedRead> {
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    let max = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    pipe.take(max).read_to_end(&mut buf)?;
    if buf.len() > limit {
        buf.truncate(limit);
        Ok(BoundedRead::Overflow(buf))
    } else {
        Ok(BoundedRead::Complete(buf))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
