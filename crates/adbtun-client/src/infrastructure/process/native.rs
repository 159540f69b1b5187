//! `std::process` implementation of [`ProcessBackend`].
//!
//! # Implementation notes
//!
//! `std::process::Child::wait` needs `&mut self` and holds the child for the
//! whole wait, which would prevent another thread from killing it.  The child
//! is therefore kept behind a mutex and waited for by polling
//! [`Child::try_wait`] with the lock released between polls, so
//! [`ChildProcess::terminate`] can get in at any time.
//!
//! Once a status has been collected, `std` remembers it and turns later
//! `kill` calls into no-ops, so a recycled PID is never signalled.

use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{
    ChildProcess, ExitOutcome, OutputPipe, ProcessBackend, ProcessHandle, SpawnError, SpawnFlags,
};

/// Delay between two exit-status polls.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Spawns real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProcessBackend;

impl NativeProcessBackend {
    pub fn new() -> Self {
        Self
    }

    fn spawn(argv: &[String], stdout: Stdio, stderr: Stdio) -> Result<Child, SpawnError> {
        let (program, args) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => SpawnError::MissingBinary {
                    program: program.clone(),
                },
                _ => SpawnError::Generic {
                    program: program.clone(),
                    source,
                },
            })
    }
}

fn passthrough(discard: bool) -> Stdio {
    if discard {
        Stdio::null()
    } else {
        Stdio::inherit()
    }
}

impl ProcessBackend for NativeProcessBackend {
    fn execute(&self, argv: &[String], flags: SpawnFlags) -> Result<ProcessHandle, SpawnError> {
        let child = Self::spawn(
            argv,
            passthrough(flags.no_stdout),
            passthrough(flags.no_stderr),
        )?;
        debug!("spawned process {}", child.id());
        let handle: ProcessHandle = Arc::new(NativeChild::new(child));
        Ok(handle)
    }

    fn execute_capturing(
        &self,
        argv: &[String],
        flags: SpawnFlags,
    ) -> Result<(ProcessHandle, OutputPipe), SpawnError> {
        let mut child = Self::spawn(argv, Stdio::piped(), passthrough(flags.no_stderr))?;
        let Some(stdout) = child.stdout.take() else {
            // Unreachable with Stdio::piped().
            let _ = child.kill();
            let _ = child.wait();
            return Err(SpawnError::Generic {
                program: argv[0].clone(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "stdout pipe unavailable"),
            });
        };
        debug!("spawned process {} (capturing stdout)", child.id());
        let handle: ProcessHandle = Arc::new(NativeChild::new(child));
        let pipe: OutputPipe = Box::new(stdout);
        Ok((handle, pipe))
    }
}

#[derive(Debug)]
struct ChildState {
    /// `None` once reaped.
    child: Option<Child>,
    outcome: Option<ExitOutcome>,
}

/// A process spawned by [`NativeProcessBackend`].
#[derive(Debug)]
pub struct NativeChild {
    pid: u32,
    state: Mutex<ChildState>,
}

impl NativeChild {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            state: Mutex::new(ChildState {
                child: Some(child),
                outcome: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChildState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn outcome_of(status: ExitStatus) -> ExitOutcome {
    match status.code() {
        Some(code) => ExitOutcome::Code(code),
        None => ExitOutcome::Unknown,
    }
}

impl ChildProcess for NativeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&self, reap: bool) -> ExitOutcome {
        loop {
            {
                let mut state = self.lock();
                if let Some(outcome) = state.outcome {
                    if reap {
                        state.child = None;
                    }
                    return outcome;
                }
                let Some(child) = state.child.as_mut() else {
                    return ExitOutcome::Unknown;
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let outcome = outcome_of(status);
                        state.outcome = Some(outcome);
                        if reap {
                            state.child = None;
                        }
                        return outcome;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("could not wait for process {}: {e}", self.pid);
                        state.outcome = Some(ExitOutcome::Unknown);
                        return ExitOutcome::Unknown;
                    }
                }
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    fn terminate(&self) -> io::Result<()> {
        match self.lock().child.as_mut() {
            Some(child) => child.kill(),
            None => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
