//! Bridge client: named `adb` operations on top of a [`ProcessBackend`].
//!
//! Every operation builds an argument vector of the shape
//!
//! ```text
//! <adb> [-s <serial>] <subcommand> [args...]
//! ```
//!
//! runs it, and turns the outcome into a `Result`.  Most commands succeed iff
//! the process exits with code 0.  `adb connect` is the exception: it exits 0
//! even when the connection fails, so its captured output is checked for the
//! word `connected` instead.
//!
//! # Waiting and cancellation
//!
//! While a child runs, it is armed in the caller's [`Interruptor`] so that
//! another thread can kill it.  The child is waited for *without* reaping
//! while armed (a reaped PID could be recycled and then killed by mistake),
//! then disarmed, then reaped.
//!
//! If the interruptor is already interrupted, nothing is spawned and the call
//! fails with [`AdbError::Interrupted`].

use std::io;
use std::sync::Arc;

use adbtun_core::{argv_to_string, first_line, first_token, parse_device_ip, parse_devices, Device};
use thiserror::Error;
use tracing::{debug, error};

use crate::infrastructure::interrupt::Interruptor;
use crate::infrastructure::process::native::NativeProcessBackend;
use crate::infrastructure::process::{
    read_bounded, BoundedRead, ExitOutcome, ProcessBackend, ProcessHandle, SpawnError, SpawnFlags,
};
use crate::infrastructure::storage::config::{BridgeConfig, ADB_ENV_VAR};

/// Capacity of the command string written to the log.
pub const ARGV_LOG_CAPACITY: usize = 512;

/// Upper bound on `adb devices -l` output.
pub const DEVICE_LIST_CAPTURE_LIMIT: usize = 65536;

/// Upper bound on `shell ip route` output.
pub const ROUTE_CAPTURE_LIMIT: usize = 4096;

/// Upper bound on single-value outputs (`getprop`, `get-serialno`, `connect`).
pub const SHORT_CAPTURE_LIMIT: usize = 128;

/// What to do with captured output larger than its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overflow {
    /// Fail with [`AdbError::CaptureOverflow`].
    Fail,
    /// Keep the first `limit` bytes and discard the rest.
    Truncate,
}

/// Device property holding the port `adbd` listens on in TCP/IP mode.
pub const TCP_PORT_PROPERTY: &str = "service.adb.tcp.port";

/// Error type for bridge operations.
#[derive(Debug, Error)]
pub enum AdbError {
    /// The bridge executable could not be started.
    #[error("could not run adb {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: SpawnError,
    },

    #[error("adb {command} returned with value {code}")]
    NonZeroExit { command: &'static str, code: i32 },

    #[error("adb {command} terminated abnormally")]
    AbnormalExit { command: &'static str },

    /// The captured output did not fit the buffer reserved for it.
    #[error("adb {command} output is larger than {limit} bytes")]
    CaptureOverflow { command: &'static str, limit: usize },

    /// `adb connect` ran but did not report a connection.
    #[error("could not connect to {target}: {detail}")]
    ConnectRejected { target: String, detail: String },

    #[error("could not read adb {command} output: {source}")]
    Io {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The operation was cancelled through the [`Interruptor`].
    #[error("interrupted")]
    Interrupted,
}

impl AdbError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, AdbError::Interrupted)
    }

    /// `true` when the bridge executable itself could not be found.
    pub fn is_missing_binary(&self) -> bool {
        matches!(
            self,
            AdbError::Spawn {
                source: SpawnError::MissingBinary { .. },
                ..
            }
        )
    }
}

/// Interprets an exit outcome for `command`.
fn check_exit(command: &'static str, outcome: ExitOutcome) -> Result<(), AdbError> {
    match outcome {
        ExitOutcome::Code(0) => Ok(()),
        ExitOutcome::Code(code) => {
            debug!("adb {command} returned with value {code}");
            Err(AdbError::NonZeroExit { command, code })
        }
        ExitOutcome::Unknown => {
            debug!("adb {command} terminated abnormally");
            Err(AdbError::AbnormalExit { command })
        }
    }
}

/// Issues `adb` commands.
///
/// Cheap to share behind an `Arc`; every call takes the [`Interruptor`] of
/// the logical operation it belongs to.
pub struct AdbClient {
    backend: Arc<dyn ProcessBackend>,
    executable: String,
}

impl AdbClient {
    pub fn new(backend: Arc<dyn ProcessBackend>, bridge: &BridgeConfig) -> Self {
        Self {
            backend,
            executable: bridge.executable.clone(),
        }
    }

    /// A client spawning real `adb` processes.
    pub fn native(bridge: &BridgeConfig) -> Self {
        Self::new(Arc::new(NativeProcessBackend::new()), bridge)
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    // ── Tunnels ───────────────────────────────────────────────────────────────

    /// `adb -s <serial> forward tcp:<local_port> localabstract:<socket_name>`
    pub fn forward(
        &self,
        intr: &Interruptor,
        serial: &str,
        local_port: u16,
        socket_name: &str,
    ) -> Result<(), AdbError> {
        let local = format!("tcp:{local_port}");
        let remote = format!("localabstract:{socket_name}");
        self.run(intr, "forward", Some(serial), &["forward", &local, &remote], SpawnFlags::default())
    }

    /// `adb -s <serial> forward --remove tcp:<local_port>`
    pub fn forward_remove(
        &self,
        intr: &Interruptor,
        serial: &str,
        local_port: u16,
    ) -> Result<(), AdbError> {
        let local = format!("tcp:{local_port}");
        self.run(
            intr,
            "forward --remove",
            Some(serial),
            &["forward", "--remove", &local],
            SpawnFlags::default(),
        )
    }

    /// `adb -s <serial> reverse localabstract:<socket_name> tcp:<local_port>`
    pub fn reverse(
        &self,
        intr: &Interruptor,
        serial: &str,
        socket_name: &str,
        local_port: u16,
    ) -> Result<(), AdbError> {
        let remote = format!("localabstract:{socket_name}");
        let local = format!("tcp:{local_port}");
        self.run(intr, "reverse", Some(serial), &["reverse", &remote, &local], SpawnFlags::default())
    }

    /// `adb -s <serial> reverse --remove localabstract:<socket_name>`
    pub fn reverse_remove(
        &self,
        intr: &Interruptor,
        serial: &str,
        socket_name: &str,
    ) -> Result<(), AdbError> {
        let remote = format!("localabstract:{socket_name}");
        self.run(
            intr,
            "reverse --remove",
            Some(serial),
            &["reverse", "--remove", &remote],
            SpawnFlags::default(),
        )
    }

    // ── Files and packages ────────────────────────────────────────────────────

    /// `adb -s <serial> push <local> <remote>`
    pub fn push(
        &self,
        intr: &Interruptor,
        serial: &str,
        local: &str,
        remote: &str,
    ) -> Result<(), AdbError> {
        self.run(intr, "push", Some(serial), &["push", local, remote], SpawnFlags::default())
    }

    /// `adb -s <serial> install -r <local>`
    pub fn install(&self, intr: &Interruptor, serial: &str, local: &str) -> Result<(), AdbError> {
        self.run(intr, "install", Some(serial), &["install", "-r", local], SpawnFlags::default())
    }

    /// `adb -s <serial> shell <args...>`
    pub fn shell(&self, intr: &Interruptor, serial: &str, args: &[&str]) -> Result<(), AdbError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        self.run(intr, "shell", Some(serial), &full, SpawnFlags::default())
    }

    // ── TCP/IP ────────────────────────────────────────────────────────────────

    /// `adb -s <serial> tcpip <port>`: restarts `adbd` listening on `port`.
    pub fn tcpip(&self, intr: &Interruptor, serial: &str, port: u16) -> Result<(), AdbError> {
        let port = port.to_string();
        self.run(intr, "tcpip", Some(serial), &["tcpip", &port], SpawnFlags::default())
    }

    /// `adb connect <ip:port>`.
    ///
    /// `adb connect` exits with 0 whether or not it connected, so success is
    /// read from its output, which must start with `connected`.  An
    /// "already connected to" reply does not match; callers disconnect first.
    ///
    /// # Errors
    ///
    /// [`AdbError::ConnectRejected`] carrying the first line of the output
    /// when the prefix is missing.
    pub fn connect(&self, intr: &Interruptor, ip_port: &str) -> Result<(), AdbError> {
        let output = self.run_capturing(
            intr,
            "connect",
            None,
            &["connect", ip_port],
            SHORT_CAPTURE_LIMIT,
            Overflow::Truncate,
        )?;
        if output.starts_with("connected") {
            debug!("adb connect {ip_port}: {}", first_line(&output));
            Ok(())
        } else {
            Err(AdbError::ConnectRejected {
                target: ip_port.to_string(),
                detail: first_line(&output).to_string(),
            })
        }
    }

    /// `adb disconnect <ip:port>`
    pub fn disconnect(&self, intr: &Interruptor, ip_port: &str) -> Result<(), AdbError> {
        self.run(intr, "disconnect", None, &["disconnect", ip_port], SpawnFlags::QUIET)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// `adb -s <serial> shell getprop <name>`, trimmed at the first whitespace.
    pub fn get_property(
        &self,
        intr: &Interruptor,
        serial: &str,
        name: &str,
    ) -> Result<String, AdbError> {
        let output = self.run_capturing(
            intr,
            "getprop",
            Some(serial),
            &["shell", "getprop", name],
            SHORT_CAPTURE_LIMIT,
            Overflow::Truncate,
        )?;
        Ok(first_token(&output).to_string())
    }

    /// `adb get-serialno`: the serial of the only attached device.
    pub fn get_serialno(&self, intr: &Interruptor) -> Result<String, AdbError> {
        let output = self.run_capturing(
            intr,
            "get-serialno",
            None,
            &["get-serialno"],
            SHORT_CAPTURE_LIMIT,
            Overflow::Truncate,
        )?;
        Ok(first_token(&output).to_string())
    }

    /// `adb devices -l`, parsed.
    ///
    /// # Errors
    ///
    /// [`AdbError::CaptureOverflow`] if the listing is larger than
    /// [`DEVICE_LIST_CAPTURE_LIMIT`].
    pub fn list_devices(&self, intr: &Interruptor) -> Result<Vec<Device>, AdbError> {
        let output = self.run_capturing(
            intr,
            "devices",
            None,
            &["devices", "-l"],
            DEVICE_LIST_CAPTURE_LIMIT,
            Overflow::Fail,
        )?;
        Ok(parse_devices(&output))
    }

    /// The WLAN address of the device, from `adb shell ip route`.
    ///
    /// `Ok(None)` when the device has no `wlan*` route.
    pub fn get_device_ip(
        &self,
        intr: &Interruptor,
        serial: &str,
    ) -> Result<Option<String>, AdbError> {
        let output = self.run_capturing(
            intr,
            "ip route",
            Some(serial),
            &["shell", "ip", "route"],
            ROUTE_CAPTURE_LIMIT,
            Overflow::Fail,
        )?;
        Ok(parse_device_ip(&output))
    }

    // ── Plumbing ──────────────────────────────────────────────────────────────

    fn argv(&self, serial: Option<&str>, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        argv.push(self.executable.clone());
        if let Some(serial) = serial {
            argv.push("-s".to_string());
            argv.push(serial.to_string());
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    fn spawn_failed(&self, command: &'static str, argv: &[String], source: SpawnError) -> AdbError {
        match &source {
            SpawnError::MissingBinary { program } => error!(
                "command not found: {program}; install the Android platform tools, \
                 or set {ADB_ENV_VAR} to the full path of adb"
            ),
            _ => error!(
                "failed to execute: {}",
                argv_to_string(argv, ARGV_LOG_CAPACITY)
            ),
        }
        AdbError::Spawn { command, source }
    }

    /// Waits for `child` with it armed in `intr`, then reaps it.
    fn wait_armed(&self, intr: &Interruptor, child: &ProcessHandle) -> Result<ExitOutcome, AdbError> {
        if !intr.arm_process(Arc::clone(child)) {
            abandon(child);
            return Err(AdbError::Interrupted);
        }
        let outcome = child.wait(false);
        intr.disarm();
        child.wait(true);
        Ok(outcome)
    }

    fn run(
        &self,
        intr: &Interruptor,
        command: &'static str,
        serial: Option<&str>,
        args: &[&str],
        flags: SpawnFlags,
    ) -> Result<(), AdbError> {
        if intr.is_interrupted() {
            return Err(AdbError::Interrupted);
        }
        let argv = self.argv(serial, args);
        debug!("execute: {}", argv_to_string(&argv, ARGV_LOG_CAPACITY));

        let child = self
            .backend
            .execute(&argv, flags)
            .map_err(|source| self.spawn_failed(command, &argv, source))?;
        let outcome = self.wait_armed(intr, &child)?;

        if !outcome.success() && intr.is_interrupted() {
            return Err(AdbError::Interrupted);
        }
        check_exit(command, outcome)
    }

    fn run_capturing(
        &self,
        intr: &Interruptor,
        command: &'static str,
        serial: Option<&str>,
        args: &[&str],
        limit: usize,
        overflow: Overflow,
    ) -> Result<String, AdbError> {
        if intr.is_interrupted() {
            return Err(AdbError::Interrupted);
        }
        let argv = self.argv(serial, args);
        debug!("execute: {}", argv_to_string(&argv, ARGV_LOG_CAPACITY));

        let (child, mut pipe) = self
            .backend
            .execute_capturing(&argv, SpawnFlags::default())
            .map_err(|source| self.spawn_failed(command, &argv, source))?;

        if !intr.arm_process(Arc::clone(&child)) {
            drop(pipe);
            abandon(&child);
            return Err(AdbError::Interrupted);
        }
        let read = match read_bounded(&mut pipe, limit) {
            Ok(BoundedRead::Overflow(head)) if overflow == Overflow::Truncate => {
                debug!("adb {command} output truncated to {limit} bytes");
                // Let the child write the rest and exit normally.
                io::copy(&mut pipe, &mut io::sink())
                    .map(|_| BoundedRead::Complete(head))
            }
            other => other,
        };
        drop(pipe);
        if !matches!(read, Ok(BoundedRead::Complete(_))) {
            // Nobody reads the rest; do not wait for the child to finish it.
            if let Err(e) = child.terminate() {
                debug!("could not terminate adb {command}: {e}");
            }
        }
        let outcome = child.wait(false);
        intr.disarm();
        child.wait(true);

        if !outcome.success() && intr.is_interrupted() {
            return Err(AdbError::Interrupted);
        }
        let bytes = match read {
            Ok(BoundedRead::Complete(bytes)) => bytes,
            Ok(BoundedRead::Overflow(_)) => {
                error!("adb {command} output is larger than {limit} bytes");
                return Err(AdbError::CaptureOverflow { command, limit });
            }
            Err(source) => return Err(AdbError::Io { command, source }),
        };
        check_exit(command, outcome)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Kills and reaps a child that will not be waited for.
fn abandon(child: &ProcessHandle) {
    if let Err(e) = child.terminate() {
        debug!("could not terminate process {}: {e}", child.id());
    }
    child.wait(true);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
