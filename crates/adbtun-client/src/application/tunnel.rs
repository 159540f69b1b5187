//! Tunnel negotiation between a local TCP port and a device-side socket.
//!
//! # Reverse first, forward as fallback (for beginners)
//!
//! The streaming service on the device listens on an abstract Unix socket
//! (`localabstract:<name>`).  `adb` can bridge it to a local TCP port in two
//! directions:
//!
//! - **reverse** (`adb reverse localabstract:<name> tcp:<port>`): the device
//!   connects *out* to a socket we listen on.  We can start listening before
//!   the device-side service even runs, so this is preferred.
//! - **forward** (`adb forward tcp:<port> localabstract:<name>`): `adb`
//!   listens on the local port and we connect to it.  Some transports (older
//!   devices, some network connections) only support this one.
//!
//! [`Tunnel::open`] walks the configured [`PortRange`]:
//!
//! ```text
//! reverse mode, for each port:
//!   adb reverse ──fails──► stop trying reverse (not port-specific)
//!        │ ok
//!   listen on 127.0.0.1:port ──ok──► Enabled(Reverse)
//!        │ fails (port busy)
//!   adb reverse --remove, next port
//!
//! forward mode (fallback, or forced), for each port:
//!   adb forward ──ok──► Enabled(Forward)
//!        │ fails
//!   next port
//! ```
//!
//! An interruption stops both loops at once.

use std::net::TcpStream;
use std::time::Duration;

use adbtun_core::PortRange;
use socket2::Socket;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::adb::{AdbClient, AdbError};
use crate::infrastructure::interrupt::Interruptor;
use crate::infrastructure::net::{self, NetError};

/// Which way the tunnel was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelDirection {
    /// The device connects to our listening socket.
    Reverse,
    /// We connect to the port `adb` listens on.
    Forward,
}

/// Error type for tunnel operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Neither reverse nor forward mode succeeded on any port.
    #[error("could not open a tunnel on any port of {0}")]
    PortRangeExhausted(PortRange),

    #[error("tunnel negotiation interrupted")]
    Interrupted,

    /// [`Tunnel::accept`] needs an enabled reverse tunnel.
    #[error("the tunnel is not an open reverse tunnel")]
    NotReverse,

    /// [`Tunnel::connect`] needs an enabled forward tunnel.
    #[error("the tunnel is not an open forward tunnel")]
    NotForward,

    /// The forward connection closed before the device sent anything.
    #[error("the device side closed the connection without a greeting")]
    NoGreeting,

    #[error("tunnel socket error: {0}")]
    Net(#[source] NetError),
}

impl TunnelError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TunnelError::Interrupted)
    }
}

impl From<NetError> for TunnelError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Interrupted => TunnelError::Interrupted,
            other => TunnelError::Net(other),
        }
    }
}

/// An `adb` tunnel to the device socket `localabstract:<socket_name>`.
///
/// Starts disabled.  [`open`](Self::open) may only be called while disabled
/// and [`close`](Self::close) only while enabled; violating either is a bug
/// in the caller and panics.
#[derive(Debug)]
pub struct Tunnel {
    socket_name: String,
    enabled: bool,
    direction: TunnelDirection,
    /// Owned listening socket, only in reverse mode.
    server_socket: Option<Socket>,
    local_port: u16,
}

impl Tunnel {
    pub fn new(socket_name: impl Into<String>) -> Self {
        Self {
            socket_name: socket_name.into(),
            enabled: false,
            direction: TunnelDirection::Reverse,
            server_socket: None,
            local_port: 0,
        }
    }

    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Direction of the open tunnel, `None` while disabled.
    pub fn direction(&self) -> Option<TunnelDirection> {
        self.enabled.then_some(self.direction)
    }

    /// Local port of the open tunnel, `None` while disabled.
    pub fn local_port(&self) -> Option<u16> {
        self.enabled.then_some(self.local_port)
    }

    /// Sets up the tunnel on the first usable port of `range`.
    ///
    /// Tries reverse mode unless `force_forward`, then forward mode.
    ///
    /// # Errors
    ///
    /// [`TunnelError::Interrupted`] if `intr` fires at any point,
    /// [`TunnelError::PortRangeExhausted`] if no port works in either mode.
    /// The tunnel stays disabled on error.
    ///
    /// # Panics
    ///
    /// If the tunnel is already enabled.
    pub fn open(
        &mut self,
        adb: &AdbClient,
        intr: &Interruptor,
        serial: &str,
        range: PortRange,
        force_forward: bool,
    ) -> Result<(), TunnelError> {
        assert!(!self.enabled, "tunnel is already open");

        if !force_forward {
            if self.open_reverse(adb, intr, serial, range)? {
                return Ok(());
            }
            warn!("'adb reverse' failed, fallback to 'adb forward'");
        }

        self.open_forward(adb, intr, serial, range)
    }

    /// Returns `Ok(false)` when reverse mode should give way to forward mode.
    fn open_reverse(
        &mut self,
        adb: &AdbClient,
        intr: &Interruptor,
        serial: &str,
        range: PortRange,
    ) -> Result<bool, TunnelError> {
        for port in range.iter() {
            if let Err(e) = adb.reverse(intr, serial, &self.socket_name, port) {
                if e.is_interrupted() {
                    return Err(TunnelError::Interrupted);
                }
                // Not about the port: other ports would fail the same way.
                warn!("could not set up reverse tunnel: {e}");
                return Ok(false);
            }

            // At the application level the device is the server, but at the
            // network level it connects to us, so we must listen first.
            match net::listen(intr, port) {
                Ok(socket) => {
                    self.enabled = true;
                    self.direction = TunnelDirection::Reverse;
                    self.server_socket = Some(socket);
                    self.local_port = port;
                    info!("reverse tunnel open on port {port}");
                    return Ok(true);
                }
                Err(listen_err) => {
                    if let Err(e) = adb.reverse_remove(intr, serial, &self.socket_name) {
                        undo_failed("reverse", &e);
                    }
                    if intr.is_interrupted() {
                        return Err(TunnelError::Interrupted);
                    }
                    if port < range.last() {
                        warn!(
                            "could not listen on port {port} ({listen_err}), retrying on {}",
                            port + 1
                        );
                    } else if range.len() > 1 {
                        error!("could not listen on any port in range {range}");
                    } else {
                        error!("could not listen on port {port}: {listen_err}");
                    }
                }
            }
        }
        Ok(false)
    }

    fn open_forward(
        &mut self,
        adb: &AdbClient,
        intr: &Interruptor,
        serial: &str,
        range: PortRange,
    ) -> Result<(), TunnelError> {
        for port in range.iter() {
            match adb.forward(intr, serial, port, &self.socket_name) {
                Ok(()) => {
                    self.enabled = true;
                    self.direction = TunnelDirection::Forward;
                    self.server_socket = None;
                    self.local_port = port;
                    info!("forward tunnel open on port {port}");
                    return Ok(());
                }
                Err(e) if e.is_interrupted() => return Err(TunnelError::Interrupted),
                Err(e) => {
                    if intr.is_interrupted() {
                        return Err(TunnelError::Interrupted);
                    }
                    if port < range.last() {
                        warn!("could not forward port {port} ({e}), retrying on {}", port + 1);
                    }
                }
            }
        }

        if range.len() > 1 {
            error!("could not forward any port in range {range}");
        } else {
            error!("could not forward port {}", range.first());
        }
        Err(TunnelError::PortRangeExhausted(range))
    }

    /// Removes the `adb` tunnel and releases the local socket.
    ///
    /// The tunnel is disabled afterwards even if removal failed.
    ///
    /// # Errors
    ///
    /// The [`AdbError`] of the failed `--remove` command.
    ///
    /// # Panics
    ///
    /// If the tunnel is not enabled.
    pub fn close(
        &mut self,
        adb: &AdbClient,
        intr: &Interruptor,
        serial: &str,
    ) -> Result<(), AdbError> {
        assert!(self.enabled, "tunnel is not open");

        let result = match self.direction {
            TunnelDirection::Reverse => {
                let removed = adb.reverse_remove(intr, serial, &self.socket_name);
                if let Some(socket) = self.server_socket.take() {
                    net::close(socket);
                }
                removed
            }
            TunnelDirection::Forward => adb.forward_remove(intr, serial, self.local_port),
        };
        self.enabled = false;

        match &result {
            Ok(()) => debug!("tunnel on port {} closed", self.local_port),
            Err(e) => undo_failed(direction_command(self.direction), e),
        }
        result
    }

    /// Accepts the device's connection on the reverse tunnel.
    ///
    /// # Errors
    ///
    /// [`TunnelError::NotReverse`] outside reverse mode,
    /// [`TunnelError::Interrupted`] or [`TunnelError::Net`] from the socket.
    pub fn accept(&self, intr: &Interruptor) -> Result<TcpStream, TunnelError> {
        match (&self.server_socket, self.direction()) {
            (Some(socket), Some(TunnelDirection::Reverse)) => Ok(net::accept(intr, socket)?),
            _ => Err(TunnelError::NotReverse),
        }
    }

    /// Connects to the forward tunnel, trying up to `attempts` times with
    /// `delay` between attempts while the device-side service starts.
    ///
    /// `adb` accepts the local connection even when nothing listens on the
    /// device yet, and then closes it.  An attempt therefore only counts once
    /// the one-byte greeting the service sends on accept has been received.
    ///
    /// # Errors
    ///
    /// [`TunnelError::NotForward`] outside forward mode,
    /// [`TunnelError::Interrupted`] when cancelled,
    /// [`TunnelError::NoGreeting`] or [`TunnelError::Net`] when the last
    /// attempt failed.
    pub fn connect(
        &self,
        intr: &Interruptor,
        attempts: u32,
        delay: Duration,
    ) -> Result<TcpStream, TunnelError> {
        if self.direction() != Some(TunnelDirection::Forward) {
            return Err(TunnelError::NotForward);
        }

        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match connect_and_read_greeting(intr, self.local_port) {
                Ok(stream) => {
                    debug!("connected to forward tunnel after {attempt} attempt(s)");
                    return Ok(stream);
                }
                Err(TunnelError::Interrupted) => return Err(TunnelError::Interrupted),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => debug!("connection attempt {attempt}/{attempts} failed: {e}"),
            }
            if !intr.sleep(delay) {
                return Err(TunnelError::Interrupted);
            }
            attempt += 1;
        }
    }
}

fn connect_and_read_greeting(intr: &Interruptor, port: u16) -> Result<TcpStream, TunnelError> {
    let stream = net::connect(intr, port)?;
    let mut greeting = [0u8; 1];
    match net::recv(intr, &stream, &mut greeting)? {
        0 => Err(TunnelError::NoGreeting),
        _ => Ok(stream),
    }
}

fn direction_command(direction: TunnelDirection) -> &'static str {
    match direction {
        TunnelDirection::Reverse => "reverse",
        TunnelDirection::Forward => "forward",
    }
}

fn undo_failed(command: &str, e: &AdbError) {
    if e.is_interrupted() {
        debug!("'adb {command} --remove' skipped: interrupted");
    } else {
        warn!("could not remove '{command}' tunnel: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
