//! Switching a USB-attached device to TCP/IP mode and connecting to it.
//!
//! `adb tcpip <port>` restarts the device's `adbd` listening on the network.
//! The device then has to be reached by IP, which is read from its routing
//! table, and `adb connect <ip>:<port>` attaches it as a second, network
//! transport (its serial becomes `<ip>:<port>`).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::adb::{AdbClient, AdbError, TCP_PORT_PROPERTY};
use crate::infrastructure::interrupt::Interruptor;

/// Port `adbd` uses in TCP/IP mode unless told otherwise.
pub const DEFAULT_TCPIP_PORT: u16 = 5555;

/// How many times the TCP port property is polled after `adb tcpip`.
const RESTART_POLL_ATTEMPTS: u32 = 40;
const RESTART_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Error type for the TCP/IP workflow.
#[derive(Debug, Error)]
pub enum TcpIpError {
    #[error(transparent)]
    Adb(#[from] AdbError),

    /// The device has no WLAN route, so no address to connect to.
    #[error("could not find the IP address of device {serial}; is it connected to Wi-Fi?")]
    NoDeviceIp { serial: String },

    /// `adbd` did not come back listening on the requested port.
    #[error("device {serial} did not restart in TCP/IP mode on port {port}")]
    RestartTimeout { serial: String, port: u16 },

    #[error("TCP/IP switch interrupted")]
    Interrupted,
}

impl TcpIpError {
    pub fn is_interrupted(&self) -> bool {
        match self {
            TcpIpError::Interrupted => true,
            TcpIpError::Adb(e) => e.is_interrupted(),
            _ => false,
        }
    }
}

/// Runs the TCP/IP switching workflow.
pub struct TcpIpSwitcher {
    adb: Arc<AdbClient>,
    poll_interval: Duration,
}

impl TcpIpSwitcher {
    pub fn new(adb: Arc<AdbClient>) -> Self {
        Self {
            adb,
            poll_interval: RESTART_POLL_INTERVAL,
        }
    }

    /// Overrides the delay between two polls of the device's TCP port.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Puts the USB device `serial` in TCP/IP mode on `port` and returns the
    /// `ip:port` it can be connected to.
    ///
    /// Skips `adb tcpip` when the device already listens on `port`.
    ///
    /// # Errors
    ///
    /// [`TcpIpError::Adb`] when a bridge command fails,
    /// [`TcpIpError::RestartTimeout`] when `adbd` does not come back,
    /// [`TcpIpError::NoDeviceIp`] when the device has no WLAN address.
    pub fn enable_on_usb_device(
        &self,
        intr: &Interruptor,
        serial: &str,
        port: u16,
    ) -> Result<String, TcpIpError> {
        let wanted = port.to_string();
        let current = self.adb.get_property(intr, serial, TCP_PORT_PROPERTY)?;

        if current == wanted {
            info!("TCP/IP mode already enabled on port {port}");
        } else {
            info!("enabling TCP/IP mode on port {port}");
            self.adb.tcpip(intr, serial, port)?;
            self.wait_for_tcp_port(intr, serial, &wanted, port)?;
        }

        let ip = self
            .adb
            .get_device_ip(intr, serial)?
            .ok_or_else(|| TcpIpError::NoDeviceIp {
                serial: serial.to_string(),
            })?;
        Ok(format!("{ip}:{port}"))
    }

    /// Polls the TCP port property until `adbd` reports `wanted`.
    fn wait_for_tcp_port(
        &self,
        intr: &Interruptor,
        serial: &str,
        wanted: &str,
        port: u16,
    ) -> Result<(), TcpIpError> {
        for attempt in 1..=RESTART_POLL_ATTEMPTS {
            if !intr.sleep(self.poll_interval) {
                return Err(TcpIpError::Interrupted);
            }
            match self.adb.get_property(intr, serial, TCP_PORT_PROPERTY) {
                Ok(value) if value == wanted => return Ok(()),
                Ok(value) => debug!("attempt {attempt}: tcp port is {value:?}"),
                // adbd is restarting; the device may be briefly unreachable.
                Err(e) if e.is_interrupted() => return Err(TcpIpError::Interrupted),
                Err(e) => debug!("attempt {attempt}: {e}"),
            }
        }
        Err(TcpIpError::RestartTimeout {
            serial: serial.to_string(),
            port,
        })
    }

    /// Connects to a device over the network.
    ///
    /// `addr` is `ip:port`, or a bare `ip` for the default port 5555.  Any
    /// stale connection to the same address is dropped first.
    ///
    /// Returns the `ip:port` that was connected.
    ///
    /// # Errors
    ///
    /// [`TcpIpError::Adb`] when `adb connect` fails or reports a rejection.
    pub fn connect(&self, intr: &Interruptor, addr: &str) -> Result<String, TcpIpError> {
        let ip_port = with_default_port(addr);

        if let Err(e) = self.adb.disconnect(intr, &ip_port) {
            if e.is_interrupted() {
                return Err(TcpIpError::Interrupted);
            }
            debug!("adb disconnect {ip_port} failed (ignored): {e}");
        }

        match self.adb.connect(intr, &ip_port) {
            Ok(()) => {
                info!("connected to {ip_port}");
                Ok(ip_port)
            }
            Err(e) => {
                if !e.is_interrupted() {
                    warn!("could not connect to {ip_port}: {e}");
                }
                Err(e.into())
            }
        }
    }
}

/// Appends `:5555` to `addr` unless it already names a port.
pub fn with_default_port(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{DEFAULT_TCPIP_PORT}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::process::mock::{Reply, ScriptedProcessBackend};
    use crate::infrastructure::process::ProcessBackend;
    use crate::infrastructure::storage::config::BridgeConfig;

    const SERIAL: &str = "0123456789abcdef";
    const ROUTES: &str = "192.168.1.0/24 dev wlan0 proto kernel scope link src 192.168.1.23\n";

    fn switcher(backend: ScriptedProcessBackend) -> (Arc<ScriptedProcessBackend>, TcpIpSwitcher) {
        let backend = Arc::new(backend);
        let dyn_backend: Arc<dyn ProcessBackend> = Arc::clone(&backend) as Arc<dyn ProcessBackend>;
        let adb = Arc::new(AdbClient::new(dyn_backend, &BridgeConfig::default()));
        (
            backend,
            TcpIpSwitcher::new(adb).with_poll_interval(Duration::from_millis(1)),
        )
    }

    #[test]
    fn test_with_default_port() {
        assert_eq!(with_default_port("192.168.1.23"), "192.168.1.23:5555");
        assert_eq!(with_default_port("192.168.1.23:6000"), "192.168.1.23:6000");
    }

    #[test]
    fn test_enable_skips_tcpip_when_already_on_port() {
        // Arrange
        let (backend, sw) = switcher(
            ScriptedProcessBackend::new()
                .on(&["getprop"], Reply::exit(0).with_stdout("5555\n"))
                .on(&["ip", "route"], Reply::exit(0).with_stdout(ROUTES)),
        );

        // Act
        let addr = sw
            .enable_on_usb_device(&Interruptor::new(), SERIAL, 5555)
            .expect("enable");

        // Assert
        assert_eq!(addr, "192.168.1.23:5555");
        assert_eq!(backend.count(&["tcpip"]), 0);
    }

    #[test]
    fn test_enable_restarts_adbd_and_waits_for_port() {
        // Arrange: property empty, still empty once, then 5555.
        let (backend, sw) = switcher(
            ScriptedProcessBackend::new()
                .on(&["getprop"], Reply::exit(0).with_stdout("\n"))
                .on(&["getprop"], Reply::exit(0).with_stdout("\n"))
                .on(&["getprop"], Reply::exit(0).with_stdout("5555\n"))
                .on(&["ip", "route"], Reply::exit(0).with_stdout(ROUTES)),
        );

        // Act
        let addr = sw
            .enable_on_usb_device(&Interruptor::new(), SERIAL, 5555)
            .expect("enable");

        // Assert
        assert_eq!(addr, "192.168.1.23:5555");
        assert_eq!(backend.count(&["tcpip", "5555"]), 1);
        assert_eq!(backend.count(&["getprop"]), 3);
    }

    #[test]
    fn test_enable_times_out_when_port_never_changes() {
        let (_backend, sw) = switcher(
            ScriptedProcessBackend::new().on(&["getprop"], Reply::exit(0).with_stdout("\n")),
        );

        let err = sw
            .enable_on_usb_device(&Interruptor::new(), SERIAL, 5555)
            .expect_err("must fail");

        assert!(matches!(err, TcpIpError::RestartTimeout { port: 5555, .. }));
    }

    #[test]
    fn test_enable_without_wlan_route_fails() {
        let (_backend, sw) = switcher(
            ScriptedProcessBackend::new()
                .on(&["getprop"], Reply::exit(0).with_stdout("5555\n"))
                .on(
                    &["ip", "route"],
                    Reply::exit(0).with_stdout("10.0.2.0/24 dev eth0 proto kernel scope link src 10.0.2.15\n"),
                ),
        );

        let err = sw
            .enable_on_usb_device(&Interruptor::new(), SERIAL, 5555)
            .expect_err("must fail");

        assert!(matches!(err, TcpIpError::NoDeviceIp { .. }));
    }

    #[test]
    fn test_connect_disconnects_first_and_ignores_its_failure() {
        // Arrange
        let (backend, sw) = switcher(
            ScriptedProcessBackend::new()
                .on(&["disconnect"], Reply::exit(1))
                .on(
                    &["connect"],
                    Reply::exit(0).with_stdout("connected to 192.168.1.23:5555\n"),
                ),
        );

        // Act
        let addr = sw
            .connect(&Interruptor::new(), "192.168.1.23")
            .expect("connect");

        // Assert
        assert_eq!(addr, "192.168.1.23:5555");
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ["adb", "disconnect", "192.168.1.23:5555"]);
        assert_eq!(calls[1], ["adb", "connect", "192.168.1.23:5555"]);
    }

    #[test]
    fn test_connect_rejection_is_reported() {
        let (_backend, sw) = switcher(ScriptedProcessBackend::new().on(
            &["connect"],
            Reply::exit(0).with_stdout("failed to authenticate to 192.168.1.23:5555\n"),
        ));

        let err = sw
            .connect(&Interruptor::new(), "192.168.1.23:5555")
            .expect_err("must fail");

        assert!(matches!(
            err,
            TcpIpError::Adb(AdbError::ConnectRejected { .. })
        ));
    }

    #[test]
    fn test_interrupted_switch_is_flagged() {
        let (backend, sw) = switcher(ScriptedProcessBackend::new());
        let intr = Interruptor::new();
        intr.interrupt();

        let err = sw
            .enable_on_usb_device(&intr, SERIAL, 5555)
            .expect_err("must fail");

        assert!(err.is_interrupted());
        assert!(backend.calls().is_empty());
    }
}
