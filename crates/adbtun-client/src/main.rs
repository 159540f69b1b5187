//! adbtun — command-line front end.
//!
//! # Usage
//!
//! ```text
//! adbtun [--config PATH (env ADBTUN_CONFIG)] [--adb PATH] <COMMAND>
//!
//! Commands:
//!   devices   List attached devices
//!   select    Resolve one device and print its serial
//!   ip        Print the WLAN address of the selected device
//!   tunnel    Open the tunnel, wait for one connection, close it
//!   tcpip     Switch the selected USB device to TCP/IP and connect to it
//!   serialno  Print the serial of the only attached device
//!   shell     Run a shell command on the selected device
//!   init-config  Write a default config file
//! ```
//!
//! Device selection (`-s SERIAL`, `-d` for USB, `-e` for TCP/IP) falls back to
//! the `[device]` section of the config file when none is given.
//!
//! # Threads
//!
//! All bridge and socket calls block, so the work runs on a
//! `spawn_blocking` thread.  The Ctrl-C handler runs as a Tokio task and
//! calls [`Interruptor::interrupt`], which kills the running `adb` process or
//! shuts down the socket the worker is blocked on.
//!
//! The tunnel is removed even after Ctrl-C, under a second interruptor.  A
//! second Ctrl-C interrupts that teardown; a third exits immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adbtun_core::{format_device_list, DeviceSelector, DeviceType, PortRange};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use adbtun_client::application::adb::{AdbClient, AdbError};
use adbtun_client::application::select_device::{SelectDeviceError, SelectDeviceUseCase};
use adbtun_client::application::tcpip::{TcpIpError, TcpIpSwitcher, DEFAULT_TCPIP_PORT};
use adbtun_client::application::tunnel::{Tunnel, TunnelDirection, TunnelError};
use adbtun_client::infrastructure::interrupt::Interruptor;
use adbtun_client::infrastructure::storage::config::{
    self, AppConfig, BridgeConfig, ConfigError, ADB_ENV_VAR,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Device discovery and tunnel negotiation over the Android debug bridge.
#[derive(Debug, Parser)]
#[command(name = "adbtun", version)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, env = "ADBTUN_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the adb executable.  Overrides the config file and `$ADB`.
    #[arg(long, global = true)]
    adb: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List attached devices.
    Devices,

    /// Resolve one device and print its serial.
    Select(DeviceArgs),

    /// Print the WLAN address of the selected device.
    Ip(DeviceArgs),

    /// Open the tunnel, wait for one device connection, then close it.
    Tunnel {
        #[command(flatten)]
        device: DeviceArgs,

        /// Local ports to try, `first:last` or a single port.
        #[arg(long)]
        port_range: Option<PortRange>,

        /// Use `adb forward` without trying `adb reverse` first.
        #[arg(long)]
        force_forward: bool,
    },

    /// Switch the selected USB device to TCP/IP mode and connect to it.
    Tcpip {
        #[command(flatten)]
        device: DeviceArgs,

        /// Port adbd should listen on.
        #[arg(long, default_value_t = DEFAULT_TCPIP_PORT)]
        port: u16,
    },

    /// Print the serial of the only attached device (`adb get-serialno`).
    Serialno,

    /// Run a shell command on the selected device.
    Shell {
        #[command(flatten)]
        device: DeviceArgs,

        /// Command and arguments, after `--`.
        #[arg(required = true, last = true)]
        args: Vec<String>,
    },

    /// Write a config file with default values.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Default, Args)]
struct DeviceArgs {
    /// Serial of the device; an IP alone matches any port.
    #[arg(short, long, conflicts_with_all = ["usb", "tcpip"])]
    serial: Option<String>,

    /// Only consider USB devices.
    #[arg(short = 'd', long = "select-usb", conflicts_with = "tcpip")]
    usb: bool,

    /// Only consider TCP/IP devices (and emulators).
    #[arg(short = 'e', long = "select-tcpip")]
    tcpip: bool,
}

impl DeviceArgs {
    /// The selector given on the command line, else the configured one.
    fn selector(&self, config: &AppConfig) -> Result<DeviceSelector, ConfigError> {
        if let Some(serial) = &self.serial {
            Ok(DeviceSelector::BySerial(serial.clone()))
        } else if self.usb {
            Ok(DeviceSelector::ByUsb)
        } else if self.tcpip {
            Ok(DeviceSelector::ByTcpIp)
        } else {
            config.selector()
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    // Log level comes from the config file; `RUST_LOG` overrides it.
    let level = loaded
        .as_ref()
        .map(|c| c.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    if let Command::InitConfig { force } = cli.command {
        return init_config(cli.config.as_deref(), cli.adb, force);
    }

    let config = loaded.context("could not load configuration")?;
    let bridge = match &cli.adb {
        Some(path) => BridgeConfig::new(path.clone()),
        None => config.bridge(),
    };
    debug!("using adb executable: {}", bridge.executable);

    let adb = Arc::new(AdbClient::native(&bridge));
    let interrupts = Arc::new(Interrupts::default());

    let signal_interrupts = Arc::clone(&interrupts);
    tokio::spawn(async move {
        let mut received = 0;
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for Ctrl+C signal: {e}");
                return;
            }
            received += 1;
            if !signal_interrupts.escalate(received) {
                std::process::exit(130);
            }
        }
    });

    let command = cli.command;
    let result = tokio::task::spawn_blocking(move || run(command, &config, &adb, &interrupts))
        .await
        .context("worker thread panicked")?;

    match result {
        Err(e) if is_interrupted(&e) => {
            info!("interrupted");
            Ok(())
        }
        Err(e) if is_missing_binary(&e) => Err(e.context(format!(
            "adb executable '{}' not found; pass --adb PATH or set ${ADB_ENV_VAR}",
            bridge.executable
        ))),
        other => other,
    }
}

/// Cancellation tokens for one run: the command itself, and the cleanup
/// that follows it.
#[derive(Debug, Default)]
struct Interrupts {
    work: Interruptor,
    teardown: Interruptor,
}

impl Interrupts {
    /// Reacts to the `received`-th Ctrl-C.  Returns `false` when nothing is
    /// left to interrupt and the process should exit.
    fn escalate(&self, received: usize) -> bool {
        match received {
            1 => {
                info!("received Ctrl+C, interrupting");
                self.work.interrupt();
                true
            }
            2 => {
                warn!("received Ctrl+C again, abandoning cleanup");
                self.teardown.interrupt();
                true
            }
            _ => false,
        }
    }
}

fn is_missing_binary(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<AdbError>()
            .is_some_and(AdbError::is_missing_binary)
            || matches!(
                cause.downcast_ref::<TcpIpError>(),
                Some(TcpIpError::Adb(adb)) if adb.is_missing_binary()
            )
    })
}

fn init_config(path: Option<&Path>, adb: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::config_file_path()?,
    };
    if path.exists() && !force {
        bail!("{} already exists; use --force to overwrite it", path.display());
    }
    let mut defaults = AppConfig::default();
    defaults.bridge.executable = adb;
    config::save_config_to(&defaults, &path)
        .with_context(|| format!("could not write {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}

fn is_interrupted(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<AdbError>()
            .is_some_and(AdbError::is_interrupted)
            || cause
                .downcast_ref::<SelectDeviceError>()
                .is_some_and(SelectDeviceError::is_interrupted)
            || cause
                .downcast_ref::<TunnelError>()
                .is_some_and(TunnelError::is_interrupted)
            || cause
                .downcast_ref::<TcpIpError>()
                .is_some_and(TcpIpError::is_interrupted)
    })
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn run(
    command: Command,
    config: &AppConfig,
    adb: &Arc<AdbClient>,
    interrupts: &Interrupts,
) -> anyhow::Result<()> {
    let intr = &interrupts.work;
    match command {
        Command::Devices => list_devices(adb, intr),
        Command::Select(device) => {
            let selected = select(adb, intr, &device.selector(config)?)?;
            println!("{}", selected.serial);
            Ok(())
        }
        Command::Ip(device) => {
            let selected = select(adb, intr, &device.selector(config)?)?;
            match adb.get_device_ip(intr, &selected.serial)? {
                Some(ip) => {
                    println!("{ip}");
                    Ok(())
                }
                None => bail!("device {} has no WLAN address", selected.serial),
            }
        }
        Command::Tunnel {
            device,
            port_range,
            force_forward,
        } => {
            let range = match port_range {
                Some(range) => range,
                None => config.tunnel.port_range()?,
            };
            let selected = select(adb, intr, &device.selector(config)?)?;
            tunnel(
                adb,
                interrupts,
                config,
                &selected.serial,
                range,
                force_forward || config.tunnel.force_forward,
            )
        }
        Command::Tcpip { device, port } => {
            let selected = select(adb, intr, &device.selector(config)?)?;
            if selected.device_type() != DeviceType::Usb {
                println!("{}", selected.serial);
                info!("{} is not a USB device, nothing to switch", selected.serial);
                return Ok(());
            }
            let switcher = TcpIpSwitcher::new(Arc::clone(adb));
            let addr = switcher.enable_on_usb_device(intr, &selected.serial, port)?;
            let connected = switcher.connect(intr, &addr)?;
            println!("{connected}");
            Ok(())
        }
        Command::Serialno => {
            println!("{}", adb.get_serialno(intr)?);
            Ok(())
        }
        Command::Shell { device, args } => {
            let selected = select(adb, intr, &device.selector(config)?)?;
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            adb.shell(intr, &selected.serial, &args)?;
            Ok(())
        }
        Command::InitConfig { .. } => bail!("init-config runs before the configuration is loaded"),
    }
}

fn select(
    adb: &Arc<AdbClient>,
    intr: &Interruptor,
    selector: &DeviceSelector,
) -> anyhow::Result<adbtun_core::Device> {
    let device = SelectDeviceUseCase::new(Arc::clone(adb)).execute(intr, selector)?;
    Ok(device)
}

fn list_devices(adb: &AdbClient, intr: &Interruptor) -> anyhow::Result<()> {
    let devices = adb.list_devices(intr)?;
    if devices.is_empty() {
        eprintln!("no devices attached");
    }
    for line in format_device_list(&devices) {
        println!("{line}");
    }
    Ok(())
}

fn tunnel(
    adb: &AdbClient,
    interrupts: &Interrupts,
    config: &AppConfig,
    serial: &str,
    range: PortRange,
    force_forward: bool,
) -> anyhow::Result<()> {
    let intr = &interrupts.work;
    let mut tunnel = Tunnel::new(config.tunnel.socket_name.clone());
    tunnel.open(adb, intr, serial, range, force_forward)?;

    let (direction, port) = match (tunnel.direction(), tunnel.local_port()) {
        (Some(direction), Some(port)) => (direction, port),
        _ => bail!("tunnel reported open without a port"),
    };
    println!(
        "tunnel open ({direction:?}) between 127.0.0.1:{port} and localabstract:{}",
        tunnel.socket_name()
    );

    let connection = match direction {
        TunnelDirection::Reverse => tunnel.accept(intr),
        TunnelDirection::Forward => tunnel.connect(
            intr,
            config.tunnel.connect_attempts,
            config.tunnel.connect_retry_delay(),
        ),
    };
    if let Ok(stream) = &connection {
        match stream.peer_addr() {
            Ok(peer) => println!("device connected from {peer}"),
            Err(_) => println!("device connected"),
        }
    }

    // Runs even after Ctrl-C, so it has its own interruptor.
    if let Err(e) = tunnel.close(adb, &interrupts.teardown, serial) {
        error!("could not remove the tunnel: {e}");
    }

    connection.context("waiting for the device connection")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use adbtun_client::infrastructure::process::SpawnError;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tunnel_arguments_parse() {
        // Arrange / Act
        let cli = Cli::parse_from([
            "adbtun",
            "tunnel",
            "-s",
            "0123",
            "--port-range",
            "27183:27185",
            "--force-forward",
        ]);

        // Assert
        match cli.command {
            Command::Tunnel {
                device,
                port_range,
                force_forward,
            } => {
                assert_eq!(device.serial.as_deref(), Some("0123"));
                assert_eq!(port_range, Some(PortRange::new(27183, 27185).expect("range")));
                assert!(force_forward);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_options_parse_after_subcommand() {
        let cli = Cli::parse_from(["adbtun", "devices", "--adb", "/opt/adb", "--config", "c.toml"]);
        assert_eq!(cli.adb.as_deref(), Some("/opt/adb"));
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn test_inverted_port_range_is_rejected() {
        let result = Cli::try_parse_from(["adbtun", "tunnel", "--port-range", "27199:27183"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_conflicting_device_options_are_rejected() {
        assert!(Cli::try_parse_from(["adbtun", "select", "-d", "-e"]).is_err());
        assert!(Cli::try_parse_from(["adbtun", "select", "-s", "0123", "-d"]).is_err());
    }

    #[test]
    fn test_tcpip_port_defaults_to_5555() {
        let cli = Cli::parse_from(["adbtun", "tcpip"]);
        assert!(matches!(cli.command, Command::Tcpip { port: 5555, .. }));
    }

    #[test]
    fn test_device_args_take_precedence_over_config() {
        // Arrange
        let mut config = AppConfig::default();
        config.device.select_tcpip = true;
        let usb = DeviceArgs {
            usb: true,
            ..DeviceArgs::default()
        };

        // Act / Assert
        assert_eq!(usb.selector(&config).expect("usb"), DeviceSelector::ByUsb);
        assert_eq!(
            DeviceArgs::default().selector(&config).expect("config"),
            DeviceSelector::ByTcpIp
        );
    }

    #[test]
    fn test_interrupted_errors_are_recognised_through_context() {
        let err = anyhow::Error::new(TunnelError::Interrupted).context("opening tunnel");
        assert!(is_interrupted(&err));
        let err = anyhow::Error::new(AdbError::NonZeroExit {
            command: "reverse",
            code: 1,
        });
        assert!(!is_interrupted(&err));
    }

    #[test]
    fn test_first_ctrl_c_interrupts_work_only() {
        // Arrange
        let interrupts = Interrupts::default();

        // Act
        let keep_running = interrupts.escalate(1);

        // Assert
        assert!(keep_running);
        assert!(interrupts.work.is_interrupted());
        assert!(!interrupts.teardown.is_interrupted());
    }

    #[test]
    fn test_second_ctrl_c_interrupts_teardown_and_third_exits() {
        // Arrange
        let interrupts = Interrupts::default();
        interrupts.escalate(1);

        // Act / Assert
        assert!(interrupts.escalate(2));
        assert!(interrupts.teardown.is_interrupted());
        assert!(!interrupts.escalate(3));
    }

    #[test]
    fn test_missing_binary_is_recognised_through_context() {
        let missing = AdbError::Spawn {
            command: "devices",
            source: SpawnError::MissingBinary {
                program: "adb".to_string(),
            },
        };
        let err = anyhow::Error::new(SelectDeviceError::Adb(missing)).context("selecting device");
        assert!(is_missing_binary(&err));
        assert!(!is_missing_binary(&anyhow::Error::new(TunnelError::Interrupted)));
    }

    #[test]
    fn test_shell_arguments_follow_double_dash() {
        // Arrange / Act
        let cli = Cli::parse_from(["adbtun", "shell", "-s", "0123", "--", "ls", "-l", "/sdcard"]);

        // Assert
        match cli.command {
            Command::Shell { device, args } => {
                assert_eq!(device.serial.as_deref(), Some("0123"));
                assert_eq!(args, ["ls", "-l", "/sdcard"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_shell_without_command_is_rejected() {
        assert!(Cli::try_parse_from(["adbtun", "shell"]).is_err());
    }

    #[test]
    fn test_serialno_and_init_config_parse() {
        assert!(matches!(
            Cli::parse_from(["adbtun", "serialno"]).command,
            Command::Serialno
        ));
        assert!(matches!(
            Cli::parse_from(["adbtun", "init-config", "--force"]).command,
            Command::InitConfig { force: true }
        ));
    }

    #[test]
    fn test_init_config_writes_defaults_and_refuses_to_overwrite() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("adbtun-init-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = std::fs::remove_dir_all(&dir);

        // Act
        init_config(Some(&path), Some("/opt/adb".to_string()), false).expect("first write");
        let second = init_config(Some(&path), None, false);
        let forced = init_config(Some(&path), None, true);

        // Assert
        assert!(second.is_err());
        assert!(forced.is_ok());
        let written = config::load_config_from(&path).expect("load");
        assert_eq!(written.bridge.executable, None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
