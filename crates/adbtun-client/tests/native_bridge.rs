//! End-to-end tests of the bridge client over real processes.
//!
//! A small shell script stands in for `adb`: it prints canned output
//! depending on its arguments, which exercises spawning, pipe capture, exit
//! codes, and interruption through the native process backend.
//!
//! The tests take a shared lock: executing a script while another thread of
//! the same process forks can fail with `ETXTBSY`.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use adbtun_client::application::adb::{AdbClient, AdbError};
use adbtun_client::application::select_device::SelectDeviceUseCase;
use adbtun_client::infrastructure::interrupt::Interruptor;
use adbtun_client::infrastructure::storage::config::BridgeConfig;
use adbtun_core::DeviceSelector;

const FAKE_ADB: &str = r#"#!/bin/sh
if [ "$1" = "-s" ]; then shift 2; fi
case "$1" in
  devices)
    echo "* daemon not running; starting now at tcp:5037"
    echo "* daemon started successfully"
    echo "List of devices attached"
    echo "0123456789abcdef       device usb:1-4 product:panther model:Pixel_7 device:panther"
    echo "192.168.1.5:5555       device product:oriole model:Pixel_6 device:oriole"
    ;;
  connect)
    case "$2" in
      192.168.1.5:5555) echo "connected to $2" ;;
      *) echo "failed to connect to '$2': Connection refused" ;;
    esac
    ;;
  reverse) exit 1 ;;
  push) sleep 30 ;;
  *) ;;
esac
"#;

static EXCLUSIVE: Mutex<()> = Mutex::new(());

fn exclusive() -> MutexGuard<'static, ()> {
    EXCLUSIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FakeAdb {
    dir: PathBuf,
    path: PathBuf,
}

impl FakeAdb {
    fn install(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("adbtun-fake-adb-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("adb");
        fs::write(&path, FAKE_ADB).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        Self { dir, path }
    }

    fn client(&self) -> AdbClient {
        AdbClient::native(&BridgeConfig::new(self.path.to_string_lossy().into_owned()))
    }
}

impl Drop for FakeAdb {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

#[test]
fn test_native_list_devices_and_select() {
    let _guard = exclusive();
    // Arrange
    let fake = FakeAdb::install("select");
    let uc = SelectDeviceUseCase::new(Arc::new(fake.client()));

    // Act
    let device = uc
        .execute(&Interruptor::new(), &DeviceSelector::ByTcpIp)
        .expect("select");

    // Assert
    assert_eq!(device.serial, "192.168.1.5:5555");
    assert_eq!(device.model.as_deref(), Some("Pixel_6"));
}

#[test]
fn test_native_connect_uses_output_prefix() {
    let _guard = exclusive();
    let fake = FakeAdb::install("connect");
    let adb = fake.client();
    let intr = Interruptor::new();

    adb.connect(&intr, "192.168.1.5:5555").expect("connect");
    let err = adb.connect(&intr, "10.0.0.9:5555").expect_err("must fail");

    match err {
        AdbError::ConnectRejected { detail, .. } => {
            assert_eq!(detail, "failed to connect to '10.0.0.9:5555': Connection refused");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_native_nonzero_exit_is_reported() {
    let _guard = exclusive();
    let fake = FakeAdb::install("exit");
    let err = fake
        .client()
        .reverse(&Interruptor::new(), "0123456789abcdef", "adbtun", 27183)
        .expect_err("must fail");
    assert!(matches!(
        err,
        AdbError::NonZeroExit {
            command: "reverse",
            code: 1
        }
    ));
}

#[test]
fn test_native_missing_executable() {
    let _guard = exclusive();
    let adb = AdbClient::native(&BridgeConfig::new("/nonexistent/adbtun/adb"));
    let err = adb
        .list_devices(&Interruptor::new())
        .expect_err("must fail");
    assert!(err.is_missing_binary());
}

#[test]
fn test_native_interrupt_kills_long_running_command() {
    let _guard = exclusive();
    // Arrange
    let fake = FakeAdb::install("interrupt");
    let adb = fake.client();
    let intr = Arc::new(Interruptor::new());
    let canceller = {
        let intr = Arc::clone(&intr);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            intr.interrupt();
        })
    };

    // Act
    let start = Instant::now();
    let result = adb.push(&intr, "0123456789abcdef", "big.bin", "/sdcard/");
    canceller.join().expect("join");

    // Assert
    assert!(result.expect_err("must fail").is_interrupted());
    assert!(start.elapsed() < Duration::from_secs(10));
}
