//! Parser for the output of `adb devices -l`.
//!
//! # Output format
//!
//! ```text
//! * daemon not running; starting now at tcp:5037
//! * daemon started successfully
//! List of devices attached
//! 0123456789abcdef       device usb:2-1 product:bullhead model:Nexus_5X device:bullhead transport_id:1
//! 192.168.1.5:5555       device product:sailfish model:Pixel device:sailfish transport_id:2
//! emulator-5554          offline transport_id:3
//! ```
//!
//! - Everything before the `List of devices attached` header is daemon
//!   start-up chatter and is ignored.
//! - Plain `adb devices` separates serial and state with a tab; `adb devices -l`
//!   uses a run of spaces.  Both are accepted.
//! - After the state come zero or more `key:value` properties.  Only `model:`
//!   is kept.
//! - Lines that do not fit the format are skipped, never fatal.

use tracing::debug;

use super::columns::{index_of_column, token_at};
use crate::domain::device::Device;

/// First line of the actual device table.
pub const DEVICES_HEADER: &str = "List of devices attached";

const SEPARATORS: &str = " \t";
const MODEL_PREFIX: &str = "model:";

/// Parses a full `adb devices -l` output into device records, in encounter order.
///
/// Returns an empty list when the header is missing.
pub fn parse_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    let mut header_found = false;

    for raw_line in output.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if !header_found {
            header_found = line.starts_with(DEVICES_HEADER);
            continue;
        }

        if let Some(device) = parse_device_line(line) {
            devices.push(device);
        }
    }

    devices
}

/// Parses one device line; returns `None` for blank, chatter, or malformed lines.
pub fn parse_device_line(line: &str) -> Option<Device> {
    if line.is_empty() {
        return None;
    }
    if line.starts_with('*') || line.starts_with("adb server") {
        // "* daemon started successfully", "adb server version (41) doesn't match..."
        debug!("skipping adb chatter: {line}");
        return None;
    }

    let serial = token_at(line, 0, SEPARATORS);
    if serial.is_empty() {
        debug!("skipping device line with empty serial: {line:?}");
        return None;
    }

    let state_idx = index_of_column(line, 1, SEPARATORS)?;
    let state = token_at(line, state_idx, SEPARATORS);
    if state.is_empty() {
        debug!("skipping device line without state: {line:?}");
        return None;
    }

    let rest = &line[state_idx + state.len()..];
    let model = rest
        .split(|c: char| SEPARATORS.contains(c))
        .find_map(|token| token.strip_prefix(MODEL_PREFIX))
        .map(str::to_string);

    Some(Device::new(serial, state, model))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
