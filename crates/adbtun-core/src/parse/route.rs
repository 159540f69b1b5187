//! Extracts a device's WLAN IP address from on-device `ip route` output.
//!
//! One line of `ip route` looks like:
//!
//! ```text
//! 192.168.1.0/24 dev wlan0  proto kernel  scope link  src 192.168.1.23
//! ```
//!
//! The interface name is column 2, and the source address sits six columns
//! after it.  Only interfaces whose name starts with `wlan` are considered,
//! since those are the ones another machine on the LAN can reach.

use tracing::debug;

use super::columns::{index_of_column, token_at};

const SEPARATORS: &str = " \t";
const DEV_NAME_COLUMN: usize = 2;
const IP_OFFSET_FROM_DEV_NAME: usize = 6;
const WLAN_PREFIX: &str = "wlan";

/// Returns the IP address of the first `wlan*` route in `output`.
pub fn parse_device_ip(output: &str) -> Option<String> {
    output
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .find_map(parse_device_ip_from_line)
}

/// Returns the source IP of a single route line, if its interface is `wlan*`.
pub fn parse_device_ip_from_line(line: &str) -> Option<String> {
    let dev_idx = index_of_column(line, DEV_NAME_COLUMN, SEPARATORS)?;
    // Must be located relative to the device name, before any truncation.
    let ip_idx = dev_idx + index_of_column(&line[dev_idx..], IP_OFFSET_FROM_DEV_NAME, SEPARATORS)?;

    let dev_name = token_at(line, dev_idx, SEPARATORS);
    let ip = token_at(line, ip_idx, SEPARATORS);

    if !dev_name.starts_with(WLAN_PREFIX) {
        debug!("device ip lookup: ignoring {ip} ({dev_name})");
        return None;
    }
    if ip.is_empty() {
        return None;
    }

    Some(ip.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
