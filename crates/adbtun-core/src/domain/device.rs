//! Device records, connection-type classification, and device selection.
//!
//! # How does device selection work? (for beginners)
//!
//! `adb devices -l` prints one line per device the bridge knows about:
//!
//! ```text
//! List of devices attached
//! 0123456789abcdef       device usb:2-1 product:bullhead model:Nexus_5X device:bullhead
//! 192.168.1.5:5555       device product:sailfish model:Pixel device:sailfish
//! emulator-5554          unauthorized
//! ```
//!
//! The user rarely wants "all of them"; they want *one* device to mirror.
//! A [`DeviceSelector`] describes which one (by serial, "the USB one",
//! "the network one", or "whatever is there").  [`select_device`] applies the
//! selector to the parsed listing and succeeds only if exactly one device
//! matches **and** that device is in the `device` (ready) state.
//!
//! Every failure carries enough information to tell the user what went wrong
//! and what to try next: which selector failed, which devices exist, or which
//! device needs attention.

use std::fmt;

use thiserror::Error;

/// State string reported by `adb` for a device that is ready to use.
pub const STATE_DEVICE: &str = "device";

/// State string reported by `adb` for a device that has not yet accepted the
/// host's RSA key.
pub const STATE_UNAUTHORIZED: &str = "unauthorized";

const EMULATOR_PREFIX: &str = "emulator-";

/// One entry of a device listing snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Serial number, unique within one listing.
    ///
    /// USB devices use the hardware serial (`0123456789abcdef`), network
    /// devices use `ip:port` (`192.168.1.5:5555`), and emulators use
    /// `emulator-<port>`.
    pub serial: String,
    /// Connection state as printed by `adb` (`device`, `unauthorized`,
    /// `offline`, ...).
    pub state: String,
    /// Value of the `model:` property, when the listing includes it.
    pub model: Option<String>,
    /// Scratch flag recomputed by every [`select_device`] pass.
    pub selected: bool,
}

impl Device {
    /// Creates an unselected device record.
    pub fn new(serial: impl Into<String>, state: impl Into<String>, model: Option<String>) -> Self {
        Self {
            serial: serial.into(),
            state: state.into(),
            model,
            selected: false,
        }
    }

    /// Classifies the device from the shape of its serial.
    pub fn device_type(&self) -> DeviceType {
        DeviceType::from_serial(&self.serial)
    }

    /// Returns `true` when the device reports the `device` state.
    pub fn is_ready(&self) -> bool {
        self.state == STATE_DEVICE
    }
}

/// How a device is attached to the host.  Derived from the serial, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// An Android emulator (`emulator-5554`).
    Emulator,
    /// A device plugged in over USB.
    Usb,
    /// A device reached over the network (`ip:port`).
    TcpIp,
}

impl DeviceType {
    /// Applies the classification rule:
    /// `emulator-` prefix ⇒ emulator, contains `':'` ⇒ TCP/IP, else USB.
    pub fn from_serial(serial: &str) -> Self {
        if serial.starts_with(EMULATOR_PREFIX) {
            DeviceType::Emulator
        } else if serial.contains(':') {
            DeviceType::TcpIp
        } else {
            DeviceType::Usb
        }
    }

    /// Short label used in device listings.
    pub fn label(self) -> &'static str {
        match self {
            DeviceType::Emulator => "emulator",
            DeviceType::Usb => "usb",
            DeviceType::TcpIp => "tcpip",
        }
    }
}

/// Which device the caller wants to target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// Accept any device.
    #[default]
    All,
    /// Accept the device with this serial.  An IP-only serial also matches any
    /// port on that IP.
    BySerial(String),
    /// Accept USB devices only.
    ByUsb,
    /// Accept network devices and emulators.
    ByTcpIp,
}

impl DeviceSelector {
    /// Returns `true` if `device` satisfies this selector.
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            DeviceSelector::All => true,
            DeviceSelector::BySerial(serial) => serial_matches(&device.serial, serial),
            DeviceSelector::ByUsb => device.device_type() == DeviceType::Usb,
            DeviceSelector::ByTcpIp => device.device_type() != DeviceType::Usb,
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::All => write!(f, "any device"),
            DeviceSelector::BySerial(serial) => write!(f, "serial {serial}"),
            DeviceSelector::ByUsb => write!(f, "USB"),
            DeviceSelector::ByTcpIp => write!(f, "TCP/IP"),
        }
    }
}

/// Exact match, or IP-only selector against an `ip:port` serial.
fn serial_matches(device_serial: &str, wanted: &str) -> bool {
    if device_serial == wanted {
        return true;
    }
    if wanted.contains(':') {
        return false;
    }
    match device_serial.split_once(':') {
        Some((host, _port)) => host == wanted,
        None => false,
    }
}

/// Why [`select_device`] could not produce a usable device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    /// No device satisfied the selector.
    #[error("could not find any ADB device matching {selector} (available: {})", serial_list(.devices))]
    NotFound {
        selector: DeviceSelector,
        /// Every device of the listing, for diagnostics.
        devices: Vec<Device>,
    },

    /// More than one device satisfied the selector.
    #[error(
        "multiple ({}) ADB devices match {selector}: {}; select a device by serial, USB only, or TCP/IP only",
        .matches.len(),
        serial_list(.matches)
    )]
    Ambiguous {
        selector: DeviceSelector,
        /// The matching devices.
        matches: Vec<Device>,
    },

    /// Exactly one match, but the device has not authorized this host.
    #[error("device {serial} is unauthorized; accept the USB debugging prompt on the device screen, then retry")]
    Unauthorized { serial: String },

    /// Exactly one match, in a state other than `device`.
    #[error("device {serial} could not be connected (state={state})")]
    BadState { serial: String, state: String },
}

fn serial_list(devices: &[Device]) -> String {
    if devices.is_empty() {
        return "none".to_string();
    }
    devices
        .iter()
        .map(|d| d.serial.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves `selector` against one listing snapshot.
///
/// Recomputes the `selected` flag of every device in `devices` (so callers can
/// log the listing with the matches marked), then:
///
/// - zero matches ⇒ [`SelectionError::NotFound`];
/// - two or more matches ⇒ [`SelectionError::Ambiguous`];
/// - exactly one match whose state is not `device` ⇒
///   [`SelectionError::Unauthorized`] or [`SelectionError::BadState`];
/// - otherwise the matching record is removed from `devices` and returned.
///
/// # Errors
///
/// See the list above.
pub fn select_device(
    devices: &mut Vec<Device>,
    selector: &DeviceSelector,
) -> Result<Device, SelectionError> {
    let mut match_count = 0usize;
    let mut first_match = None;
    for (index, device) in devices.iter_mut().enumerate() {
        device.selected = selector.matches(device);
        if device.selected {
            match_count += 1;
            first_match.get_or_insert(index);
        }
    }

    let index = match (match_count, first_match) {
        (1, Some(index)) => index,
        (0, _) | (_, None) => {
            return Err(SelectionError::NotFound {
                selector: selector.clone(),
                devices: devices.clone(),
            });
        }
        _ => {
            return Err(SelectionError::Ambiguous {
                selector: selector.clone(),
                matches: devices.iter().filter(|d| d.selected).cloned().collect(),
            });
        }
    };

    let device = &devices[index];
    if device.state == STATE_UNAUTHORIZED {
        return Err(SelectionError::Unauthorized {
            serial: device.serial.clone(),
        });
    }
    if !device.is_ready() {
        return Err(SelectionError::BadState {
            serial: device.serial.clone(),
            state: device.state.clone(),
        });
    }

    Ok(devices.remove(index))
}

/// Renders a listing as aligned text lines, marking selected devices.
///
/// ```text
///     -->   (usb)  0123456789abcdef      device  Nexus_5X
///         (tcpip)  192.168.1.5:5555      device  Pixel
/// ```
pub fn format_device_list(devices: &[Device]) -> Vec<String> {
    devices
        .iter()
        .map(|d| {
            let marker = if d.selected { "-->" } else { "   " };
            let label = format!("({})", d.device_type().label());
            format!(
                "    {marker} {label:>10}  {:<20}  {:>12}  {}",
                d.serial,
                d.state,
                d.model.as_deref().unwrap_or("")
            )
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(serial: &str) -> Device {
        Device::new(serial, STATE_DEVICE, None)
    }

    // ── Classification ────────────────────────────────────────────────────────

    #[test]
    fn test_device_type_emulator_prefix_is_emulator() {
        assert_eq!(DeviceType::from_serial("emulator-5554"), DeviceType::Emulator);
    }

    #[test]
    fn test_device_type_serial_with_colon_is_tcpip() {
        assert_eq!(DeviceType::from_serial("192.168.1.5:5555"), DeviceType::TcpIp);
    }

    #[test]
    fn test_device_type_plain_serial_is_usb() {
        assert_eq!(DeviceType::from_serial("0123456789abcdef"), DeviceType::Usb);
    }

    // ── Selector predicates ───────────────────────────────────────────────────

    #[test]
    fn test_by_serial_ip_only_matches_any_port_on_that_ip() {
        // Arrange
        let selector = DeviceSelector::BySerial("192.168.1.5".to_string());

        // Act / Assert
        assert!(selector.matches(&ready("192.168.1.5:5555")));
        assert!(selector.matches(&ready("192.168.1.5:40000")));
    }

    #[test]
    fn test_by_serial_ip_only_does_not_match_longer_ip() {
        let selector = DeviceSelector::BySerial("192.168.1.5".to_string());
        assert!(!selector.matches(&ready("192.168.1.50:5555")));
    }

    #[test]
    fn test_by_serial_with_port_requires_exact_match() {
        let selector = DeviceSelector::BySerial("192.168.1.5:5555".to_string());
        assert!(selector.matches(&ready("192.168.1.5:5555")));
        assert!(!selector.matches(&ready("192.168.1.5:5556")));
    }

    #[test]
    fn test_by_serial_usb_serial_requires_exact_match() {
        let selector = DeviceSelector::BySerial("0123".to_string());
        assert!(selector.matches(&ready("0123")));
        assert!(!selector.matches(&ready("01234")));
    }

    #[test]
    fn test_by_usb_rejects_emulator_and_network_devices() {
        let selector = DeviceSelector::ByUsb;
        assert!(selector.matches(&ready("0123456789abcdef")));
        assert!(!selector.matches(&ready("emulator-5554")));
        assert!(!selector.matches(&ready("10.0.0.2:5555")));
    }

    #[test]
    fn test_by_tcpip_accepts_emulator_and_network_devices() {
        let selector = DeviceSelector::ByTcpIp;
        assert!(!selector.matches(&ready("0123456789abcdef")));
        assert!(selector.matches(&ready("emulator-5554")));
        assert!(selector.matches(&ready("10.0.0.2:5555")));
    }

    // ── Resolution ────────────────────────────────────────────────────────────

    #[test]
    fn test_select_device_zero_matches_returns_not_found_with_listing() {
        // Arrange
        let mut devices = vec![ready("aaa"), ready("bbb")];

        // Act
        let err = select_device(&mut devices, &DeviceSelector::BySerial("ccc".into()))
            .expect_err("must fail");

        // Assert
        match &err {
            SelectionError::NotFound { devices, .. } => assert_eq!(devices.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("serial ccc"));
        assert!(message.contains("aaa, bbb"));
    }

    #[test]
    fn test_select_device_empty_listing_returns_not_found() {
        let mut devices = Vec::new();
        let err = select_device(&mut devices, &DeviceSelector::All).expect_err("must fail");
        assert!(matches!(err, SelectionError::NotFound { .. }));
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_select_device_single_ready_match_is_moved_out() {
        // Arrange
        let mut devices = vec![ready("0123"), ready("10.0.0.2:5555")];

        // Act
        let device = select_device(&mut devices, &DeviceSelector::ByUsb).expect("select");

        // Assert
        assert_eq!(device.serial, "0123");
        assert!(device.selected);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "10.0.0.2:5555");
    }

    #[test]
    fn test_select_device_unauthorized_match_returns_unauthorized() {
        let mut devices = vec![Device::new("0123", STATE_UNAUTHORIZED, None)];
        let err = select_device(&mut devices, &DeviceSelector::All).expect_err("must fail");
        assert_eq!(
            err,
            SelectionError::Unauthorized {
                serial: "0123".to_string()
            }
        );
    }

    #[test]
    fn test_select_device_offline_match_returns_bad_state() {
        let mut devices = vec![Device::new("0123", "offline", None)];
        let err = select_device(&mut devices, &DeviceSelector::All).expect_err("must fail");
        assert!(matches!(err, SelectionError::BadState { ref state, .. } if state == "offline"));
        assert!(err.to_string().contains("could not be connected"));
    }

    #[test]
    fn test_select_device_two_matches_returns_ambiguous() {
        // Arrange
        let mut devices = vec![ready("0123"), ready("4567"), ready("10.0.0.2:5555")];

        // Act
        let err = select_device(&mut devices, &DeviceSelector::ByUsb).expect_err("must fail");

        // Assert
        match err {
            SelectionError::Ambiguous { matches, .. } => {
                let serials: Vec<_> = matches.iter().map(|d| d.serial.as_str()).collect();
                assert_eq!(serials, vec!["0123", "4567"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_select_device_ambiguity_ignores_non_ready_state() {
        // Two matches are ambiguous even if one of them is offline.
        let mut devices = vec![ready("0123"), Device::new("4567", "offline", None)];
        let err = select_device(&mut devices, &DeviceSelector::All).expect_err("must fail");
        assert!(matches!(err, SelectionError::Ambiguous { .. }));
    }

    #[test]
    fn test_select_device_recomputes_selected_flags_each_pass() {
        // Arrange
        let mut devices = vec![ready("0123"), ready("10.0.0.2:5555"), ready("emulator-5554")];

        // Act – first pass marks the two TCP/IP-like devices (ambiguous, nothing removed)
        let _ = select_device(&mut devices, &DeviceSelector::ByTcpIp);
        let first: Vec<bool> = devices.iter().map(|d| d.selected).collect();
        // second pass matches nothing and must clear the stale flags
        let _ = select_device(&mut devices, &DeviceSelector::BySerial("zzz".into()));
        let second: Vec<bool> = devices.iter().map(|d| d.selected).collect();

        // Assert
        assert_eq!(first, vec![false, true, true]);
        assert_eq!(second, vec![false, false, false]);
    }

    // ── Listing format ────────────────────────────────────────────────────────

    #[test]
    fn test_format_device_list_marks_selected_device() {
        let mut a = Device::new("0123", STATE_DEVICE, Some("Pixel_7".into()));
        a.selected = true;
        let b = ready("10.0.0.2:5555");

        let lines = format_device_list(&[a, b]);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("-->"));
        assert!(lines[0].contains("(usb)"));
        assert!(lines[0].contains("Pixel_7"));
        assert!(!lines[1].contains("-->"));
        assert!(lines[1].contains("(tcpip)"));
    }

    #[test]
    fn test_selector_display_names_the_criterion() {
        assert_eq!(DeviceSelector::All.to_string(), "any device");
        assert_eq!(DeviceSelector::BySerial("x".into()).to_string(), "serial x");
        assert_eq!(DeviceSelector::ByUsb.to_string(), "USB");
        assert_eq!(DeviceSelector::ByTcpIp.to_string(), "TCP/IP");
    }
}
