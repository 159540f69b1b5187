//! # adbtun-core
//!
//! Shared library for adbtun containing the device model, the device selection
//! rules, and the parsers for the text printed by the Android debug bridge
//! (`adb`).
//!
//! It has zero dependencies on OS APIs, processes, or network sockets: every
//! function here takes a string (or a list of records) and returns a value.
//!
//! # Architecture overview (for beginners)
//!
//! adbtun is the device-connectivity layer of a screen-mirroring client.  It
//! finds an Android device through the external `adb` tool, picks the one the
//! user asked for, and opens a tunnel so that a streaming protocol can run over
//! a plain TCP socket.
//!
//! This crate (`adbtun-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure business rules.  A [`Device`] is one line of the
//!   `adb devices -l` listing; a [`DeviceSelector`] describes which device the
//!   user wants; [`select_device`] resolves the selector to exactly one device
//!   or explains why it could not.  [`PortRange`] is the inclusive range of
//!   local ports the tunnel may use.
//!
//! - **`parse`** – Text parsers for bridge output: the device listing, the
//!   on-device `ip route` table, a positional column finder shared by both,
//!   and the bounded argument-string builder used in error logs.

pub mod domain;
pub mod parse;

pub use domain::device::{
    format_device_list, select_device, Device, DeviceSelector, DeviceType, SelectionError,
};
pub use domain::port_range::{PortRange, PortRangeError};
pub use parse::argv::argv_to_string;
pub use parse::columns::index_of_column;
pub use parse::output::{first_line, first_token};
pub use parse::devices::parse_devices;
pub use parse::route::{parse_device_ip, parse_device_ip_from_line};
