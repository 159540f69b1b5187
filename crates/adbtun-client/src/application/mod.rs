//! Application layer use cases for the client.
//!
//! # What use cases does the client have?
//!
//! - **`adb`** – The bridge client.  Turns named operations (`forward`,
//!   `reverse`, `devices -l`, `connect`, ...) into `adb` command lines, runs
//!   them through an injected `ProcessBackend`, and classifies the outcome.
//!
//! - **`select_device`** – Lists the attached devices and resolves the user's
//!   selector (serial, USB only, TCP/IP only, or "the only one") to exactly
//!   one device, logging the listing when that fails.
//!
//! - **`tunnel`** – Negotiates the `adb` tunnel to the device-side socket:
//!   reverse mode first with port retry, forward mode as a fallback.
//!
//! - **`tcpip`** – Switches a USB device to TCP/IP mode and connects to it
//!   over the network.

pub mod adb;
pub mod select_device;
pub mod tcpip;
pub mod tunnel;
