//! adbtun-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does adbtun-client do? (for beginners)
//!
//! A screen-mirroring client needs a socket that reaches a service running on
//! an Android phone.  The phone is only reachable through `adb`, the Android
//! debug bridge, so this crate drives `adb` as an external process:
//!
//! 1. Lists the attached devices and picks the one the user asked for
//!    (`application::select_device`).
//! 2. Asks `adb` to set up a tunnel between a local TCP port and a named
//!    socket on the device, preferring a *reverse* tunnel (the device connects
//!    to us) and falling back to a *forward* tunnel (we connect to the device)
//!    (`application::tunnel`).
//! 3. Optionally switches a USB device to TCP/IP mode and connects to it over
//!    the network (`application::tcpip`).
//!
//! Every step blocks.  A shared [`infrastructure::interrupt::Interruptor`]
//! lets another thread cancel whatever is blocked (a running `adb` process or
//! a socket) when the user presses Ctrl-C.

/// Application layer: use cases built on the bridge client.
pub mod application;

/// Infrastructure layer: processes, sockets, cancellation, and configuration.
pub mod infrastructure;
