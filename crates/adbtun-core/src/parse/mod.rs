//! Parsers for text printed by the Android debug bridge.
//!
//! `adb` has no structured output mode, so every piece of information the
//! client needs (the device list, a device's IP address, a property value) is
//! scraped from human-oriented text.  Each parser here is tolerant: malformed
//! lines are skipped rather than failing the whole parse, because `adb` freely
//! mixes daemon chatter into its output.
//!
//! # Sub-modules
//!
//! - **`columns`** – Finds the byte offset of the N-th whitespace-separated
//!   column.  The route parser builds on it.
//! - **`devices`** – Parses `adb devices -l`.
//! - **`route`** – Extracts the WLAN IP address from `ip route` output.
//! - **`output`** – Small helpers for trimming captured command output.
//! - **`argv`** – Renders an argument vector for error logs without ever
//!   exceeding a fixed capacity.

pub mod argv;
pub mod columns;
pub mod devices;
pub mod output;
pub mod route;
