//! Infrastructure layer for the client.
//!
//! Contains the OS-facing adapters: child processes, sockets, the cancellation
//! primitive that ties them together, and configuration storage.
//!
//! **Dependency rule**: this layer may depend on `adbtun_core`, but MUST NOT
//! import from `application`.
//!
//! # Sub-modules
//!
//! - **`interrupt`** – [`interrupt::Interruptor`], which lets one thread cancel
//!   a blocking process wait or socket call owned by another.
//!
//! - **`process`** – the [`process::ProcessBackend`] trait with a `std::process`
//!   implementation and a scripted mock for tests.
//!
//! - **`net`** – interruptible listen / accept / connect over `socket2`.
//!
//! - **`storage`** – TOML configuration file.

pub mod interrupt;
pub mod net;
pub mod process;
pub mod storage;
