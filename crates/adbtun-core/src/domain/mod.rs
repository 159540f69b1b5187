//! Domain entities for adbtun.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain**.  Domain code:
//!
//! - Contains the core rules of the application.
//! - Has **no** imports from OS APIs, process spawning, or socket libraries.
//! - Can be compiled and tested on any platform without a device attached.
//!
//! Here the domain is small: which devices exist, how they are classified,
//! which one the user meant, and which local ports a tunnel may use.

/// Device records, classification, and the selection algorithm.
pub mod device;

/// Inclusive local port range used by the tunnel negotiator.
pub mod port_range;
