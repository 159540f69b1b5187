//! SelectDeviceUseCase: lists the attached devices and resolves the user's
//! selector to exactly one of them.
//!
//! On failure the whole listing is logged, with the matching devices marked,
//! so the user can see why the selector did not resolve:
//!
//! ```text
//! ERROR multiple (2) ADB devices match USB: 0123456789abcdef, fedcba9876543210; ...
//! ERROR     -->   (usb)  0123456789abcdef       device  Pixel_7
//! ERROR     -->   (usb)  fedcba9876543210       device  Pixel_8
//! ERROR         (tcpip)  192.168.1.5:5555       device  Pixel_6
//! ```

use std::sync::Arc;

use adbtun_core::{format_device_list, select_device, Device, DeviceSelector, SelectionError};
use thiserror::Error;
use tracing::{debug, error, info};

use super::adb::{AdbClient, AdbError};
use crate::infrastructure::interrupt::Interruptor;

/// Error type for device selection.
#[derive(Debug, Error)]
pub enum SelectDeviceError {
    #[error("could not list ADB devices: {0}")]
    Adb(#[from] AdbError),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

impl SelectDeviceError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SelectDeviceError::Adb(e) if e.is_interrupted())
    }
}

/// Enumerates devices through `adb devices -l` and picks one.
pub struct SelectDeviceUseCase {
    adb: Arc<AdbClient>,
}

impl SelectDeviceUseCase {
    pub fn new(adb: Arc<AdbClient>) -> Self {
        Self { adb }
    }

    /// Lists the devices and resolves `selector` against the listing.
    ///
    /// # Errors
    ///
    /// [`SelectDeviceError::Adb`] when the listing cannot be obtained
    /// (including [`AdbError::Interrupted`]), [`SelectDeviceError::Selection`]
    /// when zero, several, or an unusable device match.
    pub fn execute(
        &self,
        intr: &Interruptor,
        selector: &DeviceSelector,
    ) -> Result<Device, SelectDeviceError> {
        let mut devices = match self.adb.list_devices(intr) {
            Ok(devices) => devices,
            Err(e) if e.is_interrupted() => {
                debug!("device listing interrupted");
                return Err(e.into());
            }
            Err(e) => {
                error!("could not list ADB devices: {e}");
                return Err(e.into());
            }
        };
        debug!("{} device(s) listed", devices.len());

        match select_device(&mut devices, selector) {
            Ok(device) => {
                info!(
                    "device selected: {} ({})",
                    device.serial,
                    device.device_type().label()
                );
                Ok(device)
            }
            Err(e) => {
                error!("{e}");
                if matches!(e, SelectionError::NotFound { .. } | SelectionError::Ambiguous { .. })
                {
                    for line in format_device_list(&devices) {
                        error!("{line}");
                    }
                }
                Err(e.into())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
