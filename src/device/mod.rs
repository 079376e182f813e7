//! EVDI device boundary
//!
//! Everything that talks to the EVDI kernel module goes through the
//! [`DeviceDriver`] trait so the lifecycle machinery can be exercised against
//! test doubles. The real driver lives in [`evdi`] and speaks sysfs + DRM
//! ioctls; no native fault is allowed to cross this boundary as anything
//! other than an [`AcquisitionError`].
//!
//! Acquisition uses the enumerate-then-create strategy: probe a bounded range
//! of DRM card indices for a free EVDI node, and only ask the module to add a
//! new device when none is found.

use std::fs::File;

use tracing::{debug, error, info};

use crate::config::VdisplayConfig;
use crate::utils::{wait_for, RetryPolicy, Sleeper};

pub mod error;
pub mod evdi;

pub use error::{AcquisitionError, Result};

/// Classification of a DRM card index, mirroring the kernel module's
/// device-check semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// An EVDI node that can be opened
    Available,
    /// A DRM node driven by something other than EVDI
    Unrecognized,
    /// No device node at this index
    NotPresent,
}

/// State of the kernel module's sysfs control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSurface {
    /// Module loaded and the add-device attribute is present
    Ready,
    /// Module not loaded at all
    NotLoaded,
    /// Module loaded but the control surface is missing pieces
    Incomplete(String),
}

/// A display mode as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    /// Horizontal resolution in pixels
    pub width: u32,
    /// Vertical resolution in pixels
    pub height: u32,
    /// Refresh rate in Hz
    pub refresh_rate: u32,
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            refresh_rate: 60,
        }
    }
}

/// Asynchronous events reported by the kernel module.
///
/// These are drained synchronously right after connect; there is no
/// background event pump in this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Kernel (re)negotiated the display mode; authoritative once connected
    ModeChanged(DisplayMode),
    /// DPMS power state changed
    PowerState(i32),
    /// A framebuffer is ready to be updated; consumed by the capture backend
    UpdateReady(i32),
    /// CRTC enable/disable state changed
    ControllerState(i32),
}

/// Open session on an EVDI device node.
///
/// Owns the card file descriptor; dropping the handle closes the device.
#[derive(Debug)]
pub struct DeviceHandle {
    file: File,
    index: u32,
}

impl DeviceHandle {
    /// Wrap an already-open card node.
    pub fn new(file: File, index: u32) -> Self {
        Self { file, index }
    }

    /// DRM card index this handle was opened at.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }
}

/// Boundary trait over the EVDI kernel module.
///
/// The production implementation is [`evdi::EvdiDriver`]; tests substitute
/// mocks to observe invocation counts and inject failures.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceDriver: Send {
    /// Check the module's sysfs control surface.
    fn control_surface(&self) -> ControlSurface;

    /// Classify the DRM card at `index`.
    fn classify(&self, index: u32) -> DeviceStatus;

    /// Ask the module to create another virtual device.
    fn add_device(&self) -> Result<()>;

    /// Open the card node at `index`.
    fn open(&self, index: u32) -> Result<DeviceHandle>;

    /// Connect the device with the given EDID, bringing the connector up.
    fn connect(&self, handle: &DeviceHandle, edid: &[u8]) -> Result<()>;

    /// Disconnect the device, tearing the connector down.
    fn disconnect(&self, handle: &DeviceHandle) -> Result<()>;

    /// Drain any pending kernel events without blocking.
    fn drain_events(&self, handle: &DeviceHandle) -> Result<Vec<DeviceEvent>>;
}

/// Find a free EVDI device and open it, creating one if necessary.
///
/// Fails fast with remediation guidance when the kernel module is not
/// usable, rather than attempting calls that would hang or fail opaquely.
pub fn acquire(
    driver: &dyn DeviceDriver,
    config: &VdisplayConfig,
    node_wait: RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<DeviceHandle> {
    match driver.control_surface() {
        ControlSurface::Ready => {}
        ControlSurface::NotLoaded => {
            error!("EVDI kernel module is not loaded or failed to initialize");
            error!("Install the evdi-dkms package and run: sudo modprobe evdi");
            return Err(AcquisitionError::ModuleUnavailable(
                "kernel module not loaded (try: sudo modprobe evdi)".into(),
            ));
        }
        ControlSurface::Incomplete(detail) => {
            error!("EVDI kernel module loaded but control surface incomplete: {detail}");
            error!("The evdi-dkms install appears broken; reinstall and reload the module");
            return Err(AcquisitionError::ModuleUnavailable(format!(
                "control surface incomplete: {detail}"
            )));
        }
    }

    debug!("EVDI kernel module loaded, searching for available device nodes");

    if let Some(index) = scan_for_available(driver, config.probe_limit) {
        info!("Found available EVDI device at card{index}");
        return driver.open(index);
    }

    info!("No free EVDI device found, asking the module to add one");
    if let Err(err) = driver.add_device() {
        error!("Probe exhausted and adding an EVDI device failed: {err}");
        return Err(AcquisitionError::NoFreeDevice);
    }

    // udev creates the new node asynchronously; give it a bounded moment
    let mut found = None;
    wait_for(node_wait, sleeper, "new EVDI device node", || {
        found = scan_for_available(driver, config.probe_limit);
        found.is_some()
    });

    match found {
        Some(index) => {
            info!("Opened freshly added EVDI device at card{index}");
            driver.open(index)
        }
        None => {
            error!(
                "No EVDI device appeared within the first {} card indices after add",
                config.probe_limit
            );
            Err(AcquisitionError::NoFreeDevice)
        }
    }
}

fn scan_for_available(driver: &dyn DeviceDriver, probe_limit: u32) -> Option<u32> {
    (0..probe_limit).find(|&index| match driver.classify(index) {
        DeviceStatus::Available => {
            debug!("card{index}: available EVDI device");
            true
        }
        DeviceStatus::Unrecognized => false,
        DeviceStatus::NotPresent => false,
    })
}
