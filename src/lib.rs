//! # lamco-vdisplay
//!
//! EVDI virtual display bring-up for headless Linux game streaming.
//!
//! When a client requests a streaming session and no physical monitor output
//! is desired, this crate materializes a kernel-backed virtual display
//! matching the requested resolution, refresh rate, and dynamic range, hands
//! it to the screen-capture backend, and tears it down when the session ends.
//!
//! # Architecture
//!
//! ```text
//! Streaming session layer
//!   ├─> VirtualDisplayService (mutex-serialized facade)
//!   │     └─> VirtualDisplayManager (Idle / ReadyToCreate / Active)
//!   │           ├─> device::acquire (enumerate-then-create, bounded probe)
//!   │           ├─> edid::synthesize (custom DTD + checksum)
//!   │           ├─> DeviceDriver::connect + event drain (mode sync)
//!   │           └─> CaptureBackend (discovery poll + connector override)
//!   └─> EVDI kernel module (sysfs control surface, DRM ioctls)
//! ```
//!
//! # Data Flow
//!
//! Session request → lifecycle state machine → device acquisition → EDID
//! synthesis → connect → kernel event drain → discovery handoff → capture
//! delegated to the enumeration backend with the resolved connector id.
//!
//! # Creation gating
//!
//! Encoder capability probing at process start inspects what a candidate
//! display would offer. That path must not create kernel devices, or every
//! start would leak a virtual display. Creation is therefore gated behind an
//! explicit begin-streaming signal; probing callers observe an absent result.
//!
//! # Concurrency
//!
//! Single-threaded, synchronous, blocking. Bounded waits only: a post-connect
//! settle delay and a discovery poll of at most 5 seconds. The facade
//! serializes callers with a mutex; there is no background event pump.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Display-enumeration/capture backend boundary
pub mod capture;

/// Subsystem configuration
pub mod config;

/// EVDI device boundary and acquisition strategy
pub mod device;

/// EDID synthesis
pub mod edid;

/// Lifecycle state machine and discovery handoff
pub mod lifecycle;

/// Streaming-session facade
pub mod session;

/// Bounded-retry helpers
pub mod utils;

pub use capture::{CaptureBackend, CaptureError, CaptureHandle, ModeRequest};
pub use config::VdisplayConfig;
pub use device::{AcquisitionError, DeviceDriver, DeviceEvent, DisplayMode};
pub use lifecycle::{PrepareOutcome, VirtualDisplayManager};
pub use session::VirtualDisplayService;

/// Build the production service over the real EVDI driver.
///
/// The capture backend stays caller-supplied; it belongs to the capture
/// subsystem, not to this crate.
pub fn production_service(
    config: VdisplayConfig,
    backend: Box<dyn CaptureBackend>,
) -> VirtualDisplayService {
    let driver = Box::new(device::evdi::EvdiDriver::new(&config));
    VirtualDisplayService::new(VirtualDisplayManager::new(config, driver, backend))
}
