//! Device acquisition error types

use thiserror::Error;

/// Result type for device operations
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Errors surfaced while acquiring or driving the EVDI device.
///
/// All of these are fatal to the current acquisition attempt only; none of
/// them may escape the subsystem's public facade, which converts them into
/// absent results plus diagnostics.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// EVDI kernel module control surface absent or incomplete
    #[error("EVDI kernel module unavailable: {0}")]
    ModuleUnavailable(String),

    /// Probe bound exhausted and device creation also failed
    #[error("no free EVDI device found and creating one failed")]
    NoFreeDevice,

    /// Device node found or created but could not be opened
    #[error("failed to open EVDI device card{index}: {source}")]
    OpenFailure {
        /// DRM card index of the node that failed to open
        index: u32,
        /// Underlying open error (typically permissions or a close race)
        #[source]
        source: std::io::Error,
    },

    /// Fault raised by a native call during connect/disconnect/event handling
    #[error("native EVDI call failed: {0}")]
    NativeFault(String),
}
