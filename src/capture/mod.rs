//! Display-enumeration/capture backend boundary
//!
//! The real screen-capture backend (KMS enumeration and pixel capture) lives
//! outside this crate. The lifecycle machinery only needs three things from
//! it: the current list of enumerable displays, the identifier of the
//! virtual/synthetic connector once the kernel exposes it, and a capture
//! construction entry point. [`CaptureBackend`] captures exactly that
//! surface.

use thiserror::Error;

/// Result type for capture backend operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors surfaced by the capture backend collaborator.
///
/// These never escape the facade; they degrade to an absent capture target.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Backend could not enumerate displays
    #[error("display enumeration failed: {0}")]
    Enumeration(String),

    /// Backend failed to construct a capture for the selector
    #[error("capture construction failed for '{selector}': {reason}")]
    Construction {
        /// Display selector the construction was attempted with
        selector: String,
        /// Backend-reported reason
        reason: String,
    },
}

/// Mode parameters negotiated by the streaming session layer.
///
/// `dynamic_range` follows the wire convention: 0 is SDR, any non-zero value
/// requests HDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRequest {
    /// Horizontal resolution in pixels
    pub width: u32,
    /// Vertical resolution in pixels
    pub height: u32,
    /// Refresh rate in Hz
    pub framerate: u32,
    /// Dynamic range indicator (0 = SDR, >0 = HDR requested)
    pub dynamic_range: u32,
}

impl ModeRequest {
    /// Whether the session asked for HDR output.
    pub fn hdr_requested(&self) -> bool {
        self.dynamic_range > 0
    }
}

impl Default for ModeRequest {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            framerate: 60,
            dynamic_range: 0,
        }
    }
}

/// Handle to a constructed capture session on the enumeration backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    /// Connector identifier capture was bound to
    pub display_id: String,
    /// Width the capture was constructed for
    pub width: u32,
    /// Height the capture was constructed for
    pub height: u32,
}

/// Boundary trait over the display-enumeration/capture backend.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureBackend: Send {
    /// Names of all displays the backend can currently enumerate.
    fn display_names(&self) -> Vec<String>;

    /// Identifier of the connector tagged as virtual/synthetic, if visible.
    fn virtual_connector_id(&self) -> Result<Option<String>>;

    /// Construct a capture bound to `selector` (backend default when empty).
    fn create_capture(&self, selector: &str, mode: &ModeRequest) -> Result<CaptureHandle>;
}
