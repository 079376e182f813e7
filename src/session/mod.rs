//! Streaming-session facade
//!
//! [`VirtualDisplayService`] is the surface the session/streaming layer talks
//! to. It wraps the single [`VirtualDisplayManager`] in a mutex: the
//! subsystem is synchronous and models at most one virtual display, so
//! callers are serialized rather than coordinated.
//!
//! Nothing here returns an error. Every failure inside the subsystem is
//! absorbed into an absent result plus diagnostics; the worst outcome for
//! callers is "virtual display not available", never a crash.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::capture::{CaptureHandle, ModeRequest};
use crate::lifecycle::VirtualDisplayManager;

/// Session-facing entry points for the virtual display subsystem.
pub struct VirtualDisplayService {
    inner: Mutex<VirtualDisplayManager>,
}

impl VirtualDisplayService {
    /// Wrap a manager for session use.
    pub fn new(manager: VirtualDisplayManager) -> Self {
        Self {
            inner: Mutex::new(manager),
        }
    }

    /// Capability-probing path: resolve a candidate display without creating
    /// a device.
    ///
    /// Encoder validation at process start calls this before any session
    /// exists. Unless a streaming session has already opened the creation
    /// gate, it returns `None` and performs no native calls.
    pub fn request_candidate_display(&self, request: &ModeRequest) -> Option<CaptureHandle> {
        let mut manager = self.inner.lock();
        debug!(
            "Candidate display requested (active: {})",
            manager.is_active()
        );
        manager.resolve_capture_target(None, request)
    }

    /// Start a streaming session: permit creation, then bring up the display
    /// and resolve its capture target.
    pub fn begin_streaming_session(
        &self,
        requested_display: Option<&str>,
        request: &ModeRequest,
    ) -> Option<CaptureHandle> {
        let mut manager = self.inner.lock();
        manager.enable_creation();
        manager.resolve_capture_target(requested_display, request)
    }

    /// End the streaming session, tearing the display down.
    ///
    /// Always succeeds from the caller's point of view.
    pub fn end_streaming_session(&self) {
        self.inner.lock().destroy();
    }

    /// Whether a virtual display is currently active.
    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active()
    }

    /// Human-readable display names for configuration UI.
    pub fn list_available_names(&self) -> Vec<String> {
        self.inner.lock().display_names()
    }

    /// Static capability check: virtual display support is compiled in.
    ///
    /// Deliberately creates and probes nothing; the kernel module is only
    /// required once streaming actually starts.
    pub fn check_availability(&self) -> bool {
        info!("Virtual display support is available");
        debug!("Runtime requires the evdi kernel module; devices are created on demand");
        true
    }
}
