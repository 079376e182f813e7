//! Virtual display lifecycle
//!
//! [`VirtualDisplayManager`] owns the single virtual display instance and the
//! creation gate. The gate exists because encoder capability probing at
//! process start walks the display-resolution path before any session exists;
//! if that path created a kernel device unconditionally, every start would
//! leak a virtual display. Only an explicit begin-streaming signal opens the
//! gate.
//!
//! The state machine is a three-state enum rather than two booleans so that
//! "active without a device handle" is unrepresentable: the handle lives
//! inside the `Active` variant.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::{CaptureBackend, CaptureHandle, ModeRequest};
use crate::config::VdisplayConfig;
use crate::device::{
    acquire, AcquisitionError, DeviceDriver, DeviceEvent, DeviceHandle, DisplayMode,
};
use crate::edid;
use crate::utils::{wait_for, RetryPolicy, Sleeper, ThreadSleeper};

/// Lifecycle of the single virtual display instance.
#[derive(Debug)]
enum LifecycleState {
    /// No device, creation not permitted (initial state)
    Idle,
    /// No device, an explicit streaming-start signal has permitted creation
    ReadyToCreate,
    /// Device connected; the handle is owned here
    Active(ActiveDisplay),
}

#[derive(Debug)]
struct ActiveDisplay {
    handle: DeviceHandle,
}

/// Outcome of [`VirtualDisplayManager::prepare_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// A device was acquired and connected by this call
    Created,
    /// Display was already active; call was a no-op
    AlreadyActive,
    /// Creation gate is closed; benign for probing callers
    NotAllowed,
}

/// Owner of the virtual display state machine.
///
/// Exactly one instance exists per process, injected into the session layer.
/// Not designed for concurrent mutation; the [`crate::session`] facade
/// serializes access with a mutex.
pub struct VirtualDisplayManager {
    config: VdisplayConfig,
    driver: Box<dyn DeviceDriver>,
    backend: Box<dyn CaptureBackend>,
    sleeper: Box<dyn Sleeper>,
    state: LifecycleState,
    /// Last-negotiated mode; kernel-reported values override the request
    mode: DisplayMode,
    hdr_requested: bool,
}

impl VirtualDisplayManager {
    /// Build a manager over the given collaborators.
    pub fn new(
        config: VdisplayConfig,
        driver: Box<dyn DeviceDriver>,
        backend: Box<dyn CaptureBackend>,
    ) -> Self {
        Self::with_sleeper(config, driver, backend, Box::new(ThreadSleeper))
    }

    /// Build a manager with an explicit sleeper (tests use a zero-delay one).
    pub fn with_sleeper(
        config: VdisplayConfig,
        driver: Box<dyn DeviceDriver>,
        backend: Box<dyn CaptureBackend>,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            config,
            driver,
            backend,
            sleeper,
            state: LifecycleState::Idle,
            mode: DisplayMode::default(),
            hdr_requested: false,
        }
    }

    /// Whether a virtual display is currently connected.
    pub fn is_active(&self) -> bool {
        matches!(self.state, LifecycleState::Active(_))
    }

    /// Last-negotiated display mode.
    pub fn current_mode(&self) -> DisplayMode {
        self.mode
    }

    /// Permit device creation on the next [`Self::prepare_or_create`].
    ///
    /// Side-effect-free otherwise; capability probing that runs before this
    /// call observes an absent display instead of triggering creation.
    pub fn enable_creation(&mut self) {
        if let LifecycleState::Idle = self.state {
            debug!("Virtual display creation enabled");
            self.state = LifecycleState::ReadyToCreate;
        }
    }

    /// Acquire, describe, and connect the virtual display for `request`.
    ///
    /// No-op success when already active. Benign [`PrepareOutcome::NotAllowed`]
    /// when the creation gate is closed. On any failure the handle is released
    /// and the gate stays open for a retry; the causal error is returned.
    pub fn prepare_or_create(
        &mut self,
        request: &ModeRequest,
    ) -> Result<PrepareOutcome, AcquisitionError> {
        match self.state {
            LifecycleState::Active(_) => {
                warn!("Virtual display already active");
                return Ok(PrepareOutcome::AlreadyActive);
            }
            LifecycleState::Idle => {
                debug!("Virtual display not yet created; creation gate is closed");
                return Ok(PrepareOutcome::NotAllowed);
            }
            LifecycleState::ReadyToCreate => {}
        }

        info!(
            "Preparing virtual display for streaming session: {}x{}@{}Hz dynamic_range={}",
            request.width, request.height, request.framerate, request.dynamic_range
        );

        let node_wait = RetryPolicy::new(self.config.discovery_interval_ms, 10);
        let handle = acquire(
            self.driver.as_ref(),
            &self.config,
            node_wait,
            self.sleeper.as_ref(),
        )?;

        self.mode = DisplayMode {
            width: request.width,
            height: request.height,
            refresh_rate: request.framerate,
        };
        self.hdr_requested = request.hdr_requested();

        let descriptor = edid::synthesize(
            self.mode.width,
            self.mode.height,
            self.mode.refresh_rate,
            self.hdr_requested,
        );

        info!(
            "Connecting virtual display: {}x{}@{}Hz{}",
            self.mode.width,
            self.mode.height,
            self.mode.refresh_rate,
            if self.hdr_requested { " (HDR)" } else { "" }
        );

        if let Err(err) = self.driver.connect(&handle, &descriptor) {
            // Handle is dropped here, closing the device; gate stays open
            warn!("Connect failed, releasing device: {err}");
            return Err(err);
        }

        // One synchronous drain; the kernel acks the connect with events and
        // may renegotiate the mode
        match self.driver.drain_events(&handle) {
            Ok(events) => self.apply_events(&events),
            Err(err) => debug!("Post-connect event drain failed: {err}"),
        }

        // KMS needs a moment to enumerate the new connector
        let settle = Duration::from_millis(self.config.settle_delay_ms);
        debug!("Waiting {settle:?} for KMS to settle");
        self.sleeper.sleep(settle);

        self.state = LifecycleState::Active(ActiveDisplay { handle });
        info!("Virtual display configured successfully");
        Ok(PrepareOutcome::Created)
    }

    /// Disconnect and release the virtual display.
    ///
    /// Never fails observably: native faults during teardown are logged and
    /// swallowed. Also closes the creation gate. Idempotent.
    pub fn destroy(&mut self) {
        match std::mem::replace(&mut self.state, LifecycleState::Idle) {
            LifecycleState::Active(active) => {
                info!("Destroying virtual display");
                if let Err(err) = self.driver.disconnect(&active.handle) {
                    warn!("Error while disconnecting virtual display: {err}");
                }
                // Handle drop closes the device node
                info!("Virtual display destroyed");
            }
            LifecycleState::ReadyToCreate => {
                debug!("Virtual display creation gate closed without a device");
            }
            LifecycleState::Idle => {
                debug!("destroy called but display not active");
            }
        }
    }

    /// Resolve the capture target for a session, creating the display first
    /// when permitted.
    ///
    /// Once the virtual display is active its connector overrides
    /// `requested_selector`: the kernel assigns the connector id, so a
    /// preconfigured selector would never match it.
    pub fn resolve_capture_target(
        &mut self,
        requested_selector: Option<&str>,
        request: &ModeRequest,
    ) -> Option<CaptureHandle> {
        let was_inactive = !self.is_active();

        if was_inactive {
            match self.prepare_or_create(request) {
                Ok(PrepareOutcome::Created) => {}
                Ok(PrepareOutcome::AlreadyActive) => {}
                Ok(PrepareOutcome::NotAllowed) => {
                    // Expected during encoder validation at startup
                    debug!("Virtual display not available; creation gate closed");
                    return None;
                }
                Err(err) => {
                    warn!("Virtual display bring-up failed: {err}");
                    return None;
                }
            }

            // The kernel DRM subsystem enumerates the new connector
            // asynchronously; poll until the backend sees at least one
            // display. Exhaustion proceeds anyway since a later capture
            // attempt may still succeed.
            let policy = self.config.discovery_policy();
            wait_for(policy, self.sleeper.as_ref(), "KMS display enumeration", || {
                !self.backend.display_names().is_empty()
            });
        }

        let mut selector = requested_selector.unwrap_or_default().to_owned();
        match self.backend.virtual_connector_id() {
            Ok(Some(id)) => {
                info!("Found virtual display connector: {id}");
                if !selector.is_empty() && selector != id {
                    info!(
                        "Overriding configured display id ({selector}) with virtual display ({id})"
                    );
                }
                selector = id;
            }
            Ok(None) => {
                warn!("Could not find the virtual connector in the display list");
                debug!("The display may not have been detected by KMS yet");
            }
            Err(err) => {
                warn!("Virtual connector lookup failed: {err}");
            }
        }

        match self.backend.create_capture(&selector, request) {
            Ok(capture) => {
                debug!("Capture constructed on display '{}'", capture.display_id);
                Some(capture)
            }
            Err(err) => {
                warn!("Capture construction failed: {err}");
                None
            }
        }
    }

    fn apply_events(&mut self, events: &[DeviceEvent]) {
        for event in events {
            match *event {
                DeviceEvent::ModeChanged(mode) => {
                    debug!(
                        "Mode changed by kernel: {}x{}@{}Hz",
                        mode.width, mode.height, mode.refresh_rate
                    );
                    self.mode = mode;
                }
                DeviceEvent::PowerState(state) => debug!("DPMS power state: {state}"),
                DeviceEvent::UpdateReady(buffer) => {
                    // Frame-buffer swap signal; consumed by the capture
                    // backend, not by this subsystem
                    debug!("Update ready for buffer {buffer}");
                }
                DeviceEvent::ControllerState(state) => debug!("CRTC state: {state}"),
            }
        }
    }

    /// Names to present in configuration UI.
    ///
    /// Always includes the on-demand placeholder; virtual displays are created
    /// when streaming starts, not when they are listed.
    pub fn display_names(&self) -> Vec<String> {
        let mut names = vec!["Lamco Virtual Display".to_string()];

        if let LifecycleState::Active(ref active) = self.state {
            names.push(format!("card{} (active)", active.handle.index()));
        }

        names
    }
}
