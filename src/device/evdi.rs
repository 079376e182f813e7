//! Production EVDI driver
//!
//! Talks to the EVDI kernel module directly:
//!
//! - module presence via the `/sys/devices/evdi` control directory, with the
//!   `add` attribute doubling as a completeness check
//! - device classification by resolving the DRM card's driver symlink under
//!   `/sys/class/drm`
//! - device creation by writing to the `add` attribute (udev materializes the
//!   node asynchronously; the caller handles the wait)
//! - connect/disconnect through `DRM_IOCTL_EVDI_CONNECT` on the card fd,
//!   carrying the synthesized EDID
//! - event drain by reading `drm_event` records off the card fd when poll
//!   reports readiness

use std::fs::OpenOptions;
use std::io::Read;
use std::os::fd::AsFd;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, warn};

use super::error::{AcquisitionError, Result};
use super::{ControlSurface, DeviceDriver, DeviceEvent, DeviceHandle, DeviceStatus, DisplayMode};
use crate::config::VdisplayConfig;

// EVDI event codes delivered as drm_event records (uapi evdi_drm.h)
const DRM_EVDI_EVENT_UPDATE_READY: u32 = 0x8000_0000;
const DRM_EVDI_EVENT_DPMS: u32 = 0x8000_0001;
const DRM_EVDI_EVENT_MODE_CHANGED: u32 = 0x8000_0002;
const DRM_EVDI_EVENT_CRTC_STATE: u32 = 0x8000_0003;

/// drm_event header size: __u32 type + __u32 length
const DRM_EVENT_HEADER: usize = 8;

/// Connect parameters for `DRM_IOCTL_EVDI_CONNECT`
#[repr(C)]
struct DrmEvdiConnect {
    connected: i32,
    dev_index: i32,
    edid: *const u8,
    edid_length: u32,
    pixel_area_limit: u32,
    pixel_per_second_limit: u32,
}

#[allow(unsafe_code, unreachable_pub)]
mod ioctls {
    use super::DrmEvdiConnect;

    const DRM_IOCTL_BASE: u8 = b'd';
    const DRM_COMMAND_BASE: u8 = 0x40;
    const DRM_EVDI_CONNECT: u8 = 0x00;

    nix::ioctl_readwrite!(
        evdi_connect,
        DRM_IOCTL_BASE,
        DRM_COMMAND_BASE + DRM_EVDI_CONNECT,
        DrmEvdiConnect
    );
}

/// Driver backed by the real kernel module.
#[derive(Debug, Clone)]
pub struct EvdiDriver {
    sysfs_path: PathBuf,
    dri_dir: PathBuf,
    drm_class_dir: PathBuf,
}

impl EvdiDriver {
    /// Build a driver using the configured sysfs/devfs locations.
    pub fn new(config: &VdisplayConfig) -> Self {
        Self {
            sysfs_path: config.sysfs_path.clone(),
            dri_dir: config.dri_dir.clone(),
            drm_class_dir: config.drm_class_dir.clone(),
        }
    }

    fn card_node(&self, index: u32) -> PathBuf {
        self.dri_dir.join(format!("card{index}"))
    }

    fn connect_ioctl(&self, handle: &DeviceHandle, edid: Option<&[u8]>) -> Result<()> {
        let mut params = DrmEvdiConnect {
            connected: i32::from(edid.is_some()),
            dev_index: handle.index() as i32,
            edid: edid.map_or(std::ptr::null(), <[u8]>::as_ptr),
            edid_length: edid.map_or(0, |e| e.len() as u32),
            pixel_area_limit: 0,
            pixel_per_second_limit: 0,
        };

        let fd = handle.file().as_raw_fd();
        // SAFETY: fd is a live EVDI card fd owned by the handle; params and
        // the EDID buffer outlive the call.
        #[allow(unsafe_code)]
        let outcome = unsafe { ioctls::evdi_connect(fd, &mut params) };
        outcome.map_err(|errno| {
            AcquisitionError::NativeFault(format!(
                "EVDI connect ioctl on card{} failed: {errno}",
                handle.index()
            ))
        })?;

        Ok(())
    }
}

impl DeviceDriver for EvdiDriver {
    fn control_surface(&self) -> ControlSurface {
        if !self.sysfs_path.exists() {
            return ControlSurface::NotLoaded;
        }
        let add_attr = self.sysfs_path.join("add");
        if !add_attr.exists() {
            return ControlSurface::Incomplete(format!("{} is missing", add_attr.display()));
        }
        ControlSurface::Ready
    }

    fn classify(&self, index: u32) -> DeviceStatus {
        if !self.card_node(index).exists() {
            return DeviceStatus::NotPresent;
        }

        // The card node is an EVDI device iff its bound driver is "evdi"
        let driver_link = self
            .drm_class_dir
            .join(format!("card{index}"))
            .join("device/driver");
        match std::fs::read_link(&driver_link) {
            Ok(target) => match target.file_name() {
                Some(name) if name == "evdi" => DeviceStatus::Available,
                _ => DeviceStatus::Unrecognized,
            },
            Err(err) => {
                debug!("card{index}: cannot resolve driver symlink ({err})");
                DeviceStatus::Unrecognized
            }
        }
    }

    fn add_device(&self) -> Result<()> {
        let add_attr = self.sysfs_path.join("add");
        std::fs::write(&add_attr, b"1").map_err(|err| {
            AcquisitionError::NativeFault(format!(
                "writing to {} failed: {err} (root privileges are required to add devices)",
                add_attr.display()
            ))
        })
    }

    fn open(&self, index: u32) -> Result<DeviceHandle> {
        let path = self.card_node(index);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| AcquisitionError::OpenFailure { index, source })?;

        debug!("Opened EVDI device node {}", path.display());
        Ok(DeviceHandle::new(file, index))
    }

    fn connect(&self, handle: &DeviceHandle, edid: &[u8]) -> Result<()> {
        debug!(
            "Connecting card{} with {} byte EDID",
            handle.index(),
            edid.len()
        );
        self.connect_ioctl(handle, Some(edid))
    }

    fn disconnect(&self, handle: &DeviceHandle) -> Result<()> {
        debug!("Disconnecting card{}", handle.index());
        self.connect_ioctl(handle, None)
    }

    fn drain_events(&self, handle: &DeviceHandle) -> Result<Vec<DeviceEvent>> {
        let borrowed = handle.file().as_fd();
        let mut poll_fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let ready = poll(&mut poll_fds, PollTimeout::ZERO).map_err(|errno| {
            AcquisitionError::NativeFault(format!("polling EVDI event fd failed: {errno}"))
        })?;

        if ready == 0 {
            return Ok(Vec::new());
        }

        let mut buf = [0u8; 4096];
        let mut file_ref = handle.file();
        let read = file_ref.read(&mut buf).map_err(|err| {
            AcquisitionError::NativeFault(format!("reading EVDI events failed: {err}"))
        })?;

        Ok(parse_events(&buf[..read]))
    }
}

/// Decode a buffer of drm_event records into [`DeviceEvent`]s.
fn parse_events(mut data: &[u8]) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    while data.len() >= DRM_EVENT_HEADER {
        let kind = read_u32(data, 0);
        let length = read_u32(data, 4) as usize;
        if length < DRM_EVENT_HEADER || length > data.len() {
            warn!("Truncated drm_event record (type {kind:#x}, length {length}), dropping rest");
            break;
        }
        let payload = &data[DRM_EVENT_HEADER..length];

        match kind {
            DRM_EVDI_EVENT_MODE_CHANGED if payload.len() >= 12 => {
                events.push(DeviceEvent::ModeChanged(DisplayMode {
                    width: read_u32(payload, 0),
                    height: read_u32(payload, 4),
                    refresh_rate: read_u32(payload, 8),
                }));
            }
            DRM_EVDI_EVENT_DPMS if payload.len() >= 4 => {
                events.push(DeviceEvent::PowerState(read_i32(payload, 0)));
            }
            DRM_EVDI_EVENT_UPDATE_READY if payload.len() >= 4 => {
                events.push(DeviceEvent::UpdateReady(read_i32(payload, 0)));
            }
            DRM_EVDI_EVENT_CRTC_STATE if payload.len() >= 4 => {
                events.push(DeviceEvent::ControllerState(read_i32(payload, 0)));
            }
            other => {
                debug!("Ignoring unknown EVDI event type {other:#x}");
            }
        }

        data = &data[length..];
    }

    events
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap_or([0; 4]))
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    read_u32(data, offset) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&kind.to_ne_bytes());
        out.extend_from_slice(&((DRM_EVENT_HEADER + payload.len()) as u32).to_ne_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_parse_mode_changed() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2560u32.to_ne_bytes());
        payload.extend_from_slice(&1440u32.to_ne_bytes());
        payload.extend_from_slice(&144u32.to_ne_bytes());
        payload.extend_from_slice(&32u32.to_ne_bytes()); // bits_per_pixel, ignored

        let events = parse_events(&record(DRM_EVDI_EVENT_MODE_CHANGED, &payload));
        assert_eq!(
            events,
            vec![DeviceEvent::ModeChanged(DisplayMode {
                width: 2560,
                height: 1440,
                refresh_rate: 144,
            })]
        );
    }

    #[test]
    fn test_parse_multiple_records() {
        let mut data = record(DRM_EVDI_EVENT_DPMS, &0i32.to_ne_bytes());
        data.extend(record(DRM_EVDI_EVENT_CRTC_STATE, &1i32.to_ne_bytes()));
        data.extend(record(DRM_EVDI_EVENT_UPDATE_READY, &0i32.to_ne_bytes()));

        let events = parse_events(&data);
        assert_eq!(
            events,
            vec![
                DeviceEvent::PowerState(0),
                DeviceEvent::ControllerState(1),
                DeviceEvent::UpdateReady(0),
            ]
        );
    }

    #[test]
    fn test_unknown_event_skipped() {
        let mut data = record(0x7fff_0000, &[0u8; 4]);
        data.extend(record(DRM_EVDI_EVENT_DPMS, &3i32.to_ne_bytes()));

        let events = parse_events(&data);
        assert_eq!(events, vec![DeviceEvent::PowerState(3)]);
    }

    #[test]
    fn test_truncated_record_stops_parsing() {
        let mut data = record(DRM_EVDI_EVENT_DPMS, &0i32.to_ne_bytes());
        // Header claims 64 bytes but only the header follows
        data.extend_from_slice(&DRM_EVDI_EVENT_DPMS.to_ne_bytes());
        data.extend_from_slice(&64u32.to_ne_bytes());

        let events = parse_events(&data);
        assert_eq!(events, vec![DeviceEvent::PowerState(0)]);
    }

    #[test]
    fn test_control_surface_not_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        let config = VdisplayConfig {
            sysfs_path: tmp.path().join("evdi"),
            ..Default::default()
        };
        let driver = EvdiDriver::new(&config);
        assert_eq!(driver.control_surface(), ControlSurface::NotLoaded);
    }

    #[test]
    fn test_control_surface_incomplete_without_add() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = tmp.path().join("evdi");
        std::fs::create_dir(&sysfs).unwrap();

        let config = VdisplayConfig {
            sysfs_path: sysfs,
            ..Default::default()
        };
        let driver = EvdiDriver::new(&config);
        assert!(matches!(
            driver.control_surface(),
            ControlSurface::Incomplete(_)
        ));
    }

    #[test]
    fn test_control_surface_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = tmp.path().join("evdi");
        std::fs::create_dir(&sysfs).unwrap();
        std::fs::write(sysfs.join("add"), b"").unwrap();

        let config = VdisplayConfig {
            sysfs_path: sysfs,
            ..Default::default()
        };
        let driver = EvdiDriver::new(&config);
        assert_eq!(driver.control_surface(), ControlSurface::Ready);
    }

    #[test]
    fn test_classify_not_present() {
        let tmp = tempfile::tempdir().unwrap();
        let config = VdisplayConfig {
            dri_dir: tmp.path().to_path_buf(),
            drm_class_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let driver = EvdiDriver::new(&config);
        assert_eq!(driver.classify(0), DeviceStatus::NotPresent);
    }

    #[test]
    fn test_classify_by_driver_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let dri = tmp.path().join("dev-dri");
        let class = tmp.path().join("class-drm");
        std::fs::create_dir(&dri).unwrap();
        std::fs::write(dri.join("card0"), b"").unwrap();
        std::fs::write(dri.join("card1"), b"").unwrap();

        // card0 bound to evdi, card1 to a real GPU driver
        let evdi_driver_dir = tmp.path().join("drivers/evdi");
        let other_driver_dir = tmp.path().join("drivers/i915");
        std::fs::create_dir_all(&evdi_driver_dir).unwrap();
        std::fs::create_dir_all(&other_driver_dir).unwrap();
        for (card, target) in [("card0", &evdi_driver_dir), ("card1", &other_driver_dir)] {
            let device_dir = class.join(card).join("device");
            std::fs::create_dir_all(&device_dir).unwrap();
            std::os::unix::fs::symlink(target, device_dir.join("driver")).unwrap();
        }

        let config = VdisplayConfig {
            dri_dir: dri,
            drm_class_dir: class,
            ..Default::default()
        };
        let driver = EvdiDriver::new(&config);
        assert_eq!(driver.classify(0), DeviceStatus::Available);
        assert_eq!(driver.classify(1), DeviceStatus::Unrecognized);
    }

    #[test]
    fn test_add_device_failure_is_native_fault_with_hint() {
        let tmp = tempfile::tempdir().unwrap();
        let config = VdisplayConfig {
            // Control directory never created; the write must fail
            sysfs_path: tmp.path().join("evdi"),
            ..Default::default()
        };
        let driver = EvdiDriver::new(&config);

        let err = driver.add_device().unwrap_err();
        assert!(matches!(err, AcquisitionError::NativeFault(_)));
        assert!(err.to_string().contains("privileges"));
    }

    #[test]
    fn test_add_device_writes_sysfs_attribute() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = tmp.path().join("evdi");
        std::fs::create_dir(&sysfs).unwrap();
        std::fs::write(sysfs.join("add"), b"").unwrap();

        let config = VdisplayConfig {
            sysfs_path: sysfs.clone(),
            ..Default::default()
        };
        let driver = EvdiDriver::new(&config);
        driver.add_device().unwrap();
        assert_eq!(std::fs::read(sysfs.join("add")).unwrap(), b"1");
    }
}
