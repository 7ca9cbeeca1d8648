//! A user-space driver for USB Video Class (UVC 1.0/1.1/1.5) and USB Audio Class devices.
//!
//! Open a [`Device`] from an already-opened USB handle, inspect its video and audio functions,
//! operate its controls, and start video or audio streams.
//!
//! Dealing with a device entity `Ent`:
//! - `EntDesc` describes an entity's static properties, read from the device descriptor.
//! - `EntId` is a small `Copy` type that refers to an `EntDesc`.
//! - `Ent<'a>` grants access to the entity's properties, borrowing the opened device.

#[macro_use]
mod util;
pub mod audio;
pub mod camera;
pub mod config;
pub mod control;
pub mod descriptor;
mod detect;
mod error;
pub mod format;
pub mod frame;
pub mod payload;
pub mod probe;
pub mod processing_unit;
pub mod request;
pub mod stream;
pub mod streaming_interface;
#[cfg(test)]
mod testutil;
pub mod topo;
pub mod transfer;
pub mod transport;

use std::{fmt, sync::Arc, time::Duration};

use audio::{
    clock::ClockSource, feature_unit::FeatureUnit, stream::AudioStreamingInterface, AudioTopology,
    AudioStreamingInterfaceDesc, ClockId, FeatureUnitId,
};
use camera::CameraTerminal;
use config::ConfigurationView;
use detect::{AudioFunction, DeviceInfo, VideoFunction};
use error::*;
pub use error::{Error, ErrorKind};
use format::{StreamingInterfaceDesc, StreamingInterfaceId};
use processing_unit::ProcessingUnit;
use request::{Gateway, Request, Target};
use rusb::{Context, DeviceHandle};
use stream::StreamOptions;
use streaming_interface::StreamingInterface;
use topo::{CameraId, ExtensionUnitDesc, ExtensionUnitId, ProcessingUnitId, Topology};
use transport::{LibusbTransport, UsbTransport};

pub type Result<T> = std::result::Result<T, Error>;

/// Timeouts used by a [`Device`].
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Timeout of every control transfer.
    pub control_timeout: Duration,
    /// Default timeout of bulk URBs, see [`Device::stream_options`].
    pub bulk_timeout: Duration,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            control_timeout: Duration::from_secs(1),
            bulk_timeout: Duration::from_secs(5),
        }
    }
}

/// An opened UVC and/or UAC device.
pub struct Device {
    gateway: Gateway,
    ids: (u16, u16),
    info: DeviceInfo,
    options: DeviceOptions,
}

impl Device {
    /// Opens the device behind an already-open usbfs file descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open usbfs device file descriptor that stays open for the lifetime
    /// of the returned device.
    #[cfg(unix)]
    pub unsafe fn from_fd(fd: std::os::unix::io::RawFd) -> Result<Self> {
        let transport = LibusbTransport::from_fd(fd).during(Action::OpeningDevice)?;
        Self::with_transport(Arc::new(transport))
    }

    pub fn from_handle(handle: DeviceHandle<Context>) -> Result<Self> {
        Self::with_transport(Arc::new(LibusbTransport::new(handle)))
    }

    pub fn with_transport(transport: Arc<dyn UsbTransport>) -> Result<Self> {
        Self::with_options(transport, DeviceOptions::default())
    }

    /// Reads and parses the configuration descriptor and locates the device's video and audio
    /// functions. No interface is claimed.
    pub fn with_options(transport: Arc<dyn UsbTransport>, options: DeviceOptions) -> Result<Self> {
        let ids = transport
            .device_ids()
            .during(Action::AccessingDeviceDescriptor)?;
        let raw = transport
            .config_descriptor(0)
            .during(Action::AccessingDeviceDescriptor)?;
        let config = ConfigurationView::parse(&raw)?;
        let info = detect::detect(ids, config)?;

        log::debug!(
            "opened {:04x}:{:04x}: video={} audio={}",
            ids.0,
            ids.1,
            info.video.is_some(),
            info.audio.is_some()
        );

        Ok(Self {
            gateway: Gateway::new(transport, options.control_timeout),
            ids,
            info,
            options,
        })
    }

    pub(crate) fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn vendor_id(&self) -> u16 {
        self.ids.0
    }

    pub fn product_id(&self) -> u16 {
        self.ids.1
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Default [`StreamOptions`] with this device's bulk timeout.
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            bulk_timeout: self.options.bulk_timeout,
            ..StreamOptions::default()
        }
    }

    /// The parsed configuration descriptor.
    pub fn config(&self) -> &ConfigurationView {
        &self.info.config
    }

    pub fn has_video(&self) -> bool {
        self.info.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.info.audio.is_some()
    }

    fn video(&self) -> Result<&VideoFunction> {
        self.info.video.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::NotFound("device has no video function".into()))
        })
    }

    fn audio(&self) -> Result<&AudioFunction> {
        self.info.audio.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::NotFound("device has no audio function".into()))
        })
    }

    /// Number of the Video Control interface, if the device has a video function.
    pub fn video_control_interface(&self) -> Option<u8> {
        self.info.video.as_ref().map(|v| v.control_interface)
    }

    /// Number of the Audio Control interface, if the device has an audio function.
    pub fn audio_control_interface(&self) -> Option<u8> {
        self.info.audio.as_ref().map(|a| a.control_interface)
    }

    /// Reads control `selector` of `target` with a device-to-host `request`.
    ///
    /// `buf` must be exactly as long as the control; a shorter response fails with
    /// `ShortBuffer`. Vendor controls of extension units are only reachable this way.
    pub fn get_control(
        &self,
        target: Target,
        request: Request,
        selector: u8,
        buf: &mut [u8],
    ) -> Result<()> {
        if request == Request::SetCur {
            return Err(Error::with_action(
                ErrorKind::Other("SET_CUR is not a device-to-host request".into()),
                Action::ReadingControl,
            ));
        }
        self.gateway.get(target, request.code(), selector, 0, buf)
    }

    /// Writes `data` to control `selector` of `target` with `SET_CUR`.
    pub fn set_control(&self, target: Target, selector: u8, data: &[u8]) -> Result<()> {
        self.gateway.set(target, Request::SetCur.code(), selector, 0, data)
    }

    /// The topology of the video function, if there is one.
    pub fn topology(&self) -> Option<&Topology> {
        self.info.video.as_ref().map(|v| &v.topology)
    }

    /// Address of the Video Control interrupt endpoint, if there is one.
    pub fn interrupt_endpoint(&self) -> Option<u8> {
        self.info
            .video
            .as_ref()
            .and_then(|v| v.interrupt_endpoint.as_ref())
            .map(|(addr, _)| *addr)
    }

    /// Returns the device's video streaming interfaces.
    ///
    /// Streaming interfaces transport video data over the USB channel (either from the device to
    /// the host, or from the host to the device).
    pub fn streaming_interfaces(&self) -> &[StreamingInterfaceDesc] {
        self.info
            .video
            .as_ref()
            .map_or(&[], |v| &v.streaming_interfaces[..])
    }

    pub fn streaming_interface_by_id(
        &self,
        id: StreamingInterfaceId,
    ) -> Result<StreamingInterface<'_>> {
        let video = self.video()?;
        let desc = video
            .streaming_interfaces
            .iter()
            .find(|desc| desc.id() == id)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound(format!(
                    "video streaming interface {}",
                    id.as_raw()
                )))
            })?;
        Ok(StreamingInterface::new(
            self,
            desc,
            video.topology.header().uvc_version(),
        ))
    }

    /// IDs of all camera terminals.
    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.topology()
            .map(|topo| topo.inputs().iter().filter_map(|t| t.as_camera_id()).collect())
            .unwrap_or_default()
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> Result<CameraTerminal<'_>> {
        let video = self.video()?;
        let desc = video.topology.camera_terminal_by_id(id)?;
        Ok(CameraTerminal::new(self, video.control_interface, desc))
    }

    /// IDs of all processing units.
    pub fn processing_unit_ids(&self) -> Vec<ProcessingUnitId> {
        self.topology()
            .map(|topo| {
                topo.units()
                    .iter()
                    .filter_map(|u| u.as_processing_unit())
                    .map(|pu| pu.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn processing_unit_by_id(&self, id: ProcessingUnitId) -> Result<ProcessingUnit<'_>> {
        let video = self.video()?;
        let desc = video.topology.processing_unit_by_id(id)?;
        Ok(ProcessingUnit::new(self, video.control_interface, desc))
    }

    /// IDs of all extension units.
    pub fn extension_unit_ids(&self) -> Vec<ExtensionUnitId> {
        self.topology()
            .map(|topo| {
                topo.units()
                    .iter()
                    .filter_map(|u| u.as_extension_unit())
                    .map(|xu| xu.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn extension_unit_by_id(&self, id: ExtensionUnitId) -> Result<&ExtensionUnitDesc> {
        self.video()?.topology.extension_unit_by_id(id)
    }

    /// The [`Target`] addressing the controls of extension unit `id`.
    pub fn extension_unit_target(&self, id: ExtensionUnitId) -> Result<Target> {
        let video = self.video()?;
        video.topology.extension_unit_by_id(id)?;
        Ok(Target::Interface {
            interface: video.control_interface,
            entity: id.as_raw(),
        })
    }

    /// The topology of the audio function, if there is one.
    pub fn audio_topology(&self) -> Option<&AudioTopology> {
        self.info.audio.as_ref().map(|a| &a.topology)
    }

    pub fn audio_streaming_interfaces(&self) -> &[AudioStreamingInterfaceDesc] {
        self.info
            .audio
            .as_ref()
            .map_or(&[], |a| &a.streaming_interfaces[..])
    }

    pub fn audio_streaming_interface_by_id(
        &self,
        interface: u8,
    ) -> Result<AudioStreamingInterface<'_>> {
        let desc = self
            .audio()?
            .streaming_interfaces
            .iter()
            .find(|desc| desc.interface_number() == interface)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound(format!(
                    "audio streaming interface {}",
                    interface
                )))
            })?;
        Ok(AudioStreamingInterface::new(self, desc))
    }

    /// IDs of all audio feature units.
    pub fn feature_unit_ids(&self) -> Vec<FeatureUnitId> {
        self.audio_topology()
            .map(|topo| topo.feature_units().map(|fu| fu.id()).collect())
            .unwrap_or_default()
    }

    pub fn feature_unit_by_id(&self, id: FeatureUnitId) -> Result<FeatureUnit<'_>> {
        let audio = self.audio()?;
        let desc = audio.topology.feature_unit_by_id(id)?;
        Ok(FeatureUnit::new(self, audio.control_interface, desc))
    }

    /// IDs of all UAC 2.0 clock sources.
    pub fn clock_source_ids(&self) -> Vec<ClockId> {
        self.audio_topology()
            .map(|topo| topo.clock_sources().map(|cs| cs.id()).collect())
            .unwrap_or_default()
    }

    pub fn clock_source_by_id(&self, id: ClockId) -> Result<ClockSource<'_>> {
        let audio = self.audio()?;
        let desc = audio.topology.clock_source_by_id(id)?;
        Ok(ClockSource::new(self, audio.control_interface, desc))
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("vendor_id", &format_args!("{:04x}", self.ids.0))
            .field("product_id", &format_args!("{:04x}", self.ids.1))
            .field("info", &self.info)
            .finish()
    }
}
