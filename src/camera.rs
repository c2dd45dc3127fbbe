//! The camera component: capture state machine, grab cycle and live configuration.
//!
//! A [`GigeCamera`] is driven serially by its host through the lifecycle
//! `init → start → grab* → stop → finish`. The only blocking point is the frame wait
//! inside [`GigeCamera::grab`].
//!
//! ## Error policy
//!
//! - Opening the camera and reading the per-frame byte size are fatal to `init`.
//! - Attribute writes during `init` are logged and tolerated; the device keeps whatever
//!   it accepted.
//! - Per-frame failures (queue, wait, frame status, decode) are logged, the frame is
//!   dropped and the component stays in [`CaptureState::Capturing`].
//! - `stop` is best-effort and always succeeds from `Capturing`.

use std::fmt;

use crate::buffer::BufferPool;
use crate::config::{
    exposure_from_device, exposure_to_device, wait_timeout, AcquisitionMode, CameraConfig,
    ControlMode, ExposureMode, SettingUpdate, Settings, Variant,
};
use crate::device::{DeviceHandle, LibraryLease, SharedLibrary};
use crate::error::{CameraError, DeviceError, DeviceResult, Result};
use crate::frame::{DecodeError, FrameView};
use crate::port::{FrameSink, TriggerReceiver};
use crate::traits::{
    CameraTransport, Command, DeviceLibrary, EnumAttribute, FrameStatus, UintAttribute,
};

/// Trigger mode forced at the device so frames flow without hardware triggers.
const FREE_RUN: &str = "Freerun";

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No device open.
    #[default]
    Uninitialized,
    /// Device open and configured, buffers allocated, not acquiring.
    Initialized,
    /// Capture session running; grabs are serviced.
    Capturing,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Capturing => "capturing",
        })
    }
}

/// Why a grab produced no frame although the component was capturing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDrop {
    /// A buffer is still queued to the device.
    SlotBusy,
    /// The device refused the buffer.
    Queue(DeviceError),
    /// The wait for completion failed or timed out.
    Wait(DeviceError),
    /// The frame completed with a non-success status.
    Incomplete(FrameStatus),
    /// The frame data could not be viewed as an image.
    Decode(DecodeError),
}

impl fmt::Display for FrameDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotBusy => f.write_str("frame buffer still queued"),
            Self::Queue(err) => write!(f, "queue failed: {err}"),
            Self::Wait(err) => write!(f, "wait failed: {err}"),
            Self::Incomplete(status) => write!(f, "frame status {status:?}"),
            Self::Decode(err) => write!(f, "decode failed: {err}"),
        }
    }
}

/// Result of one grab call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabOutcome {
    /// A frame was decoded and handed to the output.
    Published {
        /// Buffer slot holding the frame.
        slot: usize,
        /// Device frame counter.
        frame_count: u64,
    },
    /// Skipped by the trigger gate; no device call was made.
    Gated,
    /// The component is not capturing; no device call was made.
    NotCapturing,
    /// The frame was lost; the component keeps capturing.
    Dropped(FrameDrop),
}

/// Lifecycle callbacks as invoked by a host runtime.
///
/// Failures are logged and reported as `false`; grabs report nothing.
pub trait Component {
    /// Open and configure the device.
    fn on_init(&mut self) -> bool;
    /// Start acquisition.
    fn on_start(&mut self) -> bool;
    /// Run one grab cycle.
    fn on_grab(&mut self);
    /// Stop acquisition.
    fn on_stop(&mut self) -> bool;
    /// Release the device.
    fn on_finish(&mut self) -> bool;
    /// A trigger unit arrived on the input port.
    fn on_trigger(&mut self);
}

/// Frame acquisition component for one GigE camera.
///
/// Holds its own device handle and frame buffers; several components bound to different
/// addresses can share one [`SharedLibrary`].
pub struct GigeCamera<L: DeviceLibrary> {
    device: Option<DeviceHandle<L::Camera>>,
    pool: Option<BufferPool>,
    state: CaptureState,
    config: CameraConfig,
    settings: Settings,
    /// Exposure mode pushed at the last init. Later mode updates wait for the next init.
    init_exposure_mode: ExposureMode,
    trigger_pending: bool,
    trigger_input: Option<TriggerReceiver>,
    output: Option<Box<dyn FrameSink>>,
    lease: LibraryLease<L>,
}

impl<L: DeviceLibrary> fmt::Debug for GigeCamera<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GigeCamera")
            .field("address", self.settings.address.get())
            .field("state", &self.state)
            .field("variant", &self.config.variant)
            .field("trigger_pending", &self.trigger_pending)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<L: DeviceLibrary> GigeCamera<L> {
    /// Create a component and register it as a user of `library`.
    pub fn new(library: &SharedLibrary<L>, config: CameraConfig) -> Self {
        let settings = Settings::from_config(&config);
        Self {
            device: None,
            pool: None,
            state: CaptureState::Uninitialized,
            config,
            settings,
            init_exposure_mode: ExposureMode::Unset,
            trigger_pending: false,
            trigger_input: None,
            output: None,
            lease: library.acquire(),
        }
    }

    /// Connect the outbound frame port.
    #[must_use]
    pub fn with_output<S>(mut self, sink: S) -> Self
    where
        S: FrameSink + 'static,
    {
        self.output = Some(Box::new(sink));
        self
    }

    /// Connect the inbound trigger port.
    #[must_use]
    pub fn with_trigger_input(mut self, input: TriggerReceiver) -> Self {
        self.trigger_input = Some(input);
        self
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Runtime variant.
    pub const fn variant(&self) -> Variant {
        self.config.variant
    }

    /// Configuration the component was created with.
    pub const fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Live settings.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Live settings, for registering change listeners.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Frame buffers, once allocated by `init`.
    pub const fn buffers(&self) -> Option<&BufferPool> {
        self.pool.as_ref()
    }

    /// Whether a trigger is waiting to release the next grab.
    pub const fn trigger_pending(&self) -> bool {
        self.trigger_pending
    }

    /// Open the device, push the configuration and allocate frame buffers.
    pub fn init(&mut self) -> Result<()> {
        tracing::trace!(state = %self.state, "init");
        if self.state != CaptureState::Uninitialized {
            return Err(self.invalid("init"));
        }

        let address = self.settings.address.value();
        if address.is_empty() {
            tracing::error!("camera init failed: no device address configured");
            return Err(CameraError::NoAddress);
        }

        let mut device = self.lease.open(&address).map_err(|err| {
            tracing::error!(%address, error = %err, "camera init failed");
            err
        })?;

        self.configure(&mut device);

        let byte_size = match device.get_uint(UintAttribute::TotalBytesPerFrame) {
            Ok(0) => {
                tracing::error!(%address, "camera init failed: device reported an empty frame");
                device.close();
                return Err(CameraError::EmptyFrame);
            }
            Ok(size) => size as usize,
            Err(err) => {
                tracing::error!(%address, error = %err, "camera init failed: frame size unavailable");
                device.close();
                return Err(CameraError::FrameSize(err));
            }
        };

        match self.pool.take() {
            Some(pool) if pool.byte_size() == byte_size && pool.depth() == self.config.buffers.slots() => {
                tracing::debug!(byte_size, "reusing frame buffers");
                self.pool = Some(pool);
            }
            previous => {
                if let Some(pool) = previous {
                    pool.release();
                }
                self.pool = Some(BufferPool::allocate(self.config.buffers, byte_size));
            }
        }

        self.device = Some(device);
        self.state = CaptureState::Initialized;
        tracing::info!(%address, byte_size, "camera initialized");
        Ok(())
    }

    /// Open the capture session and start acquisition.
    ///
    /// If the start command fails after the session opened, the session is closed again
    /// before the error is returned.
    pub fn start(&mut self) -> Result<()> {
        tracing::trace!(state = %self.state, "start");
        if self.state != CaptureState::Initialized {
            return Err(self.invalid("start"));
        }
        let Some(device) = self.device.as_mut() else {
            return Err(self.invalid("start"));
        };

        if let Err(source) = device.capture_start() {
            tracing::error!(error = %source, "unable to start capture session");
            return Err(CameraError::Start {
                source,
                rolled_back: false,
            });
        }

        if let Err(source) = device.run_command(Command::AcquisitionStart) {
            tracing::error!(error = %source, "acquisition start failed, closing capture session");
            if let Err(err) = device.capture_end() {
                tracing::warn!(error = %err, "capture session teardown failed");
            }
            return Err(CameraError::Start {
                source,
                rolled_back: true,
            });
        }

        self.state = CaptureState::Capturing;
        tracing::info!(address = %device.address(), "capture started");
        Ok(())
    }

    /// Stop acquisition and close the capture session.
    ///
    /// Device errors are logged and ignored. Stopping a component that is initialized
    /// but not capturing does nothing.
    pub fn stop(&mut self) -> Result<()> {
        tracing::trace!(state = %self.state, "stop");
        match self.state {
            CaptureState::Capturing => {}
            CaptureState::Initialized => return Ok(()),
            CaptureState::Uninitialized => return Err(self.invalid("stop")),
        }

        if let Some(device) = self.device.as_mut() {
            if let Err(err) = device.run_command(Command::AcquisitionStop) {
                tracing::warn!(error = %err, "acquisition stop failed");
            }
            if let Err(err) = device.capture_end() {
                tracing::warn!(error = %err, "capture session teardown failed");
            }
        }
        if let Some(pool) = self.pool.as_mut() {
            pool.end_queue();
        }

        self.state = CaptureState::Initialized;
        tracing::info!("capture stopped");
        Ok(())
    }

    /// Close the device. Frame buffers are kept for the next `init`.
    pub fn finish(&mut self) -> Result<()> {
        tracing::trace!(state = %self.state, "finish");
        match self.state {
            CaptureState::Initialized => {}
            CaptureState::Uninitialized => return Ok(()),
            CaptureState::Capturing => return Err(self.invalid("finish")),
        }

        if let Some(device) = self.device.take() {
            device.close();
        }
        self.init_exposure_mode = ExposureMode::Unset;
        self.state = CaptureState::Uninitialized;
        tracing::info!("camera released");
        Ok(())
    }

    /// Record one trigger unit. Consumes a unit from the trigger input if one is wired.
    ///
    /// Has no effect on the continuous variant.
    pub fn handle_trigger(&mut self) {
        if let Some(input) = &self.trigger_input {
            input.try_take();
        }
        if self.config.variant == Variant::Continuous {
            tracing::trace!("trigger ignored by continuous variant");
            return;
        }
        self.trigger_pending = true;
    }

    /// Take one unit from the trigger input if one is waiting.
    ///
    /// For hosts that poll the input port instead of calling [`Self::handle_trigger`].
    pub fn poll_trigger(&mut self) -> bool {
        let taken = self
            .trigger_input
            .as_ref()
            .is_some_and(TriggerReceiver::try_take);
        if taken && self.config.variant == Variant::Triggered {
            self.trigger_pending = true;
        }
        taken
    }

    /// Run one grab cycle: queue the active buffer, wait for the frame, decode and
    /// publish it, then move to the other buffer.
    pub fn grab(&mut self) -> GrabOutcome {
        if self.state != CaptureState::Capturing {
            return GrabOutcome::NotCapturing;
        }

        let mode = *self.settings.acquisition_mode.get();
        let triggered = self.config.variant == Variant::Triggered;
        let mut timeout = None;
        let mut single_shot = false;

        if triggered {
            if mode != AcquisitionMode::Continuous && !self.trigger_pending {
                return GrabOutcome::Gated;
            }
            single_shot = self.trigger_pending && mode == AcquisitionMode::SingleFrame;
            self.trigger_pending = false;
            timeout = Some(wait_timeout(*self.settings.exposure_value.get()));
        }

        let (Some(device), Some(pool)) = (self.device.as_mut(), self.pool.as_mut()) else {
            return GrabOutcome::NotCapturing;
        };

        if single_shot {
            if let Err(err) = device.run_command(Command::AcquisitionStart) {
                tracing::warn!(error = %err, "acquisition start for triggered frame failed");
            }
        }

        let Some(slot) = pool.begin_queue() else {
            tracing::warn!("frame buffer still queued, grab skipped");
            return GrabOutcome::Dropped(FrameDrop::SlotBusy);
        };

        if let Err(err) = device.queue_frame(slot, pool.byte_size()) {
            tracing::warn!(slot, error = %err, "unable to queue frame");
            pool.end_queue();
            return GrabOutcome::Dropped(FrameDrop::Queue(err));
        }

        let Some(frame) = pool.slot_mut(slot) else {
            pool.end_queue();
            return GrabOutcome::Dropped(FrameDrop::SlotBusy);
        };
        let info = match device.wait_frame_done(slot, frame.buffer_mut(), timeout) {
            Ok(info) => {
                frame.record(&info);
                info
            }
            Err(err) => {
                tracing::warn!(slot, error = %err, "frame wait failed");
                if let Err(clear) = device.clear_queue() {
                    tracing::debug!(error = %clear, "unable to withdraw queued frame");
                }
                pool.end_queue();
                return GrabOutcome::Dropped(FrameDrop::Wait(err));
            }
        };
        pool.end_queue();

        if info.status != FrameStatus::Complete {
            tracing::warn!(slot, frame_count = info.frame_count, status = ?info.status, "frame dropped");
            return GrabOutcome::Dropped(FrameDrop::Incomplete(info.status));
        }

        let Some(frame) = pool.slot(slot) else {
            return GrabOutcome::Dropped(FrameDrop::SlotBusy);
        };
        let view = match FrameView::decode(frame) {
            Ok(view) => view,
            Err(err) => {
                tracing::warn!(slot, frame_count = info.frame_count, error = %err, "frame dropped");
                return GrabOutcome::Dropped(FrameDrop::Decode(err));
            }
        };

        let frame_count = view.frame_count();
        if let Some(output) = self.output.as_mut() {
            output.publish(&view);
        }
        tracing::trace!(slot, frame_count, "frame published");

        pool.publish_and_toggle();
        GrabOutcome::Published { slot, frame_count }
    }

    /// The most recently published frame, readable until its buffer is queued again.
    pub fn last_frame(&self) -> Option<FrameView<'_>> {
        let frame = self.pool.as_ref()?.last_published()?;
        FrameView::decode(frame).ok()
    }

    /// Store a new acquisition mode and push it to the device if one is open.
    ///
    /// On rejection the local value is kept and marked as diverged.
    pub fn apply_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()> {
        self.settings.acquisition_mode.set(mode);
        let Some(device) = self.device.as_mut() else {
            tracing::debug!(value = %mode, "acquisition mode stored for next init");
            return Ok(());
        };

        match push_enum(device, EnumAttribute::AcquisitionMode, mode.name()) {
            Ok(()) => {
                self.settings.acquisition_mode.mark_synced();
                Ok(())
            }
            Err(source) => {
                self.settings.acquisition_mode.mark_diverged(source);
                Err(CameraError::Rejected {
                    attribute: EnumAttribute::AcquisitionMode.name(),
                    value: mode.to_string(),
                    source,
                })
            }
        }
    }

    /// Store a new exposure time in seconds and push it to the device when the exposure
    /// mode applied at init is Manual.
    ///
    /// On rejection the local value is kept and marked as diverged.
    pub fn apply_exposure(&mut self, seconds: f64) -> Result<()> {
        self.settings.exposure_value.set(seconds);
        let Some(device) = self.device.as_mut() else {
            tracing::debug!(value = seconds, "exposure stored for next init");
            return Ok(());
        };
        if self.init_exposure_mode != ExposureMode::Manual {
            tracing::debug!(value = seconds, "exposure stored, exposure mode is not Manual");
            return Ok(());
        }

        match push_exposure(device, seconds) {
            Ok(()) => {
                self.settings.exposure_value.mark_synced();
                Ok(())
            }
            Err(source) => {
                self.settings.exposure_value.mark_diverged(source);
                Err(CameraError::Rejected {
                    attribute: UintAttribute::ExposureValue.name(),
                    value: format!("{seconds} s"),
                    source,
                })
            }
        }
    }

    /// Apply one assignment from the host's configuration store.
    pub fn update(&mut self, update: SettingUpdate) -> Result<()> {
        match update {
            SettingUpdate::AcquisitionMode(mode) => self.apply_acquisition_mode(mode),
            SettingUpdate::ExposureValue(seconds) => self.apply_exposure(seconds),
            SettingUpdate::DeviceAddress(address) => {
                if self.state != CaptureState::Uninitialized {
                    tracing::info!(%address, "device address takes effect on next init");
                }
                self.settings.address.set(address);
                Ok(())
            }
            SettingUpdate::ExposureMode(mode) => {
                if self.state != CaptureState::Uninitialized {
                    tracing::info!(value = %mode, "exposure mode takes effect on next init");
                }
                self.settings.exposure_mode.set(mode);
                Ok(())
            }
        }
    }

    /// Push the initial configuration. Rejections are logged and remembered on the
    /// affected settings.
    fn configure(&mut self, device: &mut DeviceHandle<L::Camera>) {
        let mode = *self.settings.acquisition_mode.get();
        match push_enum(device, EnumAttribute::AcquisitionMode, mode.name()) {
            Ok(()) => self.settings.acquisition_mode.mark_synced(),
            Err(err) => self.settings.acquisition_mode.mark_diverged(err),
        }

        let exposure_mode = *self.settings.exposure_mode.get();
        self.init_exposure_mode = exposure_mode;
        if exposure_mode != ExposureMode::Unset {
            match push_enum(device, EnumAttribute::ExposureMode, exposure_mode.name()) {
                Ok(()) => self.settings.exposure_mode.mark_synced(),
                Err(err) => self.settings.exposure_mode.mark_diverged(err),
            }
        }
        if exposure_mode == ExposureMode::Manual {
            match push_exposure(device, *self.settings.exposure_value.get()) {
                Ok(()) => self.settings.exposure_value.mark_synced(),
                Err(err) => self.settings.exposure_value.mark_diverged(err),
            }
        }

        if let Some(gain) = self.config.gain {
            let _ = push_enum(device, EnumAttribute::GainMode, gain.mode.name());
            if gain.mode == ControlMode::Manual {
                let _ = push_uint(device, UintAttribute::GainValue, gain.value);
            }
        }

        if let Some(balance) = self.config.white_balance {
            let _ = push_enum(device, EnumAttribute::WhitebalMode, balance.mode.name());
            if balance.mode == ControlMode::Manual {
                let _ = push_uint(device, UintAttribute::WhitebalValueRed, balance.red);
                let _ = push_uint(device, UintAttribute::WhitebalValueBlue, balance.blue);
            }
        }

        let format = self.config.format;
        if let Some(pixel_format) = format.pixel_format {
            let _ = push_enum(device, EnumAttribute::PixelFormat, pixel_format.name());
        }
        if let Some(mirror) = format.mirror_x {
            let _ = push_enum(device, EnumAttribute::MirrorX, if mirror { "On" } else { "Off" });
        }

        // Binning bounds the ROI, the ROI size bounds its offset.
        let binning = self.config.binning;
        let uints = [
            (UintAttribute::BinningX, binning.x),
            (UintAttribute::BinningY, binning.y),
            (UintAttribute::Width, format.width),
            (UintAttribute::Height, format.height),
            (UintAttribute::RegionX, format.region_x),
            (UintAttribute::RegionY, format.region_y),
        ];
        for (attribute, value) in uints {
            if let Some(value) = value {
                let _ = push_uint(device, attribute, value);
            }
        }

        let _ = push_enum(device, EnumAttribute::FrameStartTriggerMode, FREE_RUN);
    }

    fn invalid(&self, operation: &'static str) -> CameraError {
        tracing::warn!(state = %self.state, "cannot {operation} while {}", self.state);
        CameraError::InvalidTransition {
            operation,
            state: self.state,
        }
    }
}

impl<L: DeviceLibrary> Component for GigeCamera<L> {
    fn on_init(&mut self) -> bool {
        report("init", self.init())
    }

    fn on_start(&mut self) -> bool {
        report("start", self.start())
    }

    fn on_grab(&mut self) {
        self.grab();
    }

    fn on_stop(&mut self) -> bool {
        report("stop", self.stop())
    }

    fn on_finish(&mut self) -> bool {
        report("finish", self.finish())
    }

    fn on_trigger(&mut self) {
        self.handle_trigger();
    }
}

impl<L: DeviceLibrary> Drop for GigeCamera<L> {
    fn drop(&mut self) {
        if self.state == CaptureState::Capturing {
            let _ = self.stop();
        }
        if let Some(device) = self.device.take() {
            device.close();
        }
        if let Some(pool) = self.pool.take() {
            pool.release();
        }
    }
}

fn report(operation: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "{operation} failed");
            false
        }
    }
}

fn push_enum<T: CameraTransport>(
    device: &mut DeviceHandle<T>,
    attribute: EnumAttribute,
    value: &str,
) -> DeviceResult<()> {
    device.set_enum(attribute, value).map_err(|err| {
        tracing::warn!(attribute = attribute.name(), value, error = %err, "device rejected attribute");
        err
    })
}

fn push_uint<T: CameraTransport>(
    device: &mut DeviceHandle<T>,
    attribute: UintAttribute,
    value: u32,
) -> DeviceResult<()> {
    let Err(err) = device.set_uint(attribute, value) else {
        return Ok(());
    };
    if err != DeviceError::OutOfRange {
        tracing::warn!(attribute = attribute.name(), value, error = %err, "device rejected attribute");
        return Err(err);
    }
    match device.query_range(attribute) {
        Ok((min, max)) => tracing::warn!(
            attribute = attribute.name(),
            value,
            "value {value} out of range, valid range is [{min}, {max}]"
        ),
        Err(range_err) => tracing::warn!(
            attribute = attribute.name(),
            value,
            error = %range_err,
            "value {value} out of range, valid range unavailable"
        ),
    }
    Err(err)
}

/// Push an exposure time, reporting an out-of-range value with the valid range in
/// seconds.
fn push_exposure<T: CameraTransport>(device: &mut DeviceHandle<T>, seconds: f64) -> DeviceResult<()> {
    let attribute = UintAttribute::ExposureValue;
    let Some(micros) = exposure_to_device(seconds) else {
        tracing::warn!(attribute = attribute.name(), value = seconds, "exposure value not representable");
        return Err(DeviceError::BadParameter);
    };

    let Err(err) = device.set_uint(attribute, micros) else {
        return Ok(());
    };
    if err != DeviceError::OutOfRange {
        tracing::warn!(attribute = attribute.name(), value = seconds, error = %err, "device rejected exposure");
        return Err(err);
    }
    match device.query_range(attribute) {
        Ok((min, max)) => tracing::warn!(
            attribute = attribute.name(),
            value = seconds,
            "exposure {seconds} s out of range, valid range is [{}, {}] s",
            exposure_from_device(min),
            exposure_from_device(max)
        ),
        Err(range_err) => tracing::warn!(
            attribute = attribute.name(),
            value = seconds,
            error = %range_err,
            "exposure {seconds} s out of range, valid range unavailable"
        ),
    }
    Err(err)
}
