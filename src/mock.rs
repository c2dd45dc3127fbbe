//! In-memory device library for testing without hardware.
//!
//! A [`MockLibrary`] holds any number of [`MockCamera`]s keyed by address. Every call a
//! component makes through an opened camera is recorded as a [`DeviceCall`], and the
//! [`MockProbe`] returned when a camera is added inspects and scripts that camera after
//! it has been handed to the library.
//!
//! Completed frames are filled with a [`TestPattern`] in the camera's current pixel
//! format, so the content checks in [`crate::validation`] can be run against them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{DeviceError, DeviceResult};
use crate::traits::{
    CameraTransport, Command, DeviceLibrary, EnumAttribute, FrameInfo, FrameStatus, PixelFormat,
    UintAttribute,
};
use crate::validation::COLOR_BARS;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call made through an opened mock camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    /// `close`
    Close,
    /// `enum_get`
    EnumGet(EnumAttribute),
    /// `enum_set`
    EnumSet(EnumAttribute, String),
    /// `uint_get`
    UintGet(UintAttribute),
    /// `uint_set`
    UintSet(UintAttribute, u32),
    /// `uint_range`
    UintRange(UintAttribute),
    /// `run_command`
    Command(Command),
    /// `capture_start`
    CaptureStart,
    /// `capture_end`
    CaptureEnd,
    /// `queue_frame`
    QueueFrame {
        /// Buffer slot.
        slot: usize,
        /// Buffer capacity in bytes.
        capacity: usize,
    },
    /// `wait_frame_done`
    WaitFrame {
        /// Buffer slot.
        slot: usize,
        /// Requested bound.
        timeout: Option<Duration>,
    },
    /// `clear_queue`
    ClearQueue,
}

/// Scripted result of the next frame wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame completes with the camera's current format.
    Complete,
    /// The wait succeeds but the frame carries a failure status.
    Status(DeviceError),
    /// The wait itself fails. The frame stays queued.
    WaitError(DeviceError),
    /// The frame completes but reports this pixel format.
    Format(PixelFormat),
}

/// Image content of generated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Eight vertical bars: white, yellow, cyan, green, magenta, red, blue, black.
    ColorBars,
    /// Horizontal ramp from black at the left edge to white at the right edge.
    Gradient,
    /// Every pixel has this red, green, blue value.
    Solid(u8, u8, u8),
}

impl TestPattern {
    /// Red, green, blue value at column `x` of a frame `width` pixels wide.
    #[must_use]
    pub fn rgb(self, x: u32, width: u32) -> (u8, u8, u8) {
        match self {
            Self::ColorBars => {
                let bar = (u64::from(x) * 8 / u64::from(width.max(1))).min(7);
                usize::try_from(bar)
                    .ok()
                    .and_then(|bar| COLOR_BARS.get(bar).copied())
                    .unwrap_or((0, 0, 0))
            }
            Self::Gradient => {
                let span = u64::from(width.saturating_sub(1).max(1));
                let level = u8::try_from(u64::from(x) * 255 / span).unwrap_or(u8::MAX);
                (level, level, level)
            }
            Self::Solid(r, g, b) => (r, g, b),
        }
    }
}

/// Bytes per pixel the mock device uses for a format.
const fn bytes_per_pixel(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Mono8 | PixelFormat::Bayer8 => 1,
        PixelFormat::Mono16 | PixelFormat::Yuv422 => 2,
        PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
    }
}

/// Fill `data` with `pattern` laid out as `format`, `width` pixels per row.
///
/// Formats without a direct 8-bit layout are zero-filled.
pub fn fill_pattern(data: &mut [u8], format: PixelFormat, width: u32, pattern: TestPattern) {
    let Some(channels) = format.channels() else {
        data.fill(0);
        return;
    };
    let row = width.max(1) as usize;

    for (index, pixel) in data.chunks_exact_mut(channels as usize).enumerate() {
        let x = u32::try_from(index % row).unwrap_or(0);
        let (r, g, b) = pattern.rgb(x, width);
        match format {
            PixelFormat::Bgr24 => pixel.copy_from_slice(&[b, g, r]),
            PixelFormat::Rgb24 => pixel.copy_from_slice(&[r, g, b]),
            _ => {
                let luma = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
                pixel.fill(u8::try_from(luma).unwrap_or(u8::MAX));
            }
        }
    }
}

#[derive(Debug)]
struct CameraState {
    open: bool,
    session: bool,
    acquiring: bool,
    sessions_opened: usize,
    enums: HashMap<EnumAttribute, String>,
    uints: HashMap<UintAttribute, u32>,
    ranges: HashMap<UintAttribute, (u32, u32)>,
    enum_rejections: HashMap<EnumAttribute, DeviceError>,
    uint_rejections: HashMap<UintAttribute, DeviceError>,
    command_failures: HashMap<Command, DeviceError>,
    capture_start_failure: Option<DeviceError>,
    frame_size_failure: Option<DeviceError>,
    frame_size: Option<u32>,
    script: VecDeque<FrameOutcome>,
    queue: VecDeque<usize>,
    queued_slots: Vec<usize>,
    pattern: TestPattern,
    frame_count: u64,
    calls: Vec<DeviceCall>,
}

impl Default for CameraState {
    fn default() -> Self {
        let enums = [
            (EnumAttribute::AcquisitionMode, "Continuous"),
            (EnumAttribute::ExposureMode, "Auto"),
            (EnumAttribute::FrameStartTriggerMode, "Freerun"),
            (EnumAttribute::GainMode, "Auto"),
            (EnumAttribute::WhitebalMode, "Auto"),
            (EnumAttribute::PixelFormat, "Bgr24"),
            (EnumAttribute::MirrorX, "Off"),
        ]
        .into_iter()
        .map(|(attribute, value)| (attribute, value.to_owned()))
        .collect();

        let uints = HashMap::from([
            (UintAttribute::ExposureValue, 10_000),
            (UintAttribute::GainValue, 0),
            (UintAttribute::WhitebalValueRed, 100),
            (UintAttribute::WhitebalValueBlue, 100),
            (UintAttribute::Width, 640),
            (UintAttribute::Height, 480),
            (UintAttribute::RegionX, 0),
            (UintAttribute::RegionY, 0),
            (UintAttribute::BinningX, 1),
            (UintAttribute::BinningY, 1),
        ]);

        let ranges = HashMap::from([
            (UintAttribute::ExposureValue, (20, 60_000_000)),
            (UintAttribute::GainValue, (0, 32)),
            (UintAttribute::WhitebalValueRed, (1, 300)),
            (UintAttribute::WhitebalValueBlue, (1, 300)),
            (UintAttribute::Width, (1, 2048)),
            (UintAttribute::Height, (1, 2048)),
            (UintAttribute::RegionX, (0, 2047)),
            (UintAttribute::RegionY, (0, 2047)),
            (UintAttribute::BinningX, (1, 8)),
            (UintAttribute::BinningY, (1, 8)),
        ]);

        Self {
            open: false,
            session: false,
            acquiring: false,
            sessions_opened: 0,
            enums,
            uints,
            ranges,
            enum_rejections: HashMap::new(),
            uint_rejections: HashMap::new(),
            command_failures: HashMap::new(),
            capture_start_failure: None,
            frame_size_failure: None,
            frame_size: None,
            script: VecDeque::new(),
            queue: VecDeque::new(),
            queued_slots: Vec::new(),
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            calls: Vec::new(),
        }
    }
}

impl CameraState {
    fn format(&self) -> PixelFormat {
        self.enums
            .get(&EnumAttribute::PixelFormat)
            .and_then(|name| name.parse().ok())
            .unwrap_or(PixelFormat::Mono8)
    }

    fn dimension(&self, attribute: UintAttribute) -> u32 {
        self.uints.get(&attribute).copied().unwrap_or(0)
    }

    fn total_bytes(&self) -> DeviceResult<u32> {
        if let Some(err) = self.frame_size_failure {
            return Err(err);
        }
        if let Some(size) = self.frame_size {
            return Ok(size);
        }
        let pixels = self
            .dimension(UintAttribute::Width)
            .saturating_mul(self.dimension(UintAttribute::Height));
        Ok(pixels.saturating_mul(bytes_per_pixel(self.format())))
    }

    fn wait(&mut self, slot: usize, buffer: &mut [u8]) -> DeviceResult<FrameInfo> {
        if !self.queue.contains(&slot) {
            return Err(DeviceError::BadSequence);
        }
        if !self.acquiring {
            return Err(DeviceError::Timeout);
        }

        let outcome = self.script.pop_front().unwrap_or(FrameOutcome::Complete);
        if let FrameOutcome::WaitError(err) = outcome {
            return Err(err);
        }
        self.queue.retain(|queued| *queued != slot);

        if self
            .enums
            .get(&EnumAttribute::AcquisitionMode)
            .is_some_and(|mode| mode == "SingleFrame")
        {
            self.acquiring = false;
        }

        let frame_count = self.frame_count;
        self.frame_count += 1;
        let width = self.dimension(UintAttribute::Width);
        let height = self.dimension(UintAttribute::Height);
        let mut format = self.format();

        let status = match outcome {
            FrameOutcome::Status(err) => {
                return Ok(FrameInfo {
                    width,
                    height,
                    format,
                    populated: 0,
                    frame_count,
                    status: FrameStatus::Failed(err),
                })
            }
            FrameOutcome::Format(reported) => {
                format = reported;
                FrameStatus::Complete
            }
            FrameOutcome::Complete | FrameOutcome::WaitError(_) => FrameStatus::Complete,
        };

        let bytes = u64::from(width) * u64::from(height) * u64::from(bytes_per_pixel(format));
        let populated = usize::try_from(bytes).unwrap_or(usize::MAX).min(buffer.len());
        if let Some(data) = buffer.get_mut(..populated) {
            fill_pattern(data, format, width, self.pattern);
        }

        Ok(FrameInfo {
            width,
            height,
            format,
            populated,
            frame_count,
            status,
        })
    }
}

/// A camera waiting to be added to a [`MockLibrary`].
///
/// Defaults to a 640x480 Bgr24 sensor delivering color bars, 921600 bytes per frame.
#[derive(Debug, Default)]
pub struct MockCamera {
    state: CameraState,
}

impl MockCamera {
    /// Create a camera with default attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sensor's pixel format and size.
    #[must_use]
    pub fn with_format(mut self, format: PixelFormat, width: u32, height: u32) -> Self {
        self.state
            .enums
            .insert(EnumAttribute::PixelFormat, format.name().to_owned());
        self.state.uints.insert(UintAttribute::Width, width);
        self.state.uints.insert(UintAttribute::Height, height);
        self
    }

    /// Set the content of generated frames.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.state.pattern = pattern;
        self
    }

    /// Set the valid range of an attribute.
    #[must_use]
    pub fn with_range(mut self, attribute: UintAttribute, min: u32, max: u32) -> Self {
        self.state.ranges.insert(attribute, (min, max));
        self
    }

    /// Reject every write of an enumerated attribute.
    #[must_use]
    pub fn reject_enum(mut self, attribute: EnumAttribute, error: DeviceError) -> Self {
        self.state.enum_rejections.insert(attribute, error);
        self
    }

    /// Reject every write of an integer attribute.
    #[must_use]
    pub fn reject_uint(mut self, attribute: UintAttribute, error: DeviceError) -> Self {
        self.state.uint_rejections.insert(attribute, error);
        self
    }

    /// Fail every run of a command.
    #[must_use]
    pub fn fail_command(mut self, command: Command, error: DeviceError) -> Self {
        self.state.command_failures.insert(command, error);
        self
    }

    /// Fail opening the capture session.
    #[must_use]
    pub const fn fail_capture_start(mut self, error: DeviceError) -> Self {
        self.state.capture_start_failure = Some(error);
        self
    }

    /// Fail reading the per-frame byte size.
    #[must_use]
    pub const fn fail_frame_size(mut self, error: DeviceError) -> Self {
        self.state.frame_size_failure = Some(error);
        self
    }
}

/// Inspection and scripting handle for a camera owned by a [`MockLibrary`].
#[derive(Debug, Clone)]
pub struct MockProbe {
    state: Arc<Mutex<CameraState>>,
}

impl MockProbe {
    /// Whether a transport to this camera is open.
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Whether a capture session is open.
    pub fn session_open(&self) -> bool {
        lock(&self.state).session
    }

    /// Capture sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).sessions_opened
    }

    /// Whether the camera is acquiring frames.
    pub fn acquiring(&self) -> bool {
        lock(&self.state).acquiring
    }

    /// Calls recorded since the last [`Self::clear_calls`].
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.state).calls.clone()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        let mut state = lock(&self.state);
        state.calls.clear();
        state.queued_slots.clear();
    }

    /// Slots queued since the last [`Self::clear_calls`], in order.
    pub fn queued_slots(&self) -> Vec<usize> {
        lock(&self.state).queued_slots.clone()
    }

    /// Current value of an enumerated attribute.
    pub fn enum_value(&self, attribute: EnumAttribute) -> Option<String> {
        lock(&self.state).enums.get(&attribute).cloned()
    }

    /// Current value of an integer attribute.
    pub fn uint(&self, attribute: UintAttribute) -> Option<u32> {
        lock(&self.state).uints.get(&attribute).copied()
    }

    /// Script the outcome of an upcoming frame wait. Outcomes are used in order.
    pub fn push_outcome(&self, outcome: FrameOutcome) {
        lock(&self.state).script.push_back(outcome);
    }

    /// Report a fixed per-frame byte size instead of deriving it from the format.
    pub fn set_frame_size(&self, bytes: u32) {
        lock(&self.state).frame_size = Some(bytes);
    }

    /// Change the content of generated frames.
    pub fn set_pattern(&self, pattern: TestPattern) {
        lock(&self.state).pattern = pattern;
    }

    /// Reject every further write of an enumerated attribute.
    pub fn reject_enum(&self, attribute: EnumAttribute, error: DeviceError) {
        lock(&self.state).enum_rejections.insert(attribute, error);
    }

    /// Reject every further write of an integer attribute.
    pub fn reject_uint(&self, attribute: UintAttribute, error: DeviceError) {
        lock(&self.state).uint_rejections.insert(attribute, error);
    }
}

#[derive(Debug, Default)]
struct LibraryState {
    cameras: HashMap<String, Arc<Mutex<CameraState>>>,
    startup_failure: Option<DeviceError>,
    startups: usize,
    shutdowns: usize,
}

/// In-memory device library.
///
/// Clones share the same cameras and counters.
#[derive(Debug, Clone, Default)]
pub struct MockLibrary {
    state: Arc<Mutex<LibraryState>>,
}

impl MockLibrary {
    /// Create a library without cameras.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `startup` fail. Opening a camera then fails with the same error.
    #[must_use]
    pub fn fail_startup(self, error: DeviceError) -> Self {
        lock(&self.state).startup_failure = Some(error);
        self
    }

    /// Make `camera` reachable at `address`.
    pub fn add_camera(&self, address: &str, camera: MockCamera) -> MockProbe {
        let state = Arc::new(Mutex::new(camera.state));
        lock(&self.state)
            .cameras
            .insert(address.to_owned(), Arc::clone(&state));
        MockProbe { state }
    }

    /// Number of `startup` calls.
    pub fn startups(&self) -> usize {
        lock(&self.state).startups
    }

    /// Number of `shutdown` calls.
    pub fn shutdowns(&self) -> usize {
        lock(&self.state).shutdowns
    }
}

impl DeviceLibrary for MockLibrary {
    type Camera = MockTransport;

    fn startup(&self) -> DeviceResult<()> {
        let mut state = lock(&self.state);
        state.startups += 1;
        state.startup_failure.map_or(Ok(()), Err)
    }

    fn shutdown(&self) {
        lock(&self.state).shutdowns += 1;
    }

    fn open_by_address(&self, address: &str) -> DeviceResult<MockTransport> {
        let library = lock(&self.state);
        if let Some(err) = library.startup_failure {
            return Err(err);
        }
        let camera = library.cameras.get(address).ok_or(DeviceError::NotFound)?;

        let mut state = lock(camera);
        if state.open {
            return Err(DeviceError::AccessDenied);
        }
        state.open = true;

        Ok(MockTransport {
            state: Arc::clone(camera),
        })
    }
}

/// An opened mock camera.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<CameraState>>,
}

impl MockTransport {
    fn call<R, F>(&self, call: DeviceCall, op: F) -> DeviceResult<R>
    where
        F: FnOnce(&mut CameraState) -> DeviceResult<R>,
    {
        let mut state = lock(&self.state);
        state.calls.push(call);
        if !state.open {
            return Err(DeviceError::BadHandle);
        }
        op(&mut state)
    }
}

impl CameraTransport for MockTransport {
    fn close(&mut self) {
        let _ = self.call(DeviceCall::Close, |state| {
            state.open = false;
            state.session = false;
            state.acquiring = false;
            state.queue.clear();
            Ok(())
        });
    }

    fn enum_get(&mut self, attribute: EnumAttribute) -> DeviceResult<String> {
        self.call(DeviceCall::EnumGet(attribute), |state| {
            state.enums.get(&attribute).cloned().ok_or(DeviceError::NotFound)
        })
    }

    fn enum_set(&mut self, attribute: EnumAttribute, value: &str) -> DeviceResult<()> {
        self.call(DeviceCall::EnumSet(attribute, value.to_owned()), |state| {
            if let Some(err) = state.enum_rejections.get(&attribute) {
                return Err(*err);
            }
            if attribute == EnumAttribute::PixelFormat && value.parse::<PixelFormat>().is_err() {
                return Err(DeviceError::BadParameter);
            }
            state.enums.insert(attribute, value.to_owned());
            Ok(())
        })
    }

    fn uint_get(&mut self, attribute: UintAttribute) -> DeviceResult<u32> {
        self.call(DeviceCall::UintGet(attribute), |state| {
            if attribute == UintAttribute::TotalBytesPerFrame {
                return state.total_bytes();
            }
            state.uints.get(&attribute).copied().ok_or(DeviceError::NotFound)
        })
    }

    fn uint_set(&mut self, attribute: UintAttribute, value: u32) -> DeviceResult<()> {
        self.call(DeviceCall::UintSet(attribute, value), |state| {
            if attribute == UintAttribute::TotalBytesPerFrame {
                return Err(DeviceError::Forbidden);
            }
            if let Some(err) = state.uint_rejections.get(&attribute) {
                return Err(*err);
            }
            if let Some(&(min, max)) = state.ranges.get(&attribute) {
                if value < min || value > max {
                    return Err(DeviceError::OutOfRange);
                }
            }
            state.uints.insert(attribute, value);
            Ok(())
        })
    }

    fn uint_range(&mut self, attribute: UintAttribute) -> DeviceResult<(u32, u32)> {
        self.call(DeviceCall::UintRange(attribute), |state| {
            Ok(state.ranges.get(&attribute).copied().unwrap_or((0, u32::MAX)))
        })
    }

    fn run_command(&mut self, command: Command) -> DeviceResult<()> {
        self.call(DeviceCall::Command(command), |state| {
            if let Some(err) = state.command_failures.get(&command) {
                return Err(*err);
            }
            state.acquiring = command == Command::AcquisitionStart;
            Ok(())
        })
    }

    fn capture_start(&mut self) -> DeviceResult<()> {
        self.call(DeviceCall::CaptureStart, |state| {
            if let Some(err) = state.capture_start_failure {
                return Err(err);
            }
            if state.session {
                return Err(DeviceError::BadSequence);
            }
            state.session = true;
            state.sessions_opened += 1;
            Ok(())
        })
    }

    fn capture_end(&mut self) -> DeviceResult<()> {
        self.call(DeviceCall::CaptureEnd, |state| {
            state.session = false;
            state.queue.clear();
            Ok(())
        })
    }

    fn queue_frame(&mut self, slot: usize, capacity: usize) -> DeviceResult<()> {
        self.call(DeviceCall::QueueFrame { slot, capacity }, |state| {
            if !state.session {
                return Err(DeviceError::BadSequence);
            }
            let required = usize::try_from(state.total_bytes()?).unwrap_or(usize::MAX);
            if capacity < required {
                return Err(DeviceError::BufferTooSmall);
            }
            if state.queue.contains(&slot) {
                return Err(DeviceError::BadParameter);
            }
            state.queue.push_back(slot);
            state.queued_slots.push(slot);
            Ok(())
        })
    }

    fn wait_frame_done(
        &mut self,
        slot: usize,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> DeviceResult<FrameInfo> {
        self.call(DeviceCall::WaitFrame { slot, timeout }, |state| {
            state.wait(slot, buffer)
        })
    }

    fn clear_queue(&mut self) -> DeviceResult<()> {
        self.call(DeviceCall::ClearQueue, |state| {
            state.queue.clear();
            Ok(())
        })
    }
}
