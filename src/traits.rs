//! Core traits and types for the vendor device boundary.
//!
//! The vendor library speaks in free-form attribute names. Everything above this module
//! uses the closed enums defined here instead, so an unsupported attribute cannot be
//! addressed at all.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DeviceResult;

/// Pixel layout reported by the device for a completed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PixelFormat {
    /// 8-bit monochrome, one byte per pixel.
    Mono8,
    /// 8-bit blue, green, red, three bytes per pixel.
    Bgr24,
    /// 8-bit red, green, blue, three bytes per pixel.
    Rgb24,
    /// 16-bit monochrome.
    Mono16,
    /// 8-bit raw Bayer mosaic.
    Bayer8,
    /// 4:2:2 packed YUV.
    Yuv422,
}

impl PixelFormat {
    /// Name of the format as used by the device.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mono8 => "Mono8",
            Self::Bgr24 => "Bgr24",
            Self::Rgb24 => "Rgb24",
            Self::Mono16 => "Mono16",
            Self::Bayer8 => "Bayer8",
            Self::Yuv422 => "Yuv422",
        }
    }

    /// Channel count for the 8-bit layouts that decode without conversion.
    ///
    /// Returns `None` for formats that cannot be viewed directly as an image.
    #[must_use]
    pub const fn channels(self) -> Option<u32> {
        match self {
            Self::Mono8 => Some(1),
            Self::Bgr24 | Self::Rgb24 => Some(3),
            Self::Mono16 | Self::Bayer8 | Self::Yuv422 => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Mono8" => Ok(Self::Mono8),
            "Bgr24" => Ok(Self::Bgr24),
            "Rgb24" => Ok(Self::Rgb24),
            "Mono16" => Ok(Self::Mono16),
            "Bayer8" => Ok(Self::Bayer8),
            "Yuv422" => Ok(Self::Yuv422),
            other => Err(UnknownValue(other.to_owned())),
        }
    }
}

/// A value string that does not name any known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownValue {}

/// Enumerated device attributes this component reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumAttribute {
    /// Continuous, single frame, multi frame or recorder acquisition.
    AcquisitionMode,
    /// Exposure control mode.
    ExposureMode,
    /// How the start of each frame is triggered.
    FrameStartTriggerMode,
    /// Gain control mode.
    GainMode,
    /// White balance control mode.
    WhitebalMode,
    /// Pixel format of delivered frames.
    PixelFormat,
    /// Horizontal mirroring, "On" or "Off".
    MirrorX,
}

impl EnumAttribute {
    /// Attribute name understood by the device.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AcquisitionMode => "AcquisitionMode",
            Self::ExposureMode => "ExposureMode",
            Self::FrameStartTriggerMode => "FrameStartTriggerMode",
            Self::GainMode => "GainMode",
            Self::WhitebalMode => "WhitebalMode",
            Self::PixelFormat => "PixelFormat",
            Self::MirrorX => "MirrorX",
        }
    }
}

/// Unsigned integer device attributes this component reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UintAttribute {
    /// Exposure time in microseconds.
    ExposureValue,
    /// Size in bytes of one complete frame with the current settings.
    TotalBytesPerFrame,
    /// Sensor gain in dB.
    GainValue,
    /// Red gain as a percentage of the camera default.
    WhitebalValueRed,
    /// Blue gain as a percentage of the camera default.
    WhitebalValueBlue,
    /// ROI width in pixels.
    Width,
    /// ROI height in pixels.
    Height,
    /// ROI left edge.
    RegionX,
    /// ROI top edge.
    RegionY,
    /// Horizontal binning factor.
    BinningX,
    /// Vertical binning factor.
    BinningY,
}

impl UintAttribute {
    /// Attribute name understood by the device.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ExposureValue => "ExposureValue",
            Self::TotalBytesPerFrame => "TotalBytesPerFrame",
            Self::GainValue => "GainValue",
            Self::WhitebalValueRed => "WhitebalValueRed",
            Self::WhitebalValueBlue => "WhitebalValueBlue",
            Self::Width => "Width",
            Self::Height => "Height",
            Self::RegionX => "RegionX",
            Self::RegionY => "RegionY",
            Self::BinningX => "BinningX",
            Self::BinningY => "BinningY",
        }
    }
}

/// Device commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Begin acquiring frames.
    AcquisitionStart,
    /// Stop acquiring frames.
    AcquisitionStop,
}

impl Command {
    /// Command name understood by the device.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AcquisitionStart => "AcquisitionStart",
            Self::AcquisitionStop => "AcquisitionStop",
        }
    }
}

/// Completion status the device attaches to a frame.
///
/// This is separate from the outcome of the wait itself: a wait can succeed and still
/// hand back a frame whose data was lost in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    /// No frame has completed in this buffer yet.
    #[default]
    Pending,
    /// The frame is complete and its data valid.
    Complete,
    /// The frame completed with an error.
    Failed(crate::error::DeviceError),
}

/// Metadata the device reports for a completed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout of the buffer contents.
    pub format: PixelFormat,
    /// Bytes written into the buffer.
    pub populated: usize,
    /// Device frame counter.
    pub frame_count: u64,
    /// Completion status.
    pub status: FrameStatus,
}

/// Process-wide vendor device library.
///
/// The library holds global state: it is started once before any camera is opened and
/// shut down once after the last camera is gone. Use [`crate::device::SharedLibrary`]
/// rather than calling `startup`/`shutdown` directly.
pub trait DeviceLibrary {
    /// Per-camera connection produced by this library.
    type Camera: CameraTransport;

    /// Initialize the library for this process.
    fn startup(&self) -> DeviceResult<()>;

    /// Tear the library down for this process.
    fn shutdown(&self);

    /// Open the camera at the given network address with master access.
    fn open_by_address(&self, address: &str) -> DeviceResult<Self::Camera>;
}

/// Abstraction over one opened camera connection.
pub trait CameraTransport {
    /// Close the connection. Further calls fail with `BadHandle`.
    fn close(&mut self);

    /// Read an enumerated attribute.
    fn enum_get(&mut self, attribute: EnumAttribute) -> DeviceResult<String>;

    /// Write an enumerated attribute.
    fn enum_set(&mut self, attribute: EnumAttribute, value: &str) -> DeviceResult<()>;

    /// Read an unsigned integer attribute.
    fn uint_get(&mut self, attribute: UintAttribute) -> DeviceResult<u32>;

    /// Write an unsigned integer attribute.
    fn uint_set(&mut self, attribute: UintAttribute, value: u32) -> DeviceResult<()>;

    /// Query the valid `(min, max)` range of an unsigned integer attribute.
    fn uint_range(&mut self, attribute: UintAttribute) -> DeviceResult<(u32, u32)>;

    /// Run a device command.
    fn run_command(&mut self, command: Command) -> DeviceResult<()>;

    /// Open the host side of the capture stream.
    fn capture_start(&mut self) -> DeviceResult<()>;

    /// Close the host side of the capture stream, dropping any queued frames.
    fn capture_end(&mut self) -> DeviceResult<()>;

    /// Queue the buffer in `slot`, of `capacity` bytes, to receive the next frame.
    fn queue_frame(&mut self, slot: usize, capacity: usize) -> DeviceResult<()>;

    /// Block until the frame queued in `slot` completes, writing its data to `buffer`.
    ///
    /// `timeout` of `None` waits without bound.
    fn wait_frame_done(
        &mut self,
        slot: usize,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> DeviceResult<FrameInfo>;

    /// Withdraw every frame still queued.
    fn clear_queue(&mut self) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("Mono8".parse::<PixelFormat>(), Ok(PixelFormat::Mono8));
        assert_eq!("Bgr24".parse::<PixelFormat>(), Ok(PixelFormat::Bgr24));
        assert!("Bgr32".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_pixel_format_channels() {
        assert_eq!(PixelFormat::Mono8.channels(), Some(1));
        assert_eq!(PixelFormat::Bgr24.channels(), Some(3));
        assert_eq!(PixelFormat::Rgb24.channels(), Some(3));
        assert_eq!(PixelFormat::Mono16.channels(), None);
    }

    #[test]
    fn test_attribute_names() {
        assert_eq!(EnumAttribute::FrameStartTriggerMode.name(), "FrameStartTriggerMode");
        assert_eq!(UintAttribute::TotalBytesPerFrame.name(), "TotalBytesPerFrame");
        assert_eq!(Command::AcquisitionStart.name(), "AcquisitionStart");
    }
}
