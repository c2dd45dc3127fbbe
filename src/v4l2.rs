//! Device transport over Linux V4L2 using the v4l crate.
//!
//! Lets the capture component run against UVC cameras and the vivid virtual driver.
//! Attributes map onto V4L2 controls and the capture format; the acquisition mode has no
//! V4L2 equivalent and is emulated: in SingleFrame mode one frame is delivered per
//! acquisition-start command.
//!
//! Addresses are device paths (`/dev/video0`) or bare indices (`0`).

use std::io;
use std::time::Duration;

use v4l::buffer::{Flags, Type};
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream as _, Stream as _};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::error::{DeviceError, DeviceResult};
use crate::traits::{
    CameraTransport, Command, DeviceLibrary, EnumAttribute, FrameInfo, FrameStatus, PixelFormat,
    UintAttribute,
};

/// Number of mmap buffers handed to the driver.
const STREAM_BUFFERS: u32 = 2;

// V4L2 control ids.
const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const CID_RED_BALANCE: u32 = 0x0098_090e;
const CID_BLUE_BALANCE: u32 = 0x0098_090f;
const CID_AUTOGAIN: u32 = 0x0098_0912;
const CID_GAIN: u32 = 0x0098_0913;
const CID_HFLIP: u32 = 0x0098_0914;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// `V4L2_CID_EXPOSURE_ABSOLUTE` counts in 100 µs steps.
const EXPOSURE_STEP_MICROS: u32 = 100;

// Linux errno values reported through `io::Error`.
const EPERM: i32 = 1;
const ENOENT: i32 = 2;
const EIO: i32 = 5;
const EACCES: i32 = 13;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ERANGE: i32 = 34;

fn device_error(err: &io::Error) -> DeviceError {
    match err.raw_os_error() {
        Some(ERANGE) => DeviceError::OutOfRange,
        Some(EINVAL) => DeviceError::BadParameter,
        Some(EACCES) => DeviceError::AccessDenied,
        Some(EPERM | EBUSY) => DeviceError::Forbidden,
        Some(ENOENT) => DeviceError::NotFound,
        Some(ENODEV) => DeviceError::Unplugged,
        Some(EIO) => DeviceError::DataLost,
        _ if err.kind() == io::ErrorKind::TimedOut => DeviceError::Timeout,
        _ => DeviceError::InternalFault,
    }
}

fn pixel_format(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"GREY" => Some(PixelFormat::Mono8),
        b"BGR3" => Some(PixelFormat::Bgr24),
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"Y16 " => Some(PixelFormat::Mono16),
        b"BA81" | b"GBRG" | b"GRBG" | b"RGGB" => Some(PixelFormat::Bayer8),
        b"YUYV" => Some(PixelFormat::Yuv422),
        _ => None,
    }
}

const fn fourcc(format: PixelFormat) -> FourCC {
    FourCC {
        repr: *match format {
            PixelFormat::Mono8 => b"GREY",
            PixelFormat::Bgr24 => b"BGR3",
            PixelFormat::Rgb24 => b"RGB3",
            PixelFormat::Mono16 => b"Y16 ",
            PixelFormat::Bayer8 => b"BA81",
            PixelFormat::Yuv422 => b"YUYV",
        },
    }
}

/// The V4L2 subsystem as a device library. It needs no process-wide setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Library;

impl V4l2Library {
    /// Create the library.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DeviceLibrary for V4l2Library {
    type Camera = V4l2Camera;

    fn startup(&self) -> DeviceResult<()> {
        Ok(())
    }

    fn shutdown(&self) {}

    fn open_by_address(&self, address: &str) -> DeviceResult<V4l2Camera> {
        let opened = match address.parse::<usize>() {
            Ok(index) => Device::new(index),
            Err(_) => Device::with_path(address),
        };
        let device = opened.map_err(|err| {
            tracing::debug!(address, error = %err, "v4l2 open failed");
            device_error(&err)
        })?;

        let caps = device.query_caps().map_err(|err| device_error(&err))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE)
            || !caps.capabilities.contains(v4l::capability::Flags::STREAMING)
        {
            return Err(DeviceError::InvalidSetup);
        }
        tracing::debug!(address, driver = %caps.driver, card = %caps.card, "v4l2 device opened");

        Ok(V4l2Camera {
            device: Some(device),
            stream: None,
            acquisition_mode: "Continuous".to_owned(),
            acquiring: false,
            queued: None,
        })
    }
}

/// One opened V4L2 capture device.
pub struct V4l2Camera {
    device: Option<Device>,
    stream: Option<Stream<'static>>,
    acquisition_mode: String,
    acquiring: bool,
    queued: Option<usize>,
}

impl V4l2Camera {
    fn device(&self) -> DeviceResult<&Device> {
        self.device.as_ref().ok_or(DeviceError::BadHandle)
    }

    fn format(&self) -> DeviceResult<v4l::Format> {
        self.device()?.format().map_err(|err| device_error(&err))
    }

    fn update_format<F>(&mut self, change: F) -> DeviceResult<()>
    where
        F: FnOnce(&mut v4l::Format),
    {
        if self.stream.is_some() {
            return Err(DeviceError::Forbidden);
        }
        let device = self.device()?;
        let mut format = device.format().map_err(|err| device_error(&err))?;
        change(&mut format);
        device.set_format(&format).map_err(|err| device_error(&err))?;
        Ok(())
    }

    fn control(&self, id: u32) -> DeviceResult<i64> {
        let control = self.device()?.control(id).map_err(|err| device_error(&err))?;
        match control.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            _ => Err(DeviceError::WrongType),
        }
    }

    fn set_control(&self, id: u32, value: i64) -> DeviceResult<()> {
        self.device()?
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|err| device_error(&err))
    }

    fn control_range(&self, id: u32) -> DeviceResult<(i64, i64)> {
        let controls = self.device()?.query_controls().map_err(|err| device_error(&err))?;
        controls
            .iter()
            .find(|description| description.id == id)
            .map(|description| (description.minimum, description.maximum))
            .ok_or(DeviceError::NotFound)
    }

    fn switch(&self, id: u32, value: &str, on: &str, off: &str) -> DeviceResult<()> {
        match value {
            v if v == on => self.set_control(id, 1),
            v if v == off => self.set_control(id, 0),
            _ => Err(DeviceError::BadParameter),
        }
    }
}

const fn uint_control(attribute: UintAttribute) -> Option<u32> {
    match attribute {
        UintAttribute::ExposureValue => Some(CID_EXPOSURE_ABSOLUTE),
        UintAttribute::GainValue => Some(CID_GAIN),
        UintAttribute::WhitebalValueRed => Some(CID_RED_BALANCE),
        UintAttribute::WhitebalValueBlue => Some(CID_BLUE_BALANCE),
        _ => None,
    }
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

impl CameraTransport for V4l2Camera {
    fn close(&mut self) {
        self.stream = None;
        self.device = None;
        self.acquiring = false;
        self.queued = None;
    }

    fn enum_get(&mut self, attribute: EnumAttribute) -> DeviceResult<String> {
        self.device()?;
        let value = match attribute {
            EnumAttribute::AcquisitionMode => return Ok(self.acquisition_mode.clone()),
            EnumAttribute::FrameStartTriggerMode => "Freerun",
            EnumAttribute::ExposureMode => {
                if self.control(CID_EXPOSURE_AUTO)? == EXPOSURE_MANUAL {
                    "Manual"
                } else {
                    "Auto"
                }
            }
            EnumAttribute::GainMode => {
                if self.control(CID_AUTOGAIN)? == 0 {
                    "Manual"
                } else {
                    "Auto"
                }
            }
            EnumAttribute::WhitebalMode => {
                if self.control(CID_AUTO_WHITE_BALANCE)? == 0 {
                    "Manual"
                } else {
                    "Auto"
                }
            }
            EnumAttribute::MirrorX => {
                if self.control(CID_HFLIP)? == 0 {
                    "Off"
                } else {
                    "On"
                }
            }
            EnumAttribute::PixelFormat => {
                let format = self.format()?;
                return pixel_format(format.fourcc)
                    .map(|format| format.name().to_owned())
                    .ok_or(DeviceError::InvalidSetup);
            }
        };
        Ok(value.to_owned())
    }

    fn enum_set(&mut self, attribute: EnumAttribute, value: &str) -> DeviceResult<()> {
        self.device()?;
        match attribute {
            EnumAttribute::AcquisitionMode => {
                if !matches!(value, "Continuous" | "SingleFrame") {
                    return Err(DeviceError::BadParameter);
                }
                value.clone_into(&mut self.acquisition_mode);
                Ok(())
            }
            EnumAttribute::FrameStartTriggerMode => {
                if value == "Freerun" {
                    Ok(())
                } else {
                    Err(DeviceError::BadParameter)
                }
            }
            EnumAttribute::ExposureMode => match value {
                "Manual" => self.set_control(CID_EXPOSURE_AUTO, EXPOSURE_MANUAL),
                "Auto" => self.set_control(CID_EXPOSURE_AUTO, EXPOSURE_APERTURE_PRIORITY),
                _ => Err(DeviceError::BadParameter),
            },
            EnumAttribute::GainMode => self.switch(CID_AUTOGAIN, value, "Auto", "Manual"),
            EnumAttribute::WhitebalMode => {
                self.switch(CID_AUTO_WHITE_BALANCE, value, "Auto", "Manual")
            }
            EnumAttribute::MirrorX => self.switch(CID_HFLIP, value, "On", "Off"),
            EnumAttribute::PixelFormat => {
                let format = value
                    .parse::<PixelFormat>()
                    .map_err(|_| DeviceError::BadParameter)?;
                self.update_format(|current| current.fourcc = fourcc(format))
            }
        }
    }

    fn uint_get(&mut self, attribute: UintAttribute) -> DeviceResult<u32> {
        match attribute {
            UintAttribute::TotalBytesPerFrame => Ok(self.format()?.size),
            UintAttribute::Width => Ok(self.format()?.width),
            UintAttribute::Height => Ok(self.format()?.height),
            UintAttribute::ExposureValue => {
                Ok(to_u32(self.control(CID_EXPOSURE_ABSOLUTE)?).saturating_mul(EXPOSURE_STEP_MICROS))
            }
            other => {
                let id = uint_control(other).ok_or(DeviceError::NotFound)?;
                Ok(to_u32(self.control(id)?))
            }
        }
    }

    fn uint_set(&mut self, attribute: UintAttribute, value: u32) -> DeviceResult<()> {
        match attribute {
            UintAttribute::TotalBytesPerFrame => Err(DeviceError::Forbidden),
            UintAttribute::Width => self.update_format(|format| format.width = value),
            UintAttribute::Height => self.update_format(|format| format.height = value),
            UintAttribute::ExposureValue => {
                let steps = value / EXPOSURE_STEP_MICROS;
                let (min, max) = self.control_range(CID_EXPOSURE_ABSOLUTE)?;
                if i64::from(steps) < min || i64::from(steps) > max {
                    return Err(DeviceError::OutOfRange);
                }
                self.set_control(CID_EXPOSURE_ABSOLUTE, i64::from(steps))
            }
            other => {
                let id = uint_control(other).ok_or(DeviceError::NotFound)?;
                self.set_control(id, i64::from(value))
            }
        }
    }

    fn uint_range(&mut self, attribute: UintAttribute) -> DeviceResult<(u32, u32)> {
        let id = uint_control(attribute).ok_or(DeviceError::NotFound)?;
        let (min, max) = self.control_range(id)?;
        if attribute == UintAttribute::ExposureValue {
            return Ok((
                to_u32(min).saturating_mul(EXPOSURE_STEP_MICROS),
                to_u32(max).saturating_mul(EXPOSURE_STEP_MICROS),
            ));
        }
        Ok((to_u32(min), to_u32(max)))
    }

    fn run_command(&mut self, command: Command) -> DeviceResult<()> {
        self.device()?;
        self.acquiring = command == Command::AcquisitionStart;
        Ok(())
    }

    fn capture_start(&mut self) -> DeviceResult<()> {
        if self.stream.is_some() {
            return Err(DeviceError::BadSequence);
        }
        let mut stream = Stream::with_buffers(self.device()?, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|err| device_error(&err))?;
        stream.start().map_err(|err| device_error(&err))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn capture_end(&mut self) -> DeviceResult<()> {
        self.queued = None;
        let Some(mut stream) = self.stream.take() else {
            return Err(DeviceError::BadSequence);
        };
        stream.stop().map_err(|err| device_error(&err))
    }

    fn queue_frame(&mut self, slot: usize, capacity: usize) -> DeviceResult<()> {
        if self.stream.is_none() {
            return Err(DeviceError::BadSequence);
        }
        if self.queued.is_some() {
            return Err(DeviceError::QueueFull);
        }
        let required = self.format()?.size as usize;
        if capacity < required {
            return Err(DeviceError::BufferTooSmall);
        }
        self.queued = Some(slot);
        Ok(())
    }

    fn wait_frame_done(
        &mut self,
        slot: usize,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> DeviceResult<FrameInfo> {
        if self.queued != Some(slot) {
            return Err(DeviceError::BadSequence);
        }
        let format = self.format()?;
        let single_frame = self.acquisition_mode == "SingleFrame";
        if single_frame && !self.acquiring {
            if let Some(timeout) = timeout {
                std::thread::sleep(timeout);
            }
            return Err(DeviceError::Timeout);
        }

        let stream = self.stream.as_mut().ok_or(DeviceError::BadSequence)?;
        match timeout {
            Some(timeout) => stream.set_timeout(timeout),
            None => stream.clear_timeout(),
        }
        let (data, meta) = stream.next().map_err(|err| device_error(&err))?;

        let used = (meta.bytesused as usize).min(data.len());
        let populated = used.min(buffer.len());
        if let (Some(target), Some(source)) = (buffer.get_mut(..populated), data.get(..populated)) {
            target.copy_from_slice(source);
        }

        let status = if meta.flags.contains(Flags::ERROR) {
            FrameStatus::Failed(DeviceError::DataMissing)
        } else {
            FrameStatus::Complete
        };
        let info = FrameInfo {
            width: format.width,
            height: format.height,
            format: pixel_format(format.fourcc).ok_or(DeviceError::InvalidSetup)?,
            populated,
            frame_count: u64::from(meta.sequence),
            status,
        };

        self.queued = None;
        if single_frame {
            self.acquiring = false;
        }
        Ok(info)
    }

    fn clear_queue(&mut self) -> DeviceResult<()> {
        self.queued = None;
        Ok(())
    }
}
