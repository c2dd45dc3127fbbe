//! gige-capture: frame acquisition adapter for GigE image sensors.
//!
//! The crate wraps a vendor camera library behind a small capability trait and drives it
//! with a capture state machine that hosts call serially:
//! `init → start → grab* → stop → finish`.
//!
//! - [`device`] reference-counts the process-wide library and hands out device handles.
//! - [`buffer`] owns the frame buffers and the double-buffer slot rotation.
//! - [`frame`] views completed buffers as images without copying.
//! - [`camera`] is the component itself, including live configuration pushes.
//! - [`port`] connects the component to trigger sources and frame consumers.
//!
//! With the `mock` feature an in-memory device library is available for tests, and the
//! `v4l2` feature adds a transport for Linux V4L2 devices.

pub mod buffer;
pub mod camera;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod port;
pub mod traits;
pub mod validation;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use buffer::{BufferDepth, BufferPool, FrameDescriptor};
pub use camera::{CaptureState, Component, FrameDrop, GigeCamera, GrabOutcome};
pub use config::{
    AcquisitionMode, CameraConfig, ControlMode, ExposureMode, Setting, SettingUpdate, Settings,
    Variant,
};
pub use device::{DeviceHandle, LibraryLease, SharedLibrary};
pub use error::{CameraError, DeviceError, Result};
pub use frame::{FrameImage, FrameView, OwnedFrame};
pub use port::{trigger_channel, ChannelSink, FrameSink, TriggerReceiver, TriggerSender};
pub use traits::{CameraTransport, DeviceLibrary, PixelFormat};
