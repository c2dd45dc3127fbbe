//! Error types for device and component operations.
//!
//! Two layers exist:
//!
//! - [`DeviceError`] is a status code reported by the vendor device library for a single
//!   call (attribute access, command, queue or wait). Most of them are logged and
//!   tolerated by the capture state machine.
//! - [`CameraError`] is a failure of a component operation as seen by its caller, such as
//!   an init that could not open the camera or a lifecycle call made in the wrong state.

use thiserror::Error;

use crate::camera::CaptureState;

/// Status code returned by the vendor device library.
///
/// The display text is the vendor's diagnostic message for the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DeviceError {
    /// Unexpected camera fault.
    #[error("Unexpected camera fault")]
    CameraFault,
    /// Unexpected fault in the device library or driver.
    #[error("Unexpected fault in device library or driver")]
    InternalFault,
    /// Camera handle is invalid.
    #[error("Camera handle is invalid")]
    BadHandle,
    /// Bad parameter to an API call.
    #[error("Bad parameter to API call")]
    BadParameter,
    /// Sequence of API calls is incorrect.
    #[error("Sequence of API calls is incorrect")]
    BadSequence,
    /// Camera or attribute not found.
    #[error("Camera or attribute not found")]
    NotFound,
    /// Camera cannot be opened in the specified mode.
    #[error("Camera cannot be opened in the specified mode")]
    AccessDenied,
    /// Camera was unplugged.
    #[error("Camera was unplugged")]
    Unplugged,
    /// Setup is invalid (an attribute is invalid).
    #[error("Setup is invalid (an attribute is invalid)")]
    InvalidSetup,
    /// System or network resources or memory not available.
    #[error("System/network resources or memory not available")]
    Resources,
    /// Bandwidth not available.
    #[error("Bandwidth not available")]
    Bandwidth,
    /// Too many frames on queue.
    #[error("Too many frames on queue")]
    QueueFull,
    /// Frame buffer is too small.
    #[error("Frame buffer is too small")]
    BufferTooSmall,
    /// Frame cancelled by user.
    #[error("Frame cancelled by user")]
    Cancelled,
    /// The data for the frame was lost.
    #[error("The data for the frame was lost")]
    DataLost,
    /// Some data in the frame is missing.
    #[error("Some data in the frame is missing")]
    DataMissing,
    /// Timeout during wait.
    #[error("Timeout during wait")]
    Timeout,
    /// Attribute value is out of the expected range.
    #[error("Attribute value is out of the expected range")]
    OutOfRange,
    /// Attribute is not this type (wrong access function).
    #[error("Attribute is not this type (wrong access function)")]
    WrongType,
    /// Attribute write forbidden at this time.
    #[error("Attribute write forbidden at this time")]
    Forbidden,
    /// Attribute is not available at this time.
    #[error("Attribute is not available at this time")]
    Unavailable,
    /// A firewall is blocking the traffic.
    #[error("A firewall is blocking the traffic")]
    Firewall,
}

/// Result type for vendor device calls.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Error type for component operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Init was requested without a configured device address.
    #[error("no device address configured")]
    NoAddress,

    /// The camera at the configured address could not be opened.
    #[error("unable to open camera on address {address}: {source}")]
    Open {
        /// Address used for the lookup.
        address: String,
        /// Vendor status.
        source: DeviceError,
    },

    /// The per-frame byte size could not be read, so no buffer can be sized.
    #[error("camera init failed: total bytes per frame unavailable: {0}")]
    FrameSize(DeviceError),

    /// The device reported a per-frame byte size of zero.
    #[error("camera init failed: device reported an empty frame size")]
    EmptyFrame,

    /// A lifecycle operation was called in a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        /// The rejected operation.
        operation: &'static str,
        /// State the component was in.
        state: CaptureState,
    },

    /// The capture session could not be started.
    #[error("capture start failed: {source}")]
    Start {
        /// Vendor status of the failing call.
        source: DeviceError,
        /// Whether an opened capture session had to be torn down again.
        rolled_back: bool,
    },

    /// A live configuration push was rejected by the device.
    #[error("device rejected {attribute} = {value}: {source}")]
    Rejected {
        /// Device attribute name.
        attribute: &'static str,
        /// Value that was pushed, formatted for display.
        value: String,
        /// Vendor status.
        source: DeviceError,
    },

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for component operations.
pub type Result<T> = std::result::Result<T, CameraError>;
