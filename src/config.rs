//! Component settings: typed cells with change listeners, and the TOML file they load from.
//!
//! Assigning a [`Setting`] only changes the local value and notifies listeners. Pushing a
//! live-mutable value to the device is a separate, explicit call on the camera
//! (`apply_acquisition_mode`, `apply_exposure`), so the device write and its failure
//! handling are visible where they happen.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::buffer::BufferDepth;
use crate::error::{DeviceError, Result};
use crate::traits::{PixelFormat, UnknownValue};

/// Wait bound used by the triggered variant when no exposure time is configured.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Triggered waits are bounded to this many exposure times.
pub const WAIT_EXPOSURE_FACTOR: f64 = 5000.0;

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Value string understood by the device.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(UnknownValue(other.to_owned())),
                }
            }
        }
    };
}

named_enum! {
    /// How the device acquires frames once started.
    #[derive(Default)]
    pub enum AcquisitionMode {
        /// Free-running, frames are produced back to back.
        #[default]
        Continuous => "Continuous",
        /// One frame per acquisition-start command.
        SingleFrame => "SingleFrame",
        /// A fixed number of frames per acquisition-start command.
        MultiFrame => "MultiFrame",
        /// Frames are recorded into camera memory.
        Recorder => "Recorder",
    }
}

named_enum! {
    /// Exposure control mode.
    #[derive(Default)]
    pub enum ExposureMode {
        /// Leave the device's exposure settings untouched.
        #[default]
        Unset => "",
        /// Fixed exposure time from `image.exposure.value`.
        Manual => "Manual",
        /// Continuous automatic exposure.
        Auto => "Auto",
        /// Automatic exposure once, then hold.
        AutoOnce => "AutoOnce",
        /// Exposure controlled by an external signal.
        External => "External",
    }
}

named_enum! {
    /// Gain and white-balance control mode.
    pub enum ControlMode {
        /// Fixed value from the configuration.
        Manual => "Manual",
        /// Continuous automatic adjustment.
        Auto => "Auto",
        /// Automatic adjustment once, then hold.
        AutoOnce => "AutoOnce",
    }
}

/// Runtime variant of the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Every grab queues a frame and waits without bound.
    #[default]
    Continuous,
    /// Grabs are gated by the acquisition mode and pending triggers, waits are bounded.
    Triggered,
}

/// Convert an exposure time in seconds to the device's microsecond unit.
///
/// Returns `None` for negative, non-finite or oversized values.
#[must_use]
pub fn exposure_to_device(seconds: f64) -> Option<u32> {
    let micros = (seconds * 1_000_000.0).round();
    if !micros.is_finite() || micros < 0.0 || micros > f64::from(u32::MAX) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(micros as u32)
}

/// Convert a device exposure value in microseconds back to seconds.
#[must_use]
pub fn exposure_from_device(micros: u32) -> f64 {
    f64::from(micros) / 1_000_000.0
}

/// Bound on a triggered frame wait for the given exposure time.
#[must_use]
pub fn wait_timeout(exposure_seconds: f64) -> Duration {
    if exposure_seconds.is_finite() && exposure_seconds > 0.0 {
        Duration::try_from_secs_f64(exposure_seconds * WAIT_EXPOSURE_FACTOR / 1000.0)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT)
    } else {
        DEFAULT_WAIT_TIMEOUT
    }
}

type Listener<T> = Box<dyn FnMut(&T, &T) + Send>;

/// A named, typed configuration value.
///
/// Listeners registered with [`Setting::on_change`] run synchronously on every
/// assignment and receive the old and new value.
pub struct Setting<T> {
    name: &'static str,
    value: T,
    listeners: Vec<Listener<T>>,
    diverged: Option<DeviceError>,
}

impl<T: fmt::Debug> fmt::Debug for Setting<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setting")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("listeners", &self.listeners.len())
            .field("diverged", &self.diverged)
            .finish()
    }
}

impl<T> Setting<T> {
    /// Create a setting with its initial value.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            value,
            listeners: Vec::new(),
            diverged: None,
        }
    }

    /// Configuration key of the setting.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Current local value.
    pub const fn get(&self) -> &T {
        &self.value
    }

    /// Register a listener for value changes.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(&T, &T) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Assign a new value, notify listeners and return the previous value.
    pub fn set(&mut self, value: T) -> T {
        let old = std::mem::replace(&mut self.value, value);
        for listener in &mut self.listeners {
            listener(&old, &self.value);
        }
        old
    }

    /// Device error from the last rejected push, if the device disagrees with this value.
    pub const fn diverged(&self) -> Option<DeviceError> {
        self.diverged
    }

    /// Whether the last push of this value was rejected by the device.
    pub const fn is_diverged(&self) -> bool {
        self.diverged.is_some()
    }

    pub(crate) fn mark_synced(&mut self) {
        self.diverged = None;
    }

    pub(crate) fn mark_diverged(&mut self, error: DeviceError) {
        self.diverged = Some(error);
    }
}

impl<T: Clone> Setting<T> {
    /// Copy of the current value.
    pub fn value(&self) -> T {
        self.value.clone()
    }
}

/// One external assignment from the host's configuration store.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingUpdate {
    /// `device.address`, read at init only.
    DeviceAddress(String),
    /// `acquisition.mode`, pushed to the device immediately.
    AcquisitionMode(AcquisitionMode),
    /// `image.exposure.mode`, read at init only.
    ExposureMode(ExposureMode),
    /// `image.exposure.value` in seconds, pushed to the device immediately in Manual mode.
    ExposureValue(f64),
}

/// Manual gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GainConfig {
    /// Gain control mode.
    pub mode: ControlMode,
    /// Gain in dB, used in Manual mode.
    #[serde(default)]
    pub value: u32,
}

/// White balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WhiteBalanceConfig {
    /// White balance control mode.
    pub mode: ControlMode,
    /// Red gain in percent of the camera default, used in Manual mode.
    #[serde(default = "default_balance")]
    pub red: u32,
    /// Blue gain in percent of the camera default, used in Manual mode.
    #[serde(default = "default_balance")]
    pub blue: u32,
}

const fn default_balance() -> u32 {
    50
}

/// Image format and region of interest. Unset fields keep the device's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Pixel format of delivered frames.
    pub pixel_format: Option<PixelFormat>,
    /// Horizontal mirroring.
    pub mirror_x: Option<bool>,
    /// ROI width.
    pub width: Option<u32>,
    /// ROI height.
    pub height: Option<u32>,
    /// ROI left edge.
    pub region_x: Option<u32>,
    /// ROI top edge.
    pub region_y: Option<u32>,
}

/// Binning factors. Unset fields keep the device's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// Horizontal factor.
    pub x: Option<u32>,
    /// Vertical factor.
    pub y: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DeviceSection {
    address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AcquisitionSection {
    mode: AcquisitionMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ExposureSection {
    mode: ExposureMode,
    value: f64,
}

impl Default for ExposureSection {
    fn default() -> Self {
        Self {
            mode: ExposureMode::Unset,
            value: -1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ImageSection {
    exposure: ExposureSection,
    gain: Option<GainConfig>,
    white_balance: Option<WhiteBalanceConfig>,
    format: FormatConfig,
    binning: BinningConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ComponentSection {
    variant: Variant,
    buffers: BufferDepth,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    device: DeviceSection,
    acquisition: AcquisitionSection,
    image: ImageSection,
    component: ComponentSection,
}

/// Static configuration of one camera component.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Network address of the camera. Empty means none configured.
    pub address: String,
    /// Acquisition mode.
    pub acquisition_mode: AcquisitionMode,
    /// Exposure control mode.
    pub exposure_mode: ExposureMode,
    /// Exposure time in seconds, used in Manual mode. Negative means unset.
    pub exposure_value: f64,
    /// Gain settings.
    pub gain: Option<GainConfig>,
    /// White balance settings.
    pub white_balance: Option<WhiteBalanceConfig>,
    /// Image format and ROI.
    pub format: FormatConfig,
    /// Binning.
    pub binning: BinningConfig,
    /// Runtime variant.
    pub variant: Variant,
    /// Number of frame buffers.
    pub buffers: BufferDepth,
}

impl Default for CameraConfig {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}

impl From<ConfigFile> for CameraConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            address: file.device.address,
            acquisition_mode: file.acquisition.mode,
            exposure_mode: file.image.exposure.mode,
            exposure_value: file.image.exposure.value,
            gain: file.image.gain,
            white_balance: file.image.white_balance,
            format: file.image.format,
            binning: file.image.binning,
            variant: file.component.variant,
            buffers: file.component.buffers,
        }
    }
}

impl CameraConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.into())
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Set the camera address.
    #[must_use]
    pub fn with_address<S: Into<String>>(mut self, address: S) -> Self {
        self.address = address.into();
        self
    }

    /// Set the acquisition mode.
    #[must_use]
    pub const fn with_acquisition_mode(mut self, mode: AcquisitionMode) -> Self {
        self.acquisition_mode = mode;
        self
    }

    /// Set the exposure mode and value.
    #[must_use]
    pub const fn with_exposure(mut self, mode: ExposureMode, seconds: f64) -> Self {
        self.exposure_mode = mode;
        self.exposure_value = seconds;
        self
    }

    /// Set the runtime variant.
    #[must_use]
    pub const fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the number of frame buffers.
    #[must_use]
    pub const fn with_buffers(mut self, buffers: BufferDepth) -> Self {
        self.buffers = buffers;
        self
    }
}

/// The externally mutable settings of a running component.
#[derive(Debug)]
pub struct Settings {
    /// `device.address`
    pub address: Setting<String>,
    /// `acquisition.mode`
    pub acquisition_mode: Setting<AcquisitionMode>,
    /// `image.exposure.mode`
    pub exposure_mode: Setting<ExposureMode>,
    /// `image.exposure.value`
    pub exposure_value: Setting<f64>,
}

impl Settings {
    /// Build the settings cells from a static configuration.
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            address: Setting::new("device.address", config.address.clone()),
            acquisition_mode: Setting::new("acquisition.mode", config.acquisition_mode),
            exposure_mode: Setting::new("image.exposure.mode", config.exposure_mode),
            exposure_value: Setting::new("image.exposure.value", config.exposure_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_defaults() {
        let config = CameraConfig::default();
        assert_eq!(config.address, "");
        assert_eq!(config.acquisition_mode, AcquisitionMode::Continuous);
        assert_eq!(config.exposure_mode, ExposureMode::Unset);
        assert!(config.exposure_value < 0.0);
        assert_eq!(config.variant, Variant::Continuous);
        assert_eq!(config.buffers, BufferDepth::Double);
    }

    #[test]
    fn test_parse_full_file() {
        let text = r#"
            [device]
            address = "192.168.1.2"

            [acquisition]
            mode = "SingleFrame"

            [image.exposure]
            mode = "Manual"
            value = 0.01

            [image.gain]
            mode = "Manual"
            value = 6

            [image.white_balance]
            mode = "Auto"

            [image.format]
            pixel_format = "Bgr24"
            width = 640
            height = 480

            [image.binning]
            x = 2

            [component]
            variant = "triggered"
            buffers = "single"
        "#;

        let config = CameraConfig::from_toml_str(text).expect("config should parse");
        assert_eq!(config.address, "192.168.1.2");
        assert_eq!(config.acquisition_mode, AcquisitionMode::SingleFrame);
        assert_eq!(config.exposure_mode, ExposureMode::Manual);
        assert!((config.exposure_value - 0.01).abs() < f64::EPSILON);
        assert_eq!(
            config.gain,
            Some(GainConfig {
                mode: ControlMode::Manual,
                value: 6
            })
        );
        assert_eq!(config.white_balance.map(|wb| wb.red), Some(50));
        assert_eq!(config.format.pixel_format, Some(PixelFormat::Bgr24));
        assert_eq!(config.format.width, Some(640));
        assert_eq!(config.format.region_x, None);
        assert_eq!(config.binning, BinningConfig { x: Some(2), y: None });
        assert_eq!(config.variant, Variant::Triggered);
        assert_eq!(config.buffers, BufferDepth::Single);
    }

    #[test]
    fn test_empty_exposure_mode_string() {
        let text = "[image.exposure]\nmode = \"\"\n";
        let config = CameraConfig::from_toml_str(text).expect("config should parse");
        assert_eq!(config.exposure_mode, ExposureMode::Unset);
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let text = "[acquisition]\nmode = \"Sometimes\"\n";
        assert!(CameraConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_exposure_conversion() {
        assert_eq!(exposure_to_device(0.01), Some(10_000));
        assert_eq!(exposure_to_device(0.000_5), Some(500));
        assert_eq!(exposure_to_device(-1.0), None);
        assert_eq!(exposure_to_device(f64::NAN), None);
        assert_eq!(exposure_to_device(1.0e9), None);
        assert!((exposure_from_device(250_000) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wait_timeout_scales_with_exposure() {
        assert_eq!(wait_timeout(0.01), Duration::from_millis(50));
        assert_eq!(wait_timeout(0.2), Duration::from_secs(1));
        assert_eq!(wait_timeout(-1.0), DEFAULT_WAIT_TIMEOUT);
        assert_eq!(wait_timeout(0.0), DEFAULT_WAIT_TIMEOUT);
    }

    #[test]
    fn test_setting_notifies_listeners() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut setting = Setting::new("acquisition.mode", AcquisitionMode::Continuous);

        let log = Arc::clone(&seen);
        setting.on_change(move |old, new| {
            log.lock().expect("lock").push((*old, *new));
        });

        let old = setting.set(AcquisitionMode::SingleFrame);
        assert_eq!(old, AcquisitionMode::Continuous);
        assert_eq!(*setting.get(), AcquisitionMode::SingleFrame);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![(AcquisitionMode::Continuous, AcquisitionMode::SingleFrame)]
        );
    }

    #[test]
    fn test_setting_divergence_flag() {
        let mut setting = Setting::new("image.exposure.value", 0.01);
        assert!(!setting.is_diverged());

        setting.mark_diverged(DeviceError::OutOfRange);
        assert_eq!(setting.diverged(), Some(DeviceError::OutOfRange));

        setting.mark_synced();
        assert!(!setting.is_diverged());
    }
}
