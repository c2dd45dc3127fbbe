//! Integration tests against the vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded with two capture devices:
//!   `sudo modprobe vivid n_devs=2 node_types=0x1,0x1`
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! Expected vivid configuration:
//! - First device: Gray Ramp pattern (gradient)
//! - Second device: 100% Colorbar pattern
//!
//! Tests fail, rather than skip, when vivid is not available.

#![cfg(feature = "integration")]

use std::fs;
use std::path::Path;

use gige_capture::traits::{DeviceLibrary, EnumAttribute, UintAttribute};
use gige_capture::v4l2::V4l2Library;
use gige_capture::validation::{validate_color_bars, validate_frame_sequence, validate_gradient};
use gige_capture::{
    AcquisitionMode, CameraConfig, CameraTransport, ChannelSink, GigeCamera, GrabOutcome,
    PixelFormat, SharedLibrary, Variant,
};
use serial_test::serial;

/// Paths of all vivid capture devices, checked through sysfs before opening.
fn find_vivid_devices() -> Vec<String> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    let library = V4l2Library::new();
    let mut devices = Vec::new();
    for index in 0..10 {
        let name_path = video4linux.join(format!("video{index}")).join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };
        if !name.to_lowercase().contains("vivid") {
            continue;
        }

        let path = format!("/dev/video{index}");
        if library.open_by_address(&path).is_ok() {
            devices.push(path);
        }
    }
    devices
}

macro_rules! require_vivid {
    () => {
        match find_vivid_devices().first() {
            Some(path) => path.clone(),
            None => panic!(
                "vivid virtual camera not available.\n\
                 Load vivid with: sudo modprobe vivid n_devs=2 node_types=0x1,0x1\n\
                 Or run unit tests only: cargo test --lib"
            ),
        }
    };
}

/// Returns (gradient device, colorbar device).
macro_rules! require_vivid_pair {
    () => {{
        let devices = find_vivid_devices();
        match devices.as_slice() {
            [gradient, colorbar, ..] => (gradient.clone(), colorbar.clone()),
            _ => panic!(
                "Two vivid devices required but found {}.\n\
                 Load vivid with: sudo modprobe vivid n_devs=2 node_types=0x1,0x1",
                devices.len()
            ),
        }
    }};
}

fn rgb_config(address: &str) -> CameraConfig {
    let mut config = CameraConfig::default().with_address(address);
    config.format.pixel_format = Some(PixelFormat::Rgb24);
    config.format.width = Some(640);
    config.format.height = Some(480);
    config
}

#[test]
#[serial]
fn test_vivid_transport_attributes() {
    let address = require_vivid!();
    let library = V4l2Library::new();
    let mut camera = library.open_by_address(&address).expect("open vivid");
    camera
        .enum_set(EnumAttribute::PixelFormat, "Rgb24")
        .expect("vivid accepts RGB24");
    assert_eq!(
        camera.enum_get(EnumAttribute::PixelFormat).as_deref(),
        Ok("Rgb24")
    );

    let width = camera.uint_get(UintAttribute::Width).expect("width");
    let height = camera.uint_get(UintAttribute::Height).expect("height");
    let size = camera
        .uint_get(UintAttribute::TotalBytesPerFrame)
        .expect("frame size");
    assert!(width > 0 && height > 0);
    assert!(size >= width * height * 3, "{size} < {width}x{height}x3");
    camera.close();
}

#[test]
#[serial]
fn test_vivid_init_sizes_buffers() {
    let address = require_vivid!();
    let library = SharedLibrary::new(V4l2Library::new());
    let mut camera = GigeCamera::new(&library, rgb_config(&address));

    camera.init().expect("init");
    assert_eq!(
        camera.buffers().map(gige_capture::BufferPool::byte_size),
        Some(640 * 480 * 3)
    );
    camera.finish().expect("finish");
}

#[test]
#[serial]
fn test_vivid_continuous_capture() {
    let address = require_vivid!();
    let library = SharedLibrary::new(V4l2Library::new());
    let (sink, frames) = ChannelSink::bounded(16);
    let mut camera = GigeCamera::new(&library, rgb_config(&address)).with_output(sink);

    camera.init().expect("init");
    camera.start().expect("start");

    let mut slots = Vec::new();
    for _ in 0..10 {
        match camera.grab() {
            GrabOutcome::Published { slot, .. } => slots.push(slot),
            other => panic!("unexpected grab outcome {other:?}"),
        }
    }
    camera.stop().expect("stop");
    camera.finish().expect("finish");

    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    let received: Vec<_> = frames.try_iter().collect();
    assert_eq!(received.len(), 10);
    validate_frame_sequence(&received).expect("consecutive frame counters");
}

#[test]
#[serial]
fn test_vivid_triggered_single_frame() {
    let address = require_vivid!();
    let library = SharedLibrary::new(V4l2Library::new());
    let config = rgb_config(&address)
        .with_variant(Variant::Triggered)
        .with_acquisition_mode(AcquisitionMode::SingleFrame);
    let mut camera = GigeCamera::new(&library, config);

    camera.init().expect("init");
    camera.start().expect("start");

    assert_eq!(camera.grab(), GrabOutcome::Gated);
    camera.handle_trigger();
    assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));
    assert_eq!(camera.grab(), GrabOutcome::Gated);

    camera.stop().expect("stop");
    camera.finish().expect("finish");
}

#[test]
#[serial]
fn test_vivid_gradient_pattern() {
    let (gradient, _) = require_vivid_pair!();
    let library = SharedLibrary::new(V4l2Library::new());
    let mut camera = GigeCamera::new(&library, rgb_config(&gradient));

    camera.init().expect("init");
    camera.start().expect("start");
    assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));

    let frame = camera.last_frame().expect("published frame");
    let result = validate_gradient(&frame);
    assert!(
        result.is_ok(),
        "Gradient validation failed on first vivid device.\n\
         Expected Gray Ramp pattern.\n\
         Error: {:?}",
        result.err()
    );
}

#[test]
#[serial]
fn test_vivid_colorbar_pattern() {
    let (_, colorbar) = require_vivid_pair!();
    let library = SharedLibrary::new(V4l2Library::new());
    let mut camera = GigeCamera::new(&library, rgb_config(&colorbar));

    camera.init().expect("init");
    camera.start().expect("start");
    assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));

    let frame = camera.last_frame().expect("published frame");
    let result = validate_color_bars(&frame);
    assert!(
        result.is_ok(),
        "Color bars validation failed on second vivid device.\n\
         Expected 100% Colorbar pattern.\n\
         Error: {:?}",
        result.err()
    );
}
