//! End-to-end runs of the camera component against the in-memory device library.
//!
//! Run with the default features: `cargo test`.

#![cfg(feature = "mock")]

use std::path::Path;
use std::sync::{Arc, Mutex};

use gige_capture::mock::{FrameOutcome, MockCamera, MockLibrary, TestPattern};
use gige_capture::traits::{EnumAttribute, UintAttribute};
use gige_capture::validation::{validate_color_bars, validate_frame_sequence, validate_gradient};
use gige_capture::{
    trigger_channel, AcquisitionMode, BufferDepth, CameraConfig, CameraError, CaptureState,
    ChannelSink, Component, DeviceError, ExposureMode, FrameDrop, FrameView, GigeCamera,
    GrabOutcome, PixelFormat, SharedLibrary, Variant,
};

fn library_with(address: &str, camera: MockCamera) -> (MockLibrary, SharedLibrary<MockLibrary>) {
    let mock = MockLibrary::new();
    mock.add_camera(address, camera);
    (mock.clone(), SharedLibrary::new(mock))
}

#[test]
fn test_full_capture_run() {
    let (mock, library) = library_with("10.0.0.2", MockCamera::new());
    let (sink, frames) = ChannelSink::bounded(8);
    let config = CameraConfig::default().with_address("10.0.0.2");
    let mut camera = GigeCamera::new(&library, config).with_output(sink);

    camera.init().expect("init");
    camera.start().expect("start");
    for _ in 0..5 {
        assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));
    }

    let last = camera.last_frame().expect("last frame");
    assert_eq!((last.width(), last.height()), (640, 480));
    assert_eq!(last.format(), PixelFormat::Bgr24);
    validate_color_bars(&last).expect("color bars");

    camera.stop().expect("stop");
    camera.finish().expect("finish");
    assert_eq!(camera.state(), CaptureState::Uninitialized);
    drop(camera);

    let received: Vec<_> = frames.try_iter().collect();
    assert_eq!(received.len(), 5);
    validate_frame_sequence(&received).expect("consecutive counters");
    assert_eq!(mock.startups(), 1);
    assert_eq!(mock.shutdowns(), 1);
}

#[test]
fn test_restart_after_stop() {
    let (_, library) = library_with("cam", MockCamera::new());
    let mut camera = GigeCamera::new(&library, CameraConfig::default().with_address("cam"));

    camera.init().expect("init");
    for _ in 0..2 {
        camera.start().expect("start");
        assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));
        camera.stop().expect("stop");
        assert_eq!(camera.grab(), GrabOutcome::NotCapturing);
    }
    camera.finish().expect("finish");

    camera.init().expect("second init");
    assert_eq!(camera.state(), CaptureState::Initialized);
}

#[test]
fn test_frame_loss_does_not_stop_capture() {
    let mock = MockLibrary::new();
    let probe = mock.add_camera("cam", MockCamera::new());
    let library = SharedLibrary::new(mock);
    let mut camera = GigeCamera::new(&library, CameraConfig::default().with_address("cam"));

    camera.init().expect("init");
    camera.start().expect("start");
    probe.push_outcome(FrameOutcome::Status(DeviceError::DataMissing));
    probe.push_outcome(FrameOutcome::WaitError(DeviceError::Timeout));

    assert!(matches!(
        camera.grab(),
        GrabOutcome::Dropped(FrameDrop::Incomplete(_))
    ));
    assert_eq!(
        camera.grab(),
        GrabOutcome::Dropped(FrameDrop::Wait(DeviceError::Timeout))
    );
    assert_eq!(camera.state(), CaptureState::Capturing);
    assert_eq!(
        camera.grab(),
        GrabOutcome::Published {
            slot: 0,
            frame_count: 1
        }
    );
}

#[test]
fn test_triggered_single_frame_run() {
    let (_, library) = library_with("cam", MockCamera::new().with_pattern(TestPattern::Gradient));
    let (trigger, input) = trigger_channel();
    let config = CameraConfig::default()
        .with_address("cam")
        .with_variant(Variant::Triggered)
        .with_acquisition_mode(AcquisitionMode::SingleFrame)
        .with_exposure(ExposureMode::Manual, 0.002);
    let mut camera = GigeCamera::new(&library, config).with_trigger_input(input);

    camera.init().expect("init");
    camera.start().expect("start");

    let mut published = 0;
    for cycle in 0..6 {
        if cycle % 2 == 0 {
            trigger.fire();
            assert!(camera.poll_trigger());
        }
        match camera.grab() {
            GrabOutcome::Published { .. } => published += 1,
            GrabOutcome::Gated => {}
            other => panic!("cycle {cycle}: unexpected {other:?}"),
        }
    }
    assert_eq!(published, 3);

    let last = camera.last_frame().expect("last frame");
    validate_gradient(&last).expect("gradient");
}

#[test]
fn test_host_callbacks_with_live_update() {
    let mock = MockLibrary::new();
    let probe = mock.add_camera("cam", MockCamera::new().with_format(PixelFormat::Mono8, 320, 240));
    let library = SharedLibrary::new(mock);
    let config = CameraConfig::default()
        .with_address("cam")
        .with_exposure(ExposureMode::Manual, 0.01)
        .with_buffers(BufferDepth::Single);
    let mut camera = GigeCamera::new(&library, config);

    assert!(camera.on_init());
    assert_eq!(camera.buffers().map(gige_capture::BufferPool::byte_size), Some(320 * 240));
    assert!(camera.on_start());
    camera.on_grab();
    camera.on_grab();
    assert_eq!(probe.queued_slots(), vec![0, 0]);

    camera.apply_exposure(0.02).expect("exposure in range");
    assert_eq!(probe.uint(UintAttribute::ExposureValue), Some(20_000));

    probe.reject_enum(EnumAttribute::AcquisitionMode, DeviceError::Forbidden);
    let err = camera
        .apply_acquisition_mode(AcquisitionMode::MultiFrame)
        .expect_err("device refuses the mode");
    assert!(matches!(err, CameraError::Rejected { .. }));
    assert_eq!(*camera.settings().acquisition_mode.get(), AcquisitionMode::MultiFrame);
    assert!(camera.settings().acquisition_mode.is_diverged());

    assert!(!camera.on_finish());
    assert!(camera.on_stop());
    assert!(camera.on_finish());
}

#[test]
fn test_two_cameras_share_one_library() {
    let mock = MockLibrary::new();
    mock.add_camera("left", MockCamera::new().with_pattern(TestPattern::ColorBars));
    mock.add_camera("right", MockCamera::new().with_pattern(TestPattern::Gradient));
    let library = SharedLibrary::new(mock.clone());

    let mut left = GigeCamera::new(&library, CameraConfig::default().with_address("left"));
    let mut right = GigeCamera::new(&library, CameraConfig::default().with_address("right"));
    assert_eq!(library.users(), 2);

    for camera in [&mut left, &mut right] {
        camera.init().expect("init");
        camera.start().expect("start");
        assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));
    }
    validate_color_bars(&left.last_frame().expect("left frame")).expect("left bars");
    validate_gradient(&right.last_frame().expect("right frame")).expect("right gradient");

    drop(left);
    assert_eq!(mock.shutdowns(), 0);
    drop(right);
    assert_eq!(mock.startups(), 1);
    assert_eq!(mock.shutdowns(), 1);
}

#[test]
fn test_sample_config_drives_mock_camera() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/camera.toml");
    let config = CameraConfig::load(&path).expect("sample config");
    assert_eq!(config.variant, Variant::Continuous);

    let mock = MockLibrary::new();
    let probe = mock.add_camera(&config.address, MockCamera::new());
    let library = SharedLibrary::new(mock);
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let collected = Arc::clone(&collected);
        move |frame: &FrameView<'_>| {
            if let Ok(mut counts) = collected.lock() {
                counts.push(frame.frame_count());
            }
        }
    };
    let mut camera = GigeCamera::new(&library, config).with_output(sink);

    camera.init().expect("init");
    assert_eq!(
        probe.enum_value(EnumAttribute::PixelFormat).as_deref(),
        Some("Rgb24")
    );
    camera.start().expect("start");
    camera.grab();
    camera.grab();

    let counts = collected.lock().map(|counts| counts.clone()).unwrap_or_default();
    assert_eq!(counts, vec![0, 1]);
}

#[test]
fn test_session_failure_and_pattern_switch() {
    let mock = MockLibrary::new();
    mock.add_camera(
        "broken",
        MockCamera::new().fail_capture_start(DeviceError::Bandwidth),
    );
    let probe = mock.add_camera("cam", MockCamera::new());
    let library = SharedLibrary::new(mock);

    let mut broken = GigeCamera::new(&library, CameraConfig::default().with_address("broken"));
    broken.init().expect("init");
    assert!(matches!(
        broken.start(),
        Err(CameraError::Start {
            source: DeviceError::Bandwidth,
            rolled_back: false
        })
    ));
    assert_eq!(broken.state(), CaptureState::Initialized);

    let mut camera = GigeCamera::new(&library, CameraConfig::default().with_address("cam"));
    camera.init().expect("init");
    camera.start().expect("start");
    assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));
    validate_color_bars(&camera.last_frame().expect("frame")).expect("bars");

    probe.set_pattern(TestPattern::Gradient);
    assert!(matches!(camera.grab(), GrabOutcome::Published { .. }));
    validate_gradient(&camera.last_frame().expect("frame")).expect("gradient");
}
