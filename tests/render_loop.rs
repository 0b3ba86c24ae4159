mod common;

use std::time::Duration;

use chroma_overlay::capture::frame_signal;
use chroma_overlay::{
    Backend, Compositor, KeyConfig, KeyerError, KeyingEngine, LoopState, OutputMode, RenderLoop,
    Rgb, SharedKeyConfig, SkipReason, TickOutcome,
};
use common::{solid, RecordingSink, ScriptedSource, BLUE, KEY_GREEN, WHITE};

type TestLoop = RenderLoop<ScriptedSource, ScriptedSource, RecordingSink, SharedKeyConfig>;

struct Harness {
    render: TestLoop,
    camera: common::FrameHandle,
    overlay: common::FrameHandle,
    config: SharedKeyConfig,
}

fn harness_with_sink(sink: RecordingSink) -> Harness {
    let (camera_source, camera) = ScriptedSource::new();
    let (overlay_source, overlay) = ScriptedSource::new();
    let config = SharedKeyConfig::new(KeyConfig::default());
    let render = RenderLoop::new(
        camera_source,
        overlay_source,
        KeyingEngine::select(Backend::Cpu).unwrap(),
        Compositor::new(OutputMode::Surface),
        sink,
        config.clone(),
        24.0,
    )
    .unwrap();
    Harness {
        render,
        camera,
        overlay,
        config,
    }
}

fn harness() -> Harness {
    harness_with_sink(RecordingSink::default())
}

#[test]
fn lifecycle_is_idle_running_stopped() {
    let mut h = harness();
    assert_eq!(h.render.state(), LoopState::Idle);
    assert!(matches!(h.render.tick(), TickOutcome::Dropped));

    h.render.start().unwrap();
    assert_eq!(h.render.state(), LoopState::Running);
    assert!(h.render.has_pending_tick());

    h.render.stop();
    assert_eq!(h.render.state(), LoopState::Stopped);
    assert!(!h.render.has_pending_tick());

    let err = h.render.start().unwrap_err();
    assert!(matches!(err, KeyerError::InvalidState(_)));
    assert_eq!(h.render.state(), LoopState::Stopped);
}

#[test]
fn stop_is_idempotent_and_silences_later_ticks() {
    let mut h = harness();
    h.camera.set(solid(4, 4, BLUE));
    h.overlay.set(solid(4, 4, WHITE));
    h.render.start().unwrap();

    assert!(matches!(h.render.tick(), TickOutcome::Composited { .. }));
    assert_eq!(h.render.sink().presented.len(), 1);

    h.render.stop();
    h.render.stop();
    assert!(h.render.engine().is_released());

    for _ in 0..5 {
        assert!(matches!(h.render.tick(), TickOutcome::Dropped));
    }
    assert_eq!(h.render.sink().presented.len(), 1);
    assert!(!h.render.wait_for_next());
}

#[test]
fn stop_handle_takes_effect_on_next_tick() {
    let mut h = harness();
    h.camera.set(solid(2, 2, BLUE));
    h.overlay.set(solid(2, 2, WHITE));
    h.render.start().unwrap();

    let handle = h.render.stop_handle();
    handle.stop();

    assert!(matches!(h.render.tick(), TickOutcome::Dropped));
    assert_eq!(h.render.state(), LoopState::Stopped);
    assert!(h.render.engine().is_released());
    assert!(h.render.sink().presented.is_empty());
}

#[test]
fn camera_not_ready_skips_until_decoded() {
    let mut h = harness();
    h.overlay.set(solid(8, 8, WHITE));
    h.render.start().unwrap();

    for _ in 0..3 {
        assert!(matches!(
            h.render.tick(),
            TickOutcome::Skipped(SkipReason::DecodeNotReady)
        ));
        assert_eq!(h.render.state(), LoopState::Running);
        assert!(h.render.has_pending_tick());
    }

    h.camera.set(solid(640, 480, BLUE));
    match h.render.tick() {
        TickOutcome::Composited { width, height } => assert_eq!((width, height), (640, 480)),
        other => panic!("expected a composite, got {other:?}"),
    }
    let presented = &h.render.sink().presented;
    assert_eq!(presented.len(), 1);
    assert_eq!(presented[0].dimensions(), (640, 480));
    assert_eq!(h.render.stats().skipped, 3);
}

#[test]
fn zero_sized_overlay_frame_is_not_ready() {
    let mut h = harness();
    h.camera.set(solid(4, 4, BLUE));
    h.overlay.set(solid(0, 0, WHITE));
    h.render.start().unwrap();

    assert!(matches!(
        h.render.tick(),
        TickOutcome::Skipped(SkipReason::DecodeNotReady)
    ));
    assert!(h.render.sink().presented.is_empty());
}

#[test]
fn resize_mid_loop_tracks_new_dimensions() {
    let mut h = harness();
    h.camera.set(solid(320, 240, BLUE));
    h.overlay.set(solid(320, 240, WHITE));
    h.render.start().unwrap();
    assert!(matches!(
        h.render.tick(),
        TickOutcome::Composited {
            width: 320,
            height: 240
        }
    ));

    h.camera.set(solid(640, 360, BLUE));
    h.overlay.set(solid(160, 90, WHITE));
    assert!(matches!(
        h.render.tick(),
        TickOutcome::Composited {
            width: 640,
            height: 360
        }
    ));

    let presented = &h.render.sink().presented;
    assert_eq!(presented[0].dimensions(), (320, 240));
    assert_eq!(presented[1].dimensions(), (640, 360));
}

#[test]
fn config_edits_apply_on_next_tick() {
    let mut h = harness();
    h.camera.set(solid(2, 2, BLUE));
    h.overlay.set(solid(2, 2, KEY_GREEN));
    h.render.start().unwrap();

    h.render.tick();
    // Default key removes the green overlay, the camera shows through.
    assert_eq!(h.render.sink().presented[0].get_pixel(0, 0).0, BLUE);

    // Keying blue instead leaves the green overlay opaque.
    h.config
        .set(KeyConfig::new(Rgb::new(0.0, 0.0, 1.0), 0.1, 0.08, 0.1).unwrap());
    h.render.tick();
    assert_eq!(h.render.sink().presented[1].get_pixel(0, 0).0, KEY_GREEN);
}

#[test]
fn failing_pass_stops_loop_cleanly() {
    let sink = RecordingSink {
        fail_next: true,
        ..RecordingSink::default()
    };
    let mut h = harness_with_sink(sink);
    h.camera.set(solid(2, 2, BLUE));
    h.overlay.set(solid(2, 2, WHITE));
    h.render.start().unwrap();

    assert!(matches!(
        h.render.tick(),
        TickOutcome::Failed(KeyerError::Output(_))
    ));
    assert_eq!(h.render.state(), LoopState::Stopped);
    assert!(!h.render.has_pending_tick());
    assert!(h.render.engine().is_released());
    assert!(matches!(h.render.tick(), TickOutcome::Dropped));
}

#[test]
fn run_stops_after_frame_limit() {
    let mut h = harness();
    h.camera.set(solid(4, 2, BLUE));
    h.overlay.set(solid(4, 2, WHITE));

    let composited = h.render.run(Some(3)).unwrap();
    assert_eq!(composited, 3);
    assert_eq!(h.render.state(), LoopState::Stopped);
    assert_eq!(h.render.sink().presented.len(), 3);
}

#[test]
fn run_surfaces_pass_errors() {
    let sink = RecordingSink {
        fail_next: true,
        ..RecordingSink::default()
    };
    let mut h = harness_with_sink(sink);
    h.camera.set(solid(2, 2, BLUE));
    h.overlay.set(solid(2, 2, WHITE));

    assert!(h.render.run(None).is_err());
    assert_eq!(h.render.state(), LoopState::Stopped);
}

#[test]
fn timer_pacing_without_frame_signal() {
    let h = harness();
    assert!(!h.render.uses_frame_signal());
}

#[test]
fn frame_signal_paces_ticks() {
    let (notifier, signal) = frame_signal();
    let (camera_source, camera) = ScriptedSource::new();
    let (overlay_source, overlay) = ScriptedSource::with_signal(signal);
    let mut render = RenderLoop::new(
        camera_source,
        overlay_source,
        KeyingEngine::select(Backend::Cpu).unwrap(),
        Compositor::new(OutputMode::Surface),
        RecordingSink::default(),
        SharedKeyConfig::default(),
        // Slow fallback so only the signal or the stop can end a wait here.
        2.0,
    )
    .unwrap();
    assert!(render.uses_frame_signal());

    camera.set(solid(2, 2, BLUE));
    overlay.set(solid(2, 2, WHITE));
    render.start().unwrap();

    // First tick is immediate.
    assert!(render.wait_for_next());
    assert!(matches!(render.tick(), TickOutcome::Composited { .. }));

    // The next one waits for a decoded frame.
    let waiter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        notifier.notify();
        notifier
    });
    assert!(render.wait_for_next());
    assert!(matches!(render.tick(), TickOutcome::Composited { .. }));
    let _notifier = waiter.join().unwrap();

    // A stop requested while waiting ends the wait.
    let handle = render.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        handle.stop();
    });
    assert!(!render.wait_for_next());
    stopper.join().unwrap();
    assert!(matches!(render.tick(), TickOutcome::Dropped));
    assert_eq!(render.sink().presented.len(), 2);
}

#[test]
fn paused_overlay_keeps_camera_live() {
    let (notifier, signal) = frame_signal();
    let (camera_source, camera) = ScriptedSource::new();
    let (overlay_source, overlay) = ScriptedSource::with_signal(signal);
    let mut render = RenderLoop::new(
        camera_source,
        overlay_source,
        KeyingEngine::select(Backend::Cpu).unwrap(),
        Compositor::new(OutputMode::Surface),
        RecordingSink::default(),
        SharedKeyConfig::default(),
        24.0,
    )
    .unwrap();

    camera.set(solid(2, 2, BLUE));
    overlay.set(solid(2, 2, KEY_GREEN));
    render.start().unwrap();
    assert!(render.wait_for_next());
    assert!(matches!(render.tick(), TickOutcome::Composited { .. }));

    // Overlay stops pulsing but stays alive; the camera moves on.
    camera.set(solid(2, 2, WHITE));
    let started = std::time::Instant::now();
    assert!(render.wait_for_next());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(render.tick(), TickOutcome::Composited { .. }));

    let presented = &render.sink().presented;
    assert_eq!(presented.len(), 2);
    assert_eq!(presented[1].get_pixel(0, 0).0, WHITE);
    assert!(render.uses_frame_signal());
    drop(notifier);
}

#[test]
fn zero_frame_limit_presents_nothing() {
    let mut h = harness();
    h.camera.set(solid(2, 2, BLUE));
    h.overlay.set(solid(2, 2, WHITE));

    assert_eq!(h.render.run(Some(0)).unwrap(), 0);
    assert!(h.render.sink().presented.is_empty());
    assert_eq!(h.render.state(), LoopState::Stopped);
    assert!(h.render.engine().is_released());
}

fn stop_from<F: FnOnce() + Send + 'static>(handler: F) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        handler();
    })
}

#[test]
fn interrupt_handler_ends_unbounded_run() {
    let mut h = harness();
    h.camera.set(solid(2, 2, BLUE));
    h.overlay.set(solid(2, 2, WHITE));

    let stop = h.render.stop_handle();
    let interrupt = stop_from(move || stop.stop());

    let composited = h.render.run(None).unwrap();
    interrupt.join().unwrap();
    assert_eq!(h.render.state(), LoopState::Stopped);
    assert!(h.render.engine().is_released());
    assert_eq!(h.render.sink().presented.len() as u64, composited);
}

#[test]
fn invalid_fallback_fps_is_rejected() {
    let (camera_source, _camera) = ScriptedSource::new();
    let (overlay_source, _overlay) = ScriptedSource::new();
    let result = RenderLoop::new(
        camera_source,
        overlay_source,
        KeyingEngine::select(Backend::Cpu).unwrap(),
        Compositor::default(),
        RecordingSink::default(),
        SharedKeyConfig::default(),
        0.0,
    );
    assert!(matches!(result, Err(KeyerError::Config(_))));
}
