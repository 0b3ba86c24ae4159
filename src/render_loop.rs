//! Drives keying and compositing once per available overlay frame.
//!
//! All ticks run on the caller's thread, one at a time. The only suspension
//! point is [`RenderLoop::wait_for_next`], between ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::capture::{FrameSignal, FrameSource, SignalWait};
use crate::compositor::Compositor;
use crate::config::ConfigSource;
use crate::error::{KeyerError, Result};
use crate::keying::KeyingEngine;
use crate::output::DisplaySink;

/// Overlay rate assumed when the source offers no frame signal.
pub const DEFAULT_FALLBACK_FPS: f64 = 24.0;

const STATS_EVERY: u64 = 30;
const STOP_POLL: Duration = Duration::from_millis(50);
/// Fallback intervals without an overlay frame before ticking anyway.
const STALL_INTERVALS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    /// Terminal. Build a new loop to run again.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A source has no decoded pixels yet.
    DecodeNotReady,
}

#[derive(Debug)]
pub enum TickOutcome {
    Composited { width: u32, height: u32 },
    Skipped(SkipReason),
    /// The loop was not running; nothing happened.
    Dropped,
    /// The pass failed and the loop has been stopped.
    Failed(KeyerError),
}

/// Requests a stop from anywhere, including other threads. Takes effect no
/// later than the start of the next tick.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How the next tick gets scheduled.
pub enum Pacing {
    /// Once per decoded overlay frame.
    FrameSignal(FrameSignal),
    /// Fixed interval approximating the overlay's frame rate.
    Interval(Duration),
}

impl Pacing {
    fn describe(&self) -> String {
        match self {
            Pacing::FrameSignal(_) => "frame signal".to_string(),
            Pacing::Interval(d) => format!("{:.1} fps timer", 1.0 / d.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Wake {
    Now,
    Signal,
    At(Instant),
}

#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub composited: u64,
    pub skipped: u64,
    pub total_key_time: Duration,
    pub total_composite_time: Duration,
    pub total_present_time: Duration,
}

impl LoopStats {
    fn avg_ms(&self, total: Duration) -> f64 {
        if self.composited == 0 {
            0.0
        } else {
            total.as_secs_f64() * 1000.0 / self.composited as f64
        }
    }

    fn log(&self) {
        let key_ms = self.avg_ms(self.total_key_time);
        let composite_ms = self.avg_ms(self.total_composite_time);
        let present_ms = self.avg_ms(self.total_present_time);
        let total_ms = key_ms + composite_ms + present_ms;
        let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };
        tracing::info!(
            "Frame {}: key={:.1}ms, composite={:.1}ms, present={:.1}ms, total={:.1}ms, fps={:.1}, skipped={}",
            self.composited,
            key_ms,
            composite_ms,
            present_ms,
            total_ms,
            fps,
            self.skipped
        );
    }
}

pub struct RenderLoop<C, O, S, K> {
    camera: C,
    overlay: O,
    engine: KeyingEngine,
    compositor: Compositor,
    sink: S,
    config: K,
    state: LoopState,
    pacing: Pacing,
    fallback: Duration,
    pending: Option<Wake>,
    last_tick: Instant,
    stop: StopHandle,
    stats: LoopStats,
}

impl<C, O, S, K> RenderLoop<C, O, S, K>
where
    C: FrameSource,
    O: FrameSource,
    S: DisplaySink,
    K: ConfigSource,
{
    /// Build an idle loop. The loop owns the engine and is the only place
    /// that releases its resources.
    ///
    /// `fallback_fps` paces ticks when the overlay has no frame signal, or
    /// once its signal closes.
    pub fn new(
        camera: C,
        mut overlay: O,
        engine: KeyingEngine,
        compositor: Compositor,
        sink: S,
        config: K,
        fallback_fps: f64,
    ) -> Result<Self> {
        let fallback = fps_interval(fallback_fps)?;
        let pacing = match overlay.take_frame_signal() {
            Some(signal) => Pacing::FrameSignal(signal),
            None => Pacing::Interval(fallback),
        };

        Ok(Self {
            camera,
            overlay,
            engine,
            compositor,
            sink,
            config,
            state: LoopState::Idle,
            pacing,
            fallback,
            pending: None,
            last_tick: Instant::now(),
            stop: StopHandle::default(),
            stats: LoopStats::default(),
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn engine(&self) -> &KeyingEngine {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn uses_frame_signal(&self) -> bool {
        matches!(self.pacing, Pacing::FrameSignal(_))
    }

    /// Whether a tick is scheduled and not yet run.
    pub fn has_pending_tick(&self) -> bool {
        self.pending.is_some()
    }

    /// Idle → Running, with the first tick due immediately.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LoopState::Idle => {
                tracing::info!(
                    "Render loop starting ({} keying, paced by {})",
                    self.engine.name(),
                    self.pacing.describe()
                );
                self.state = LoopState::Running;
                self.pending = Some(Wake::Now);
                Ok(())
            }
            LoopState::Running => Ok(()),
            LoopState::Stopped => Err(KeyerError::invalid_state(
                "a stopped render loop cannot be restarted",
            )),
        }
    }

    /// Running → Stopped. Idempotent; engine resources are released on the
    /// first call only.
    pub fn stop(&mut self) {
        self.stop.stop();
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopped;
        self.pending = None;
        if self.engine.release() {
            tracing::info!(
                "Render loop stopped after {} frames, keying resources released",
                self.stats.composited
            );
        }
    }

    /// Run one scheduled invocation. Never panics on pass failures: those
    /// stop the loop and come back as [`TickOutcome::Failed`].
    pub fn tick(&mut self) -> TickOutcome {
        if self.stop.is_stopped() {
            self.stop();
        }
        if self.state != LoopState::Running {
            return TickOutcome::Dropped;
        }

        self.pending = None;
        self.last_tick = Instant::now();

        match self.pass() {
            Ok(outcome) => {
                self.schedule_next();
                outcome
            }
            Err(e) => {
                tracing::error!("Render tick failed, stopping: {}", e);
                self.stop();
                TickOutcome::Failed(e)
            }
        }
    }

    fn schedule_next(&mut self) {
        if self.pending.is_some() || self.state != LoopState::Running {
            return;
        }
        self.pending = Some(match &self.pacing {
            Pacing::FrameSignal(_) => Wake::Signal,
            Pacing::Interval(d) => Wake::At(self.last_tick + *d),
        });
    }

    fn pass(&mut self) -> Result<TickOutcome> {
        let config = self.config.current();

        let Some(overlay) = ready_frame(&mut self.overlay)? else {
            return Ok(self.skip());
        };
        let Some(camera) = ready_frame(&mut self.camera)? else {
            return Ok(self.skip());
        };

        let key_start = Instant::now();
        let Some(keyed) = self
            .engine
            .key_frame(&overlay, &config, self.compositor.key_target())?
        else {
            return Ok(self.skip());
        };
        let key_time = key_start.elapsed();

        let composite_start = Instant::now();
        let output = self.compositor.composite(&camera, keyed)?;
        let composite_time = composite_start.elapsed();

        let (width, height) = output.dimensions();
        if (width, height) != camera.dimensions() {
            return Err(KeyerError::invalid_state(format!(
                "composite is {width}x{height} but camera frame is {:?}",
                camera.dimensions()
            )));
        }

        let present_start = Instant::now();
        self.sink.present(&output)?;
        let present_time = present_start.elapsed();

        self.stats.composited += 1;
        self.stats.total_key_time += key_time;
        self.stats.total_composite_time += composite_time;
        self.stats.total_present_time += present_time;
        if self.stats.composited % STATS_EVERY == 0 {
            self.stats.log();
        }

        Ok(TickOutcome::Composited { width, height })
    }

    fn skip(&mut self) -> TickOutcome {
        self.stats.skipped += 1;
        tracing::trace!("Source not decoded yet, skipping tick");
        TickOutcome::Skipped(SkipReason::DecodeNotReady)
    }

    /// Block until the scheduled tick is due. Returns `false` when the loop
    /// is no longer running or a stop was requested while waiting.
    pub fn wait_for_next(&mut self) -> bool {
        loop {
            if self.stop.is_stopped() || self.state != LoopState::Running {
                return false;
            }
            let Some(wake) = self.pending else {
                return false;
            };

            match wake {
                Wake::Now => return true,
                Wake::At(due) => {
                    let now = Instant::now();
                    if now >= due {
                        return true;
                    }
                    std::thread::sleep((due - now).min(STOP_POLL));
                }
                Wake::Signal => {
                    let Pacing::FrameSignal(signal) = &self.pacing else {
                        return true;
                    };
                    // A paused or stalled overlay must not freeze the camera.
                    let stalled_at = self.last_tick + self.fallback * STALL_INTERVALS;
                    let now = Instant::now();
                    if now >= stalled_at {
                        tracing::trace!("No overlay frame for {:?}, ticking on timer", now - self.last_tick);
                        return true;
                    }
                    match signal.wait((stalled_at - now).min(STOP_POLL)) {
                        SignalWait::Frame => return true,
                        SignalWait::Timeout => {}
                        SignalWait::Closed => {
                            tracing::info!("Overlay frame signal closed, switching to timer pacing");
                            self.pacing = Pacing::Interval(self.fallback);
                            self.pending = Some(Wake::At(self.last_tick + self.fallback));
                        }
                    }
                }
            }
        }
    }

    /// Start if idle, then tick until stopped or `limit` frames are
    /// composited. The loop is stopped on return.
    pub fn run(&mut self, limit: Option<u64>) -> Result<u64> {
        self.start()?;
        if limit == Some(0) {
            self.stop();
            return Ok(0);
        }
        tracing::info!("Starting render loop");

        let first = self.stats.composited;
        while self.wait_for_next() {
            match self.tick() {
                TickOutcome::Composited { .. } => {
                    let done = self.stats.composited - first;
                    if limit.is_some_and(|l| done >= l) {
                        break;
                    }
                }
                TickOutcome::Skipped(_) | TickOutcome::Dropped => {}
                TickOutcome::Failed(e) => return Err(e),
            }
        }

        self.stop();
        Ok(self.stats.composited - first)
    }
}

impl<C, O, S, K> Drop for RenderLoop<C, O, S, K> {
    fn drop(&mut self) {
        if self.engine.release() {
            tracing::debug!("Render loop dropped, keying resources released");
        }
    }
}

fn ready_frame<F: FrameSource>(source: &mut F) -> Result<Option<RgbaImage>> {
    if source.dimensions() == (0, 0) {
        return Ok(None);
    }
    Ok(source
        .read_frame()?
        .filter(|f| f.width() > 0 && f.height() > 0))
}

fn fps_interval(fps: f64) -> Result<Duration> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(KeyerError::config(format!("fallback fps must be > 0, got {fps}")));
    }
    Ok(Duration::from_secs_f64(1.0 / fps))
}
