//! Real-time chroma key overlay.
//!
//! A looping green-screen clip is keyed against a configurable key color and
//! composited over a live camera feed, one tick per decoded overlay frame.
//!
//! ```no_run
//! use chroma_overlay::{
//!     Backend, CameraRequest, Compositor, KeyingEngine, LiveCameraSource, LoopingOverlaySource,
//!     OutputMode, OverlayAsset, OverlayOptions, RenderLoop, SharedKeyConfig, V4L2Output,
//! };
//!
//! # fn main() -> chroma_overlay::Result<()> {
//! let camera = LiveCameraSource::request(&CameraRequest::default())?;
//! let overlay = LoopingOverlaySource::open(
//!     OverlayAsset::from_path("video/arvideo.mp4")?,
//!     &OverlayOptions::default(),
//! )?;
//! let output = V4L2Output::new("/dev/video10", 1280, 720)?;
//! let config = SharedKeyConfig::default();
//!
//! let mut render = RenderLoop::new(
//!     camera,
//!     overlay,
//!     KeyingEngine::select(Backend::Auto)?,
//!     Compositor::new(OutputMode::Surface),
//!     output,
//!     config.clone(),
//!     24.0,
//! )?;
//! render.run(None)?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod color;
pub mod compositor;
pub mod config;
pub mod error;
pub mod keying;
pub mod output;
pub mod render_loop;

pub use capture::{
    CameraRequest, Facing, FacingMode, FrameSource, LiveCameraSource, LoopingOverlaySource,
    OverlayAsset, OverlayOptions,
};
pub use color::{hex_color_to_rgb, Rgb};
pub use compositor::{CompositeOutput, Compositor, OutputMode};
pub use config::{ConfigSource, FileConfigSource, KeyConfig, KeySettings, SharedKeyConfig};
pub use error::{KeyerError, Result};
pub use keying::{Backend, KeyTarget, KeyedFrame, KeyingEngine};
pub use output::{DisplaySink, V4L2Output};
pub use render_loop::{LoopState, RenderLoop, SkipReason, StopHandle, TickOutcome};
