mod camera;
mod overlay;
mod signal;

pub use camera::{CameraDevice, CameraRequest, Facing, FacingMode, LiveCameraSource};
pub use overlay::{LoopingOverlaySource, OverlayAsset, OverlayOptions};
pub use signal::{frame_signal, FrameNotifier, FrameSignal, FrameSlot, SignalWait};

use crate::error::Result;
use image::RgbaImage;

/// A decodable video source polled once per render tick.
///
/// Decoding happens elsewhere; `read_frame` only hands out the most recent
/// frame and never blocks waiting for a new one.
pub trait FrameSource {
    /// Dimensions of the current frame. `(0, 0)` until the first frame is decoded.
    fn dimensions(&self) -> (u32, u32);

    /// The current frame, or `None` while the source has nothing decoded yet.
    fn read_frame(&mut self) -> Result<Option<RgbaImage>>;

    /// Hand over the per-frame availability signal, if the source has one.
    ///
    /// Returns `Some` at most once.
    fn take_frame_signal(&mut self) -> Option<FrameSignal> {
        None
    }
}
