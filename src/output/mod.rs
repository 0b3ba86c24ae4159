mod loopback;

pub use loopback::V4L2Output;

use crate::compositor::CompositeOutput;
use crate::error::Result;

/// Consumer of composited frames: a 2-D display, a loopback device, or a
/// 3-D scene sampling the overlay texture.
pub trait DisplaySink {
    /// Show one composited frame.
    fn present(&mut self, frame: &CompositeOutput) -> Result<()>;

    /// Get the expected output resolution, if the sink has a fixed one
    fn resolution(&self) -> Option<(u32, u32)> {
        None
    }
}
