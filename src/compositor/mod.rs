mod blend;

pub use blend::{cover, over, over_in_place};

use crate::error::{KeyerError, Result};
use crate::keying::{KeyTarget, KeyedFrame};
use image::RgbaImage;

/// How composited frames are handed to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Camera and keyed overlay flattened into one raster.
    #[default]
    Surface,
    /// Camera raster plus the keyed overlay as a texture for a 3-D scene.
    Texture,
}

/// Result of one composite pass. Dimensions always follow the camera frame.
#[derive(Debug, Clone)]
pub enum CompositeOutput {
    Surface(RgbaImage),
    Texture {
        base: RgbaImage,
        overlay: KeyedFrame,
    },
}

impl CompositeOutput {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            CompositeOutput::Surface(img) => img.dimensions(),
            CompositeOutput::Texture { base, .. } => base.dimensions(),
        }
    }

    /// A single raster, blending a CPU overlay texture if needed.
    pub fn flatten(&self) -> Result<RgbaImage> {
        match self {
            CompositeOutput::Surface(img) => Ok(img.clone()),
            CompositeOutput::Texture { base, overlay } => match overlay {
                KeyedFrame::Raster(keyed) => Ok(draw(base, keyed)),
                #[cfg(feature = "gpu")]
                KeyedFrame::Gpu(_) => Err(KeyerError::output(
                    "GPU overlay textures are flattened by the scene renderer",
                )),
            },
        }
    }
}

/// Draws the camera frame, then the keyed overlay on top of it.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    mode: OutputMode,
}

impl Compositor {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// The keyed frame form this compositor wants from the engine.
    pub fn key_target(&self) -> KeyTarget {
        match self.mode {
            OutputMode::Surface => KeyTarget::Raster,
            OutputMode::Texture => KeyTarget::Texture,
        }
    }

    pub fn composite(&self, base: &RgbaImage, keyed: KeyedFrame) -> Result<CompositeOutput> {
        let _span = tracing::debug_span!("composite").entered();

        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(KeyerError::invalid_state("composite called with an empty base frame"));
        }

        match self.mode {
            OutputMode::Surface => match keyed {
                KeyedFrame::Raster(keyed) => Ok(CompositeOutput::Surface(draw(base, &keyed))),
                #[cfg(feature = "gpu")]
                KeyedFrame::Gpu(_) => Err(KeyerError::invalid_state(
                    "surface compositing needs a raster keyed frame",
                )),
            },
            OutputMode::Texture => Ok(CompositeOutput::Texture {
                base: opaque(base),
                overlay: keyed,
            }),
        }
    }
}

fn opaque(base: &RgbaImage) -> RgbaImage {
    let mut surface = base.clone();
    for px in surface.pixels_mut() {
        px.0[3] = 255;
    }
    surface
}

fn draw(base: &RgbaImage, keyed: &RgbaImage) -> RgbaImage {
    let mut surface = opaque(base);
    let (width, height) = surface.dimensions();
    if keyed.dimensions() == (width, height) {
        over_in_place(&mut surface, keyed);
    } else {
        over_in_place(&mut surface, &cover(keyed, width, height));
    }
    surface
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    #[test]
    fn surface_follows_base_dimensions() {
        let compositor = Compositor::new(OutputMode::Surface);
        let base = solid(8, 6, [0, 0, 255]);
        let keyed = KeyedFrame::Raster(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])));
        let out = compositor.composite(&base, keyed).unwrap();
        assert_eq!(out.dimensions(), (8, 6));
    }

    #[test]
    fn transparent_overlay_shows_base() {
        let compositor = Compositor::new(OutputMode::Surface);
        let base = solid(2, 2, [0, 0, 255]);
        let keyed = KeyedFrame::Raster(RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 0])));
        let CompositeOutput::Surface(out) = compositor.composite(&base, keyed).unwrap() else {
            panic!("expected a surface");
        };
        assert!(out.pixels().all(|p| p.0 == [0, 0, 255, 255]));
    }

    #[test]
    fn base_alpha_is_forced_opaque() {
        let compositor = Compositor::new(OutputMode::Surface);
        let base = RgbaImage::from_pixel(1, 1, Rgba([9, 9, 9, 0]));
        let keyed = KeyedFrame::Raster(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])));
        let out = compositor.composite(&base, keyed).unwrap().flatten().unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [9, 9, 9, 255]);
    }

    #[test]
    fn texture_mode_keeps_overlay_separate() {
        let compositor = Compositor::new(OutputMode::Texture);
        assert_eq!(compositor.key_target(), KeyTarget::Texture);

        let base = solid(2, 1, [0, 0, 0]);
        let overlay = RgbaImage::from_raw(2, 1, vec![255, 255, 255, 255, 255, 255, 255, 0]).unwrap();
        let out = compositor
            .composite(&base, KeyedFrame::Raster(overlay.clone()))
            .unwrap();

        match &out {
            CompositeOutput::Texture {
                overlay: KeyedFrame::Raster(tex),
                ..
            } => assert_eq!(tex, &overlay),
            other => panic!("unexpected output {other:?}"),
        }

        let flat = out.flatten().unwrap();
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn empty_base_is_rejected() {
        let compositor = Compositor::default();
        let keyed = KeyedFrame::Raster(RgbaImage::new(1, 1));
        assert!(compositor.composite(&RgbaImage::new(0, 0), keyed).is_err());
    }
}
