//! Per-pixel chroma key model.
//!
//! Every backend evaluates the same function: distance from the key color in
//! the chroma plane drives both opacity and spill desaturation.

use crate::color::{luma, to_chroma_plane, Rgb};
use crate::config::KeyConfig;

/// Key color projected once per frame.
#[derive(Debug, Clone, Copy)]
pub struct KeyModel {
    key_uv: (f32, f32),
    similarity: f32,
    smoothness: f32,
    spill: f32,
}

impl KeyModel {
    pub fn new(config: &KeyConfig) -> Self {
        Self {
            key_uv: to_chroma_plane(config.key_color()),
            similarity: config.similarity(),
            smoothness: config.smoothness(),
            spill: config.spill(),
        }
    }

    pub fn chroma_distance(&self, rgb: Rgb) -> f32 {
        let (u, v) = to_chroma_plane(rgb);
        (u - self.key_uv.0).hypot(v - self.key_uv.1)
    }

    /// Opacity for a pixel at `distance` from the key: 0 is background.
    pub fn alpha(&self, distance: f32) -> f32 {
        ramp((distance - self.similarity) / self.smoothness)
    }

    /// How much of the original saturation a pixel keeps.
    pub fn spill(&self, distance: f32) -> f32 {
        ramp((distance - self.similarity) / self.spill)
    }

    /// Key one pixel, returning straight-alpha RGBA in `[0, 1]`.
    pub fn apply(&self, rgb: Rgb) -> [f32; 4] {
        let distance = self.chroma_distance(rgb);
        let alpha = self.alpha(distance);
        let spill = self.spill(distance);
        let gray = luma(rgb);
        [
            lerp(gray, rgb.r, spill),
            lerp(gray, rgb.g, spill),
            lerp(gray, rgb.b, spill),
            alpha,
        ]
    }

    /// Key one 8-bit RGBA pixel in place. Source alpha is ignored.
    pub fn apply_rgba8(&self, px: &mut [u8]) {
        let out = self.apply(Rgb::from_u8(px[0], px[1], px[2]));
        for (dst, v) in px.iter_mut().zip(out) {
            *dst = to_u8(v);
        }
    }
}

fn ramp(x: f32) -> f32 {
    x.clamp(0.0, 1.0).powf(1.5)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
