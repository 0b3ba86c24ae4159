use image::RgbaImage;
use rayon::prelude::*;

use super::model::KeyModel;
use crate::config::KeyConfig;
use crate::error::{KeyerError, Result};

/// Per-pixel rule used by the CPU keyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMethod {
    /// Chroma-plane distance with soft edges and spill suppression.
    ChromaDistance,
    /// Hard RGB threshold on 8-bit channels: a pixel is background when
    /// `g > 150 && r < 130 && b < 130`.
    ///
    /// Lower fidelity: edges are binary and green spill is left untouched.
    /// It ignores the key config and does not match `ChromaDistance` output.
    Threshold,
}

/// CPU keyer working on a backing RGBA surface that tracks the source size.
pub struct CpuKeyer {
    method: CpuMethod,
    surface: Option<RgbaImage>,
}

impl CpuKeyer {
    pub fn new(method: CpuMethod) -> Self {
        Self {
            method,
            surface: Some(RgbaImage::new(0, 0)),
        }
    }

    pub fn method(&self) -> CpuMethod {
        self.method
    }

    /// Dimensions of the backing surface, `None` once released.
    pub fn surface_dimensions(&self) -> Option<(u32, u32)> {
        self.surface.as_ref().map(|s| s.dimensions())
    }

    /// Key `source` into the backing surface and return a copy of it.
    ///
    /// Returns `Ok(None)` for a source with no pixels yet.
    pub fn key_frame(&mut self, source: &RgbaImage, config: &KeyConfig) -> Result<Option<RgbaImage>> {
        let surface = self
            .surface
            .as_mut()
            .ok_or(KeyerError::ResourceReleased("cpu keyer"))?;

        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        if surface.dimensions() != (width, height) {
            tracing::debug!(
                "Resizing keying surface {:?} -> {}x{}",
                surface.dimensions(),
                width,
                height
            );
            *surface = RgbaImage::new(width, height);
        }

        // The source buffer may be longer than width * height * 4.
        let len = surface.len();
        surface.copy_from_slice(&source.as_raw()[..len]);

        let row_bytes = width as usize * 4;
        match self.method {
            CpuMethod::ChromaDistance => {
                let model = KeyModel::new(config);
                surface.par_chunks_exact_mut(row_bytes).for_each(|row| {
                    for px in row.chunks_exact_mut(4) {
                        model.apply_rgba8(px);
                    }
                });
            }
            CpuMethod::Threshold => {
                surface.par_chunks_exact_mut(row_bytes).for_each(|row| {
                    for px in row.chunks_exact_mut(4) {
                        px[3] = if is_green_screen(px[0], px[1], px[2]) { 0 } else { 255 };
                    }
                });
            }
        }

        Ok(Some(surface.clone()))
    }

    /// Drop the backing surface. Returns `true` only on the first call.
    pub fn release(&mut self) -> bool {
        self.surface.take().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.surface.is_none()
    }
}

fn is_green_screen(r: u8, g: u8, b: u8) -> bool {
    g > 150 && r < 130 && b < 130
}
