mod cpu;
#[cfg(feature = "gpu")]
mod gpu;
pub mod model;

pub use cpu::{CpuKeyer, CpuMethod};
#[cfg(feature = "gpu")]
pub use gpu::{GpuKeyer, GpuTexture};
pub use model::KeyModel;

use crate::config::KeyConfig;
use crate::error::Result;
use image::RgbaImage;

/// Requested keying backend. Resolved once, when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// GPU when it initializes, CPU otherwise.
    #[default]
    Auto,
    Gpu,
    Cpu,
    /// Degraded hard-threshold key, see [`CpuMethod::Threshold`].
    Threshold,
}

/// Where the keyed frame should end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTarget {
    /// CPU-addressable RGBA raster.
    Raster,
    /// Whatever the backend renders into natively.
    Texture,
}

/// A keyed frame with straight (un-premultiplied) alpha.
#[derive(Debug, Clone)]
pub enum KeyedFrame {
    Raster(RgbaImage),
    #[cfg(feature = "gpu")]
    Gpu(GpuTexture),
}

impl KeyedFrame {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            KeyedFrame::Raster(img) => img.dimensions(),
            #[cfg(feature = "gpu")]
            KeyedFrame::Gpu(tex) => (tex.width, tex.height),
        }
    }
}

/// The per-frame transformation, as one of two strategies that honor the
/// same per-pixel contract.
pub enum KeyingEngine {
    Cpu(CpuKeyer),
    #[cfg(feature = "gpu")]
    Gpu(GpuKeyer),
}

impl KeyingEngine {
    /// Build the engine for `backend`. GPU initialization failures are
    /// decided here: `Auto` falls back to the CPU, `Gpu` reports them.
    pub fn select(backend: Backend) -> Result<Self> {
        match backend {
            Backend::Cpu => Ok(Self::Cpu(CpuKeyer::new(CpuMethod::ChromaDistance))),
            Backend::Threshold => {
                tracing::warn!("Threshold keying selected: hard edges, no spill suppression");
                Ok(Self::Cpu(CpuKeyer::new(CpuMethod::Threshold)))
            }
            Backend::Gpu => Self::gpu(),
            Backend::Auto => match Self::gpu() {
                Ok(engine) => Ok(engine),
                Err(e) => {
                    tracing::warn!("GPU keying unavailable ({}), using CPU", e);
                    Ok(Self::Cpu(CpuKeyer::new(CpuMethod::ChromaDistance)))
                }
            },
        }
    }

    #[cfg(feature = "gpu")]
    fn gpu() -> Result<Self> {
        GpuKeyer::new().map(Self::Gpu)
    }

    #[cfg(not(feature = "gpu"))]
    fn gpu() -> Result<Self> {
        Err(crate::error::KeyerError::resource_init(
            "GPU keying requires the 'gpu' feature",
        ))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu(k) if k.method() == CpuMethod::Threshold => "cpu-threshold",
            Self::Cpu(_) => "cpu",
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => "gpu",
        }
    }

    pub fn is_gpu(&self) -> bool {
        match self {
            Self::Cpu(_) => false,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => true,
        }
    }

    /// Key one frame. `Ok(None)` means the source has not decoded any
    /// pixels yet and the caller should try again on the next tick.
    #[cfg_attr(not(feature = "gpu"), allow(unused_variables))]
    pub fn key_frame(
        &mut self,
        source: &RgbaImage,
        config: &KeyConfig,
        target: KeyTarget,
    ) -> Result<Option<KeyedFrame>> {
        let _span = tracing::debug_span!("key_frame", backend = self.name()).entered();

        match self {
            Self::Cpu(keyer) => Ok(keyer.key_frame(source, config)?.map(KeyedFrame::Raster)),
            #[cfg(feature = "gpu")]
            Self::Gpu(keyer) => {
                if !keyer.bind(source, config)? {
                    return Ok(None);
                }
                let texture = keyer.render()?;
                match target {
                    KeyTarget::Texture => Ok(Some(KeyedFrame::Gpu(texture))),
                    KeyTarget::Raster => Ok(Some(KeyedFrame::Raster(keyer.read_back()?))),
                }
            }
        }
    }

    /// Release backend resources. Returns `true` only on the first call.
    pub fn release(&mut self) -> bool {
        match self {
            Self::Cpu(keyer) => keyer.release(),
            #[cfg(feature = "gpu")]
            Self::Gpu(keyer) => keyer.release(),
        }
    }

    pub fn is_released(&self) -> bool {
        match self {
            Self::Cpu(keyer) => keyer.is_released(),
            #[cfg(feature = "gpu")]
            Self::Gpu(keyer) => keyer.is_released(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(not(feature = "gpu"))]
    use crate::error::KeyerError;
    use image::Rgba;

    #[test]
    fn cpu_backends_resolve_without_gpu() {
        assert_eq!(KeyingEngine::select(Backend::Cpu).unwrap().name(), "cpu");
        assert_eq!(
            KeyingEngine::select(Backend::Threshold).unwrap().name(),
            "cpu-threshold"
        );
        assert!(!KeyingEngine::select(Backend::Cpu).unwrap().is_gpu());
        assert!(!KeyingEngine::select(Backend::Threshold).unwrap().is_gpu());
    }

    #[test]
    fn auto_always_yields_an_engine() {
        let engine = KeyingEngine::select(Backend::Auto).unwrap();
        assert!(!engine.is_released());
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn explicit_gpu_without_feature_is_resource_init_error() {
        assert!(matches!(
            KeyingEngine::select(Backend::Gpu),
            Err(KeyerError::ResourceInit(_))
        ));
        assert!(!KeyingEngine::select(Backend::Auto).unwrap().is_gpu());
    }

    #[test]
    fn released_engine_refuses_frames() {
        let mut engine = KeyingEngine::select(Backend::Cpu).unwrap();
        assert!(engine.release());
        assert!(!engine.release());
        let frame = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        assert!(engine
            .key_frame(&frame, &KeyConfig::default(), KeyTarget::Raster)
            .is_err());
    }
}
