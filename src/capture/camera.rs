use super::{FrameSlot, FrameSource};
use crate::error::{KeyerError, Result};
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::CallbackCamera;
use std::path::Path;

/// Which way the camera should point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Rear camera, pointing at the scene.
    Environment,
    /// Front camera, pointing at the user.
    User,
}

impl Facing {
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Facing::Environment => &["back", "rear", "environment", "world"],
            Facing::User => &["front", "user", "face", "facetime", "integrated"],
        }
    }

    /// Whole-word match, so "loopback" is not a back camera.
    fn matches(self, label: &str) -> bool {
        label
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
            .any(|word| {
                let word = word.to_ascii_lowercase();
                self.keywords().contains(&word.as_str())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Prefer a camera with this facing, otherwise use the requested index.
    Ideal(Facing),
    /// Only a camera with this facing is acceptable.
    Exact(Facing),
}

/// Stream constraints for camera acquisition. Audio is never requested.
#[derive(Debug, Clone)]
pub struct CameraRequest {
    pub device_index: u32,
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
    /// Devices that must never be opened as the camera, such as the
    /// loopback device this process writes to.
    pub excluded: Vec<CameraIndex>,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            device_index: 0,
            facing: FacingMode::Ideal(Facing::Environment),
            width: 1280,
            height: 720,
            excluded: Vec::new(),
        }
    }
}

impl CameraRequest {
    /// Exclude the V4L device behind `path` (`/dev/videoN`). Paths that do
    /// not name a numbered video node are ignored.
    pub fn excluding_device_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        if let Some(index) = video_node_index(path.as_ref()) {
            self.excluded.push(CameraIndex::Index(index));
        }
        self
    }
}

fn video_node_index(path: &Path) -> Option<u32> {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    path.file_name()?
        .to_str()?
        .strip_prefix("video")?
        .parse()
        .ok()
}

/// An enumerated capture device.
#[derive(Debug, Clone)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

impl CameraRequest {
    /// Pick the device satisfying these constraints.
    pub fn resolve(&self, devices: &[CameraDevice]) -> Result<CameraIndex> {
        let (facing, exact) = match self.facing {
            FacingMode::Ideal(f) => (f, false),
            FacingMode::Exact(f) => (f, true),
        };

        let candidates: Vec<&CameraDevice> = devices
            .iter()
            .filter(|d| !self.excluded.contains(&d.index))
            .collect();

        if let Some(device) = candidates.iter().find(|d| facing.matches(&d.label)) {
            tracing::debug!("Camera {:?} matches {:?} facing", device.label, facing);
            return Ok(device.index.clone());
        }

        if exact {
            return Err(KeyerError::acquisition(format!(
                "no {facing:?}-facing camera among {} device(s)",
                candidates.len()
            )));
        }

        let wanted = CameraIndex::Index(self.device_index);
        if self.excluded.contains(&wanted) {
            return Err(KeyerError::acquisition(format!(
                "camera {} is the output device",
                self.device_index
            )));
        }
        if devices.is_empty() || candidates.iter().any(|d| d.index == wanted) {
            Ok(wanted)
        } else {
            Err(KeyerError::acquisition(format!(
                "camera {} not found",
                self.device_index
            )))
        }
    }
}

/// Live camera feed. Frames arrive on the camera's own thread and land in a
/// slot that ticks poll.
pub struct LiveCameraSource {
    camera: CallbackCamera,
    slot: FrameSlot,
}

impl LiveCameraSource {
    /// Acquire a camera stream. Fails with [`KeyerError::Acquisition`] when
    /// permission is denied or no device fits; the caller decides whether to
    /// retry.
    pub fn request(request: &CameraRequest) -> Result<Self> {
        let devices = enumerate_devices()?;
        let index = request.resolve(&devices)?;

        tracing::info!(
            "Initializing camera {} at {}x{}",
            index,
            request.width,
            request.height
        );

        let format = if request.width == 0 || request.height == 0 {
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution)
        } else {
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
                Resolution::new(request.width, request.height),
            ))
        };

        let slot = FrameSlot::new();
        let sink = slot.clone();
        let mut camera = CallbackCamera::new(index, format, move |buffer| {
            match buffer.decode_image::<RgbAFormat>() {
                Ok(frame) => sink.publish(frame),
                Err(e) => tracing::debug!("Dropping undecodable camera frame: {}", e),
            }
        })
        .map_err(|e| KeyerError::acquisition(format!("failed to open camera: {e}")))?;

        camera
            .open_stream()
            .map_err(|e| KeyerError::acquisition(format!("failed to open camera stream: {e}")))?;

        tracing::info!("Camera stream opened");

        Ok(Self { camera, slot })
    }
}

impl FrameSource for LiveCameraSource {
    fn dimensions(&self) -> (u32, u32) {
        self.slot.dimensions()
    }

    fn read_frame(&mut self) -> Result<Option<RgbaImage>> {
        Ok(self.slot.latest())
    }
}

impl Drop for LiveCameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", e);
        }
    }
}

fn enumerate_devices() -> Result<Vec<CameraDevice>> {
    let infos = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| KeyerError::acquisition(format!("failed to enumerate cameras: {e}")))?;
    Ok(infos
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format!("{} {}", info.human_name(), info.description()),
        })
        .collect())
}
