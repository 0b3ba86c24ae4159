use super::DisplaySink;
use crate::compositor::CompositeOutput;
use crate::error::{KeyerError, Result};
use image::{imageops, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, FourCC};

/// Publishes composited frames to a v4l2loopback device as YUYV.
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        if width == 0 || height == 0 || width % 2 != 0 {
            return Err(KeyerError::output(format!(
                "YUYV output needs a non-zero, even width; got {width}x{height}"
            )));
        }

        negotiate_format(path, width, height);

        let file = File::options().write(true).open(path).map_err(|e| {
            KeyerError::output(format!(
                "failed to open v4l2loopback device at {}: {e}",
                path.display()
            ))
        })?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
            packed: Vec::with_capacity(width as usize * height as usize * 2),
        })
    }
}

/// Announce the YUYV frame size to the loopback driver. Drivers that refuse
/// still accept raw writes, so failures are only logged.
fn negotiate_format(path: &Path, width: u32, height: u32) {
    let negotiated = Device::with_path(path).and_then(|device| {
        let mut format = Output::format(&device)?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"YUYV");
        Output::set_format(&device, &format)
    });

    match negotiated {
        Ok(format) => tracing::debug!("Loopback format: {:?}", format),
        Err(e) => tracing::warn!("Could not set loopback format, writing raw frames: {}", e),
    }
}

/// Pack an RGBA surface into `out` as YUYV 4:2:2, reusing its allocation.
///
/// Each pixel pair shares the chroma of its mean colour. A trailing odd
/// pixel is paired with itself. Alpha is ignored.
fn pack_yuyv(surface: &RgbaImage, out: &mut Vec<u8>) {
    let row_bytes = surface.width() as usize * 4;
    out.clear();
    if row_bytes == 0 {
        return;
    }
    out.reserve(surface.as_raw().len() / 2 + 4 * surface.height() as usize);

    for row in surface.as_raw().chunks_exact(row_bytes) {
        let pairs = row.chunks_exact(8);
        let tail = pairs.remainder();
        for pair in pairs {
            push_pair(out, [pair[0], pair[1], pair[2]], [pair[4], pair[5], pair[6]]);
        }
        if let &[r, g, b, _] = tail {
            push_pair(out, [r, g, b], [r, g, b]);
        }
    }
}

fn push_pair(out: &mut Vec<u8>, left: [u8; 3], right: [u8; 3]) {
    let mean = |i: usize| (i32::from(left[i]) + i32::from(right[i]) + 1) / 2;
    let (u, v) = chroma(mean(0), mean(1), mean(2));
    out.extend_from_slice(&[luma(left), u, luma(right), v]);
}

// Full-range BT.601 in 8.8 fixed point.
fn luma([r, g, b]: [u8; 3]) -> u8 {
    let y = 77 * i32::from(r) + 150 * i32::from(g) + 29 * i32::from(b);
    ((y + 128) >> 8).clamp(0, 255) as u8
}

fn chroma(r: i32, g: i32, b: i32) -> (u8, u8) {
    let u = (-43 * r - 85 * g + 128 * b + 128) >> 8;
    let v = (128 * r - 107 * g - 21 * b + 128) >> 8;
    ((u + 128).clamp(0, 255) as u8, (v + 128).clamp(0, 255) as u8)
}

impl DisplaySink for V4L2Output {
    fn present(&mut self, frame: &CompositeOutput) -> Result<()> {
        let _span = tracing::debug_span!("present").entered();

        let surface = frame.flatten()?;
        let surface = if surface.dimensions() != (self.width, self.height) {
            imageops::resize(
                &surface,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            )
        } else {
            surface
        };

        pack_yuyv(&surface, &mut self.packed);
        self.file
            .write_all(&self.packed)
            .map_err(|e| KeyerError::output(format!("failed to write frame to v4l2loopback: {e}")))?;

        Ok(())
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }
}
