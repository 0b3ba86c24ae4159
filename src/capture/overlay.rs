use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};
use serde::Deserialize;

use super::{frame_signal, FrameNotifier, FrameSignal, FrameSlot, FrameSource};
use crate::error::{KeyerError, Result};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "m4v"];
const STILL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];
const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Pre-recorded overlay asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayAsset {
    /// A video file decoded through `ffmpeg`.
    Video(PathBuf),
    /// An animated GIF.
    Gif(PathBuf),
    /// A directory of still frames, played in file-name order.
    ImageSequence(PathBuf),
}

impl OverlayAsset {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(Self::ImageSequence(path.to_path_buf()));
        }
        match extension(path).as_deref() {
            Some("gif") => Ok(Self::Gif(path.to_path_buf())),
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => Ok(Self::Video(path.to_path_buf())),
            _ => Err(KeyerError::decode(format!(
                "unsupported overlay asset {}",
                path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Video(p) | Self::Gif(p) | Self::ImageSequence(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayOptions {
    /// Playback rate for image sequences, which carry no timing of their own.
    pub fps: f64,
    pub looping: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            fps: 24.0,
            looping: true,
        }
    }
}

struct Playback {
    playing: AtomicBool,
    shutdown: AtomicBool,
}

/// Overlay video decoded on a background thread and looped.
///
/// Each decoded frame replaces the current one and pulses the frame signal.
pub struct LoopingOverlaySource {
    asset: OverlayAsset,
    looping: bool,
    slot: FrameSlot,
    signal: Option<FrameSignal>,
    playback: Arc<Playback>,
    child: Option<Child>,
    workers: Vec<JoinHandle<()>>,
}

impl LoopingOverlaySource {
    pub fn open(asset: OverlayAsset, options: &OverlayOptions) -> Result<Self> {
        if !(options.fps.is_finite() && options.fps > 0.0) {
            return Err(KeyerError::decode(format!(
                "overlay fps must be > 0, got {}",
                options.fps
            )));
        }

        tracing::info!("Opening overlay asset {}", asset.path().display());

        let slot = FrameSlot::new();
        let (notifier, signal) = frame_signal();
        let playback = Arc::new(Playback {
            playing: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
        });

        let (child, workers) = match &asset {
            OverlayAsset::Video(path) => {
                let info = probe_video(path)?;
                let mut child = spawn_ffmpeg(path, options.looping)?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| KeyerError::decode("ffmpeg stdout was not captured"))?;
                let stderr = child
                    .stderr
                    .take()
                    .ok_or_else(|| KeyerError::decode("ffmpeg stderr was not captured"))?;
                let logger = spawn_stderr_logger(stderr)?;
                let worker = spawn_stream_worker(
                    stdout,
                    info,
                    slot.clone(),
                    notifier,
                    Arc::clone(&playback),
                )?;
                (Some(child), vec![worker, logger])
            }
            OverlayAsset::Gif(path) => {
                let frames = load_gif(path)?;
                let worker = spawn_clip_worker(
                    frames,
                    options.looping,
                    slot.clone(),
                    notifier,
                    Arc::clone(&playback),
                )?;
                (None, vec![worker])
            }
            OverlayAsset::ImageSequence(dir) => {
                let delay = Duration::from_secs_f64(1.0 / options.fps);
                let frames = load_sequence(dir, delay)?;
                let worker = spawn_clip_worker(
                    frames,
                    options.looping,
                    slot.clone(),
                    notifier,
                    Arc::clone(&playback),
                )?;
                (None, vec![worker])
            }
        };

        Ok(Self {
            asset,
            looping: options.looping,
            slot,
            signal: Some(signal),
            playback,
            child,
            workers,
        })
    }

    pub fn asset(&self) -> &OverlayAsset {
        &self.asset
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_playing(&self) -> bool {
        self.playback.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playback.playing.store(playing, Ordering::Release);
    }
}

impl FrameSource for LoopingOverlaySource {
    fn dimensions(&self) -> (u32, u32) {
        self.slot.dimensions()
    }

    fn read_frame(&mut self) -> Result<Option<RgbaImage>> {
        Ok(self.slot.latest())
    }

    fn take_frame_signal(&mut self) -> Option<FrameSignal> {
        self.signal.take()
    }
}

impl Drop for LoopingOverlaySource {
    fn drop(&mut self) {
        self.playback.shutdown.store(true, Ordering::Release);
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("Overlay decoder thread panicked");
            }
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn decode_err(path: &Path, e: impl std::fmt::Display) -> KeyerError {
    KeyerError::decode(format!("{}: {e}", path.display()))
}

fn load_gif(path: &Path) -> Result<Vec<(RgbaImage, Duration)>> {
    let reader = BufReader::new(File::open(path)?);
    let decoder = GifDecoder::new(reader).map_err(|e| decode_err(path, e))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| decode_err(path, e))?;

    let frames: Vec<_> = frames
        .into_iter()
        .map(|frame| {
            let delay: Duration = frame.delay().into();
            // Zero-delay GIF frames play at the conventional 10 fps.
            let delay = if delay.is_zero() {
                Duration::from_millis(100)
            } else {
                delay
            };
            (frame.into_buffer(), delay)
        })
        .collect();

    if frames.is_empty() {
        return Err(decode_err(path, "GIF has no frames"));
    }
    tracing::debug!("Decoded {} GIF frames", frames.len());
    Ok(frames)
}

fn load_sequence(dir: &Path, delay: Duration) -> Result<Vec<(RgbaImage, Duration)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            extension(p)
                .map(|e| STILL_EXTENSIONS.contains(&e.as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(decode_err(dir, "no image frames found"));
    }

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let frame = image::open(path).map_err(|e| decode_err(path, e))?;
        frames.push((frame.to_rgba8(), delay));
    }
    tracing::debug!("Loaded {} sequence frames from {}", frames.len(), dir.display());
    Ok(frames)
}

fn spawn_clip_worker(
    frames: Vec<(RgbaImage, Duration)>,
    looping: bool,
    slot: FrameSlot,
    notifier: FrameNotifier,
    playback: Arc<Playback>,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("overlay-decoder".to_string())
        .spawn(move || {
            let mut index = 0;
            while !playback.shutdown.load(Ordering::Acquire) {
                if !playback.playing.load(Ordering::Acquire) {
                    std::thread::sleep(PAUSE_POLL);
                    continue;
                }

                let (frame, delay) = &frames[index];
                slot.publish(frame.clone());
                if !notifier.notify() {
                    break;
                }

                index += 1;
                if index == frames.len() {
                    if !looping {
                        break;
                    }
                    index = 0;
                }
                sleep_unless_shutdown(*delay, &playback);
            }
        })?;
    Ok(handle)
}

fn sleep_unless_shutdown(total: Duration, playback: &Playback) {
    let mut remaining = total;
    while !remaining.is_zero() && !playback.shutdown.load(Ordering::Acquire) {
        let step = remaining.min(PAUSE_POLL);
        std::thread::sleep(step);
        remaining -= step;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VideoInfo {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOut {
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Rotation in degrees from the display matrix or the legacy `rotate` tag.
    fn rotation(&self) -> i64 {
        self.side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .map(|r| r.round() as i64)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0)
    }

    /// Size of the frames ffmpeg emits. ffmpeg applies the rotation, so
    /// quarter turns swap the coded width and height.
    fn displayed_size(&self) -> Option<VideoInfo> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                if self.rotation().rem_euclid(180) == 90 {
                    Some(VideoInfo {
                        width: height,
                        height: width,
                    })
                } else {
                    Some(VideoInfo { width, height })
                }
            }
            _ => None,
        }
    }
}

fn parse_probe(path: &Path, json: &[u8]) -> Result<VideoInfo> {
    let parsed: ProbeOut = serde_json::from_slice(json)
        .map_err(|e| KeyerError::decode(format!("ffprobe json parse failed: {e}")))?;
    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| decode_err(path, "no video stream found"))?;

    let info = stream
        .displayed_size()
        .ok_or_else(|| decode_err(path, "video stream has no dimensions"))?;
    if stream.rotation() != 0 {
        tracing::debug!(
            "Overlay rotated {} degrees, decoding at {}x{}",
            stream.rotation(),
            info.width,
            info.height
        );
    }
    Ok(info)
}

fn probe_video(path: &Path) -> Result<VideoInfo> {
    let out = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|e| KeyerError::decode(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(decode_err(
            path,
            format!("ffprobe failed: {}", String::from_utf8_lossy(&out.stderr).trim()),
        ));
    }
    parse_probe(path, &out.stdout)
}

fn spawn_ffmpeg(path: &Path, looping: bool) -> Result<Child> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-v", "error", "-re"]);
    if looping {
        cmd.args(["-stream_loop", "-1"]);
    }
    cmd.arg("-i")
        .arg(path)
        .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    cmd.spawn()
        .map_err(|e| KeyerError::decode(format!("failed to run ffmpeg: {e}")))
}

/// Forward ffmpeg diagnostics to the log until the process exits.
fn spawn_stderr_logger(stderr: ChildStderr) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("overlay-ffmpeg-log".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) if !line.trim().is_empty() => {
                        tracing::warn!("ffmpeg: {}", line.trim())
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        })?;
    Ok(handle)
}

fn spawn_stream_worker(
    mut stdout: ChildStdout,
    info: VideoInfo,
    slot: FrameSlot,
    notifier: FrameNotifier,
    playback: Arc<Playback>,
) -> Result<JoinHandle<()>> {
    let frame_len = info.width as usize * info.height as usize * 4;
    let handle = std::thread::Builder::new()
        .name("overlay-decoder".to_string())
        .spawn(move || {
            let mut decoded = 0u64;
            while !playback.shutdown.load(Ordering::Acquire) {
                if !playback.playing.load(Ordering::Acquire) {
                    std::thread::sleep(PAUSE_POLL);
                    continue;
                }

                let mut buf = vec![0u8; frame_len];
                if let Err(e) = stdout.read_exact(&mut buf) {
                    if !playback.shutdown.load(Ordering::Acquire) {
                        tracing::info!("Overlay stream ended after {} frames: {}", decoded, e);
                    }
                    break;
                }

                let Some(frame) = RgbaImage::from_raw(info.width, info.height, buf) else {
                    break;
                };
                slot.publish(frame);
                decoded += 1;
                if !notifier.notify() {
                    break;
                }
            }
        })?;
    Ok(handle)
}
