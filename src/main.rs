use anyhow::{bail, Context, Result};
use chroma_overlay::{
    Backend, CameraRequest, Compositor, ConfigSource, Facing, FacingMode, FileConfigSource,
    KeySettings, KeyingEngine, LiveCameraSource, LoopingOverlaySource, OutputMode, OverlayAsset,
    OverlayOptions, RenderLoop, SharedKeyConfig, V4L2Output,
};
use chroma_overlay::render_loop::DEFAULT_FALLBACK_FPS;
use clap::{Parser, ValueEnum};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Auto,
    Gpu,
    Cpu,
    Threshold,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => Backend::Auto,
            BackendArg::Gpu => Backend::Gpu,
            BackendArg::Cpu => Backend::Cpu,
            BackendArg::Threshold => Backend::Threshold,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputModeArg {
    Surface,
    Texture,
}

impl From<OutputModeArg> for OutputMode {
    fn from(arg: OutputModeArg) -> Self {
        match arg {
            OutputModeArg::Surface => OutputMode::Surface,
            OutputModeArg::Texture => OutputMode::Texture,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FacingArg {
    Environment,
    User,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Overlay asset: a video file, an animated GIF, or a directory of frames
    #[arg(long)]
    overlay: String,

    /// Fallback webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Preferred camera facing
    #[arg(long, value_enum, default_value_t = FacingArg::Environment)]
    facing: FacingArg,

    /// Refuse cameras that do not match --facing
    #[arg(long)]
    exact_facing: bool,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Overlay frame rate for image sequences and timer pacing
    #[arg(long, default_value_t = DEFAULT_FALLBACK_FPS)]
    fps: f64,

    /// Keying backend
    #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Hand the overlay to the sink as a flattened surface or as a texture
    #[arg(long, value_enum, default_value_t = OutputModeArg::Surface)]
    output_mode: OutputModeArg,

    /// Key settings TOML file, reloaded when it changes
    #[arg(long, conflicts_with_all = ["keycolor", "similarity", "smoothness", "spill"])]
    config: Option<String>,

    /// Key color as #RRGGBB
    #[arg(long)]
    keycolor: Option<String>,

    #[arg(long)]
    similarity: Option<f32>,

    #[arg(long)]
    smoothness: Option<f32>,

    #[arg(long)]
    spill: Option<f32>,

    /// Stop after this many composited frames
    #[arg(long)]
    frames: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn key_settings(&self) -> KeySettings {
        let defaults = KeySettings::default();
        KeySettings {
            keycolor: self.keycolor.clone().unwrap_or(defaults.keycolor),
            similarity: self.similarity.unwrap_or(defaults.similarity),
            smoothness: self.smoothness.unwrap_or(defaults.smoothness),
            spill: self.spill.unwrap_or(defaults.spill),
        }
    }

    fn camera_request(&self) -> CameraRequest {
        let facing = match self.facing {
            FacingArg::Environment => Facing::Environment,
            FacingArg::User => Facing::User,
        };
        CameraRequest {
            device_index: self.input_device,
            facing: if self.exact_facing {
                FacingMode::Exact(facing)
            } else {
                FacingMode::Ideal(facing)
            },
            width: self.capture_width,
            height: self.capture_height,
            excluded: Vec::new(),
        }
        .excluding_device_path(&self.output_device)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("chroma-overlay starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Overlay: {} (fallback {} fps)", args.overlay, args.fps);

    // Decided once: a failed GPU init either falls back here or aborts.
    let engine = KeyingEngine::select(args.backend.into())
        .context("Failed to initialize keying backend")?;
    tracing::info!("Keying backend: {}", engine.name());

    let compositor = Compositor::new(args.output_mode.into());
    if compositor.mode() == OutputMode::Texture && engine.is_gpu() {
        bail!("The v4l2loopback sink cannot sample GPU overlay textures, use --output-mode surface");
    }

    let overlay = LoopingOverlaySource::open(
        OverlayAsset::from_path(&args.overlay).context("Unsupported overlay asset")?,
        &OverlayOptions {
            fps: args.fps,
            looping: true,
        },
    )
    .context("Failed to open overlay asset")?;

    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let camera = LiveCameraSource::request(&args.camera_request())
        .context("Failed to acquire camera")?;

    let composited = match &args.config {
        Some(path) => {
            let config = FileConfigSource::open(path)
                .with_context(|| format!("Failed to load key settings from {path}"))?;
            run(camera, overlay, engine, compositor, output, config, &args)?
        }
        None => {
            let config = args
                .key_settings()
                .resolve()
                .context("Invalid key settings")?;
            let shared = SharedKeyConfig::new(config);
            run(camera, overlay, engine, compositor, output, shared, &args)?
        }
    };

    tracing::info!("Composited {} frames", composited);
    Ok(())
}

fn run<K: ConfigSource>(
    camera: LiveCameraSource,
    overlay: LoopingOverlaySource,
    engine: KeyingEngine,
    compositor: Compositor,
    output: V4L2Output,
    config: K,
    args: &Args,
) -> Result<u64> {
    let mut render = RenderLoop::new(camera, overlay, engine, compositor, output, config, args.fps)
        .context("Failed to build render loop")?;

    let stop = render.stop_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Ctrl+C received, stopping");
        stop.stop();
    })
    .context("Failed to install Ctrl+C handler")?;

    tracing::info!("Press Ctrl+C to stop");
    render.run(args.frames).context("Render loop failed")
}
