use crate::export::{GifSettings, VideoSettings};
use crate::images::DEFAULT_PROXY_BASE;
use crate::params::DEFAULT_SMOOTHING;
use crate::visual::DriveMode;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "glitchviz",
    version,
    about = "Glitch, grain and RGB-split image renderer for the terminal, optionally driven by audio"
)]
pub struct Config {
    /// Image layer: file path, http(s) URL or data: URI. Repeat for more layers.
    #[arg(long = "image", value_name = "LOCATOR")]
    pub images: Vec<String>,

    /// WAV file to play and analyse.
    #[arg(long, value_name = "WAV")]
    pub audio: Option<PathBuf>,

    /// Analyse the audio without opening an output device.
    #[arg(long, default_value_t = false)]
    pub silent: bool,

    #[arg(long, default_value = DEFAULT_PROXY_BASE)]
    pub proxy_url: String,

    #[arg(long, default_value_t = 15)]
    pub fetch_timeout_secs: u64,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    #[arg(long, value_enum, default_value_t = RendererMode::HalfBlock)]
    pub renderer: RendererMode,

    #[arg(long, value_enum, default_value_t = DriveArg::Manual)]
    pub drive: DriveArg,

    #[arg(long, default_value_t = DEFAULT_SMOOTHING)]
    pub smoothing: f32,

    /// Preset applied at start (name or substring).
    #[arg(long)]
    pub preset: Option<String>,

    #[arg(long, default_value = ".")]
    pub export_dir: PathBuf,

    #[arg(long, default_value_t = 8)]
    pub gif_frames: u32,

    #[arg(long, default_value_t = 10)]
    pub gif_fps: u32,

    #[arg(long, default_value_t = 512)]
    pub gif_max_size: u32,

    #[arg(long, default_value_t = 64)]
    pub gif_colors: usize,

    #[arg(long, default_value_t = 150)]
    pub video_frames: u32,

    #[arg(long, default_value_t = 30)]
    pub video_fps: u32,

    #[arg(long, default_value_t = 720)]
    pub video_max_size: u32,

    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Write logs here instead of `glitchviz.log` beside the prefs file.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub no_prefs: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_probe: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub sync_updates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RendererMode {
    #[value(name = "half-block", alias = "halfblock", alias = "half_block", alias = "hb")]
    HalfBlock,
    Kitty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriveArg {
    Manual,
    Audio,
}

impl From<DriveArg> for DriveMode {
    fn from(v: DriveArg) -> Self {
        match v {
            DriveArg::Manual => DriveMode::Manual,
            DriveArg::Audio => DriveMode::Audio,
        }
    }
}

impl Config {
    pub fn gif_settings(&self) -> GifSettings {
        GifSettings {
            frames: self.gif_frames.max(1),
            fps: self.gif_fps.max(1),
            max_dimension: self.gif_max_size.max(1),
            max_colors: self.gif_colors.clamp(2, 256),
        }
    }

    pub fn video_settings(&self) -> VideoSettings {
        VideoSettings {
            frames: self.video_frames.max(1),
            fps: self.video_fps.max(1),
            max_dimension: self.video_max_size.max(2),
        }
    }
}
