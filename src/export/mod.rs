//! Frame export: PNG screenshots, palette-indexed GIF loops and recorded video.
//!
//! Every export is an [`ExportJob`] that only ever moves forward through
//! `Idle -> Capturing -> Encoding -> Done | Failed`. [`ExportController`] holds
//! the single active-job slot; a request while a job is still running is
//! refused with [`ExportError::Busy`]. Capture copies the live surface into the
//! job's own offscreen buffer on each tick, so rendering never waits on export.

pub mod gif;
pub mod screenshot;
pub mod video;

use crate::surface::{Surface, SurfaceError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

pub use self::gif::{GifJob, GifSettings, Palette};
pub use self::video::{
    CancelFlag, FfmpegRecorder, RecorderBackend, RecorderSettings, Recording, VideoCodec, VideoJob,
    VideoSettings,
};

pub const FILE_PREFIX: &str = "glitchviz";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Screenshot,
    Animation,
    Video,
}

impl ExportFormat {
    pub fn label(self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Animation => "gif",
            Self::Video => "video",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Capturing,
    Encoding,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Capturing => 1,
            Self::Encoding => 2,
            Self::Done | Self::Failed => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Encoding => "encoding",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("an export is already in progress")]
    Busy,
    #[error("export job cannot move from {from:?} to {to:?}")]
    Transition { from: JobState, to: JobState },
    #[error("surface unavailable: {0}")]
    Surface(#[from] SurfaceError),
    #[error("png encode failed: {0}")]
    Png(#[from] image::ImageError),
    #[error("gif encode failed: {0}")]
    Gif(#[from] ::gif::EncodingError),
    #[error("video recording is not supported here: {0}")]
    Unsupported(String),
    #[error("recorder failed: {0}")]
    Recorder(String),
    #[error("export cancelled")]
    Cancelled,
    #[error("write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct ExportJob {
    pub format: ExportFormat,
    state: JobState,
    pub frame_count: u32,
    pub target_fps: u32,
    pub max_dimension: u32,
}

impl ExportJob {
    pub fn new(format: ExportFormat, frame_count: u32, target_fps: u32, max_dimension: u32) -> Self {
        Self {
            format,
            state: JobState::Idle,
            frame_count,
            target_fps,
            max_dimension,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Forward-only transition. Any non-terminal state may fail.
    pub fn advance(&mut self, to: JobState) -> Result<(), ExportError> {
        let from = self.state;
        if from.is_terminal() || to.rank() <= from.rank() {
            return Err(ExportError::Transition { from, to });
        }
        tracing::debug!(format = self.format.label(), from = from.label(), to = to.label(), "export job");
        self.state = to;
        Ok(())
    }

    pub(crate) fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
        }
    }
}

/// Largest (w, h) with the source aspect ratio whose longer side is at most `max`.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max == 0 {
        return (0, 0);
    }
    let longer = width.max(height);
    if longer <= max {
        return (width, height);
    }
    let scale = |side: u32| ((side as u64 * max as u64 + longer as u64 / 2) / longer as u64).max(1) as u32;
    if width >= height {
        (max, scale(height).min(max))
    } else {
        (scale(width).min(max), max)
    }
}

/// Round down to even sides (4:2:0 chroma), at least 2x2.
pub fn even_dims((width, height): (u32, u32)) -> (u32, u32) {
    ((width & !1).max(2), (height & !1).max(2))
}

/// A finished export, ready to be written out.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub format: ExportFormat,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub bytes: Vec<u8>,
}

pub fn artifact_file_name(extension: &str, now: DateTime<Local>) -> String {
    format!("{FILE_PREFIX}-{}.{extension}", now.format("%Y%m%d-%H%M%S"))
}

/// Write `artifact` into `dir` under a timestamped name, never overwriting.
pub fn save_artifact(dir: &Path, artifact: &Artifact, now: DateTime<Local>) -> Result<PathBuf, ExportError> {
    let io_err = |path: &Path, source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let name = artifact_file_name(artifact.extension, now);
    let mut path = dir.join(&name);
    let mut n = 1u32;
    while path.exists() {
        let stem = name.trim_end_matches(&format!(".{}", artifact.extension));
        path = dir.join(format!("{stem}-{n}.{}", artifact.extension));
        n += 1;
    }
    std::fs::write(&path, &artifact.bytes).map_err(|e| io_err(&path, e))?;
    tracing::info!(
        format = artifact.format.label(),
        bytes = artifact.bytes.len(),
        path = %path.display(),
        "export saved"
    );
    Ok(path)
}

#[derive(Debug)]
pub enum ExportEvent {
    Finished(Artifact),
    Failed {
        format: ExportFormat,
        error: ExportError,
    },
}

enum ActiveJob {
    Gif(GifJob),
    Video(VideoJob),
}

impl ActiveJob {
    fn job(&self) -> &ExportJob {
        match self {
            Self::Gif(j) => j.job(),
            Self::Video(j) => j.job(),
        }
    }
}

/// Owns the one export slot shared by every format.
pub struct ExportController {
    gif: GifSettings,
    video: VideoSettings,
    recorder: Box<dyn RecorderBackend>,
    active: Option<ActiveJob>,
}

impl ExportController {
    pub fn new(gif: GifSettings, video: VideoSettings, recorder: Box<dyn RecorderBackend>) -> Self {
        Self {
            gif,
            video,
            recorder,
            active: None,
        }
    }

    pub fn gif_settings(&self) -> &GifSettings {
        &self.gif
    }

    pub fn video_settings(&self) -> &VideoSettings {
        &self.video
    }

    /// State of the active job, `Idle` when the slot is free.
    pub fn state(&self) -> JobState {
        self.active
            .as_ref()
            .map(|j| j.job().state())
            .unwrap_or(JobState::Idle)
    }

    pub fn active_format(&self) -> Option<ExportFormat> {
        self.active.as_ref().map(|j| j.job().format)
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// (frames captured, frames wanted) for the active job.
    pub fn progress(&self) -> Option<(u32, u32)> {
        self.active.as_ref().map(|j| match j {
            ActiveJob::Gif(g) => (g.captured(), g.job().frame_count),
            ActiveJob::Video(v) => (v.captured(), v.job().frame_count),
        })
    }

    /// Encode the current surface as PNG. Completes before returning.
    pub fn screenshot(&mut self, surface: &Surface) -> Result<Artifact, ExportError> {
        if self.is_busy() {
            return Err(ExportError::Busy);
        }
        screenshot::capture(surface)
    }

    pub fn start_gif(&mut self, surface: &Surface, now: Instant) -> Result<(), ExportError> {
        if self.is_busy() {
            return Err(ExportError::Busy);
        }
        let job = GifJob::start(self.gif, surface.dims(), now)?;
        self.active = Some(ActiveJob::Gif(job));
        Ok(())
    }

    pub fn start_video(&mut self, surface: &Surface, now: Instant) -> Result<(), ExportError> {
        if self.is_busy() {
            return Err(ExportError::Busy);
        }
        let job = VideoJob::start(self.recorder.as_ref(), self.video, surface.dims(), now)?;
        self.active = Some(ActiveJob::Video(job));
        Ok(())
    }

    /// Request cancellation of a running video export. Animation exports
    /// always run to completion, so this returns false for them.
    pub fn cancel(&mut self) -> bool {
        match &self.active {
            Some(ActiveJob::Video(v)) => {
                v.cancel_flag().cancel();
                true
            }
            _ => false,
        }
    }

    /// Drive the active job with this frame's surface. Returns an event
    /// once the job reaches a terminal state; the slot is then free again.
    pub fn tick(&mut self, surface: &Surface, now: Instant) -> Option<ExportEvent> {
        let active = self.active.as_mut()?;
        let (format, outcome) = match active {
            ActiveJob::Gif(job) => (ExportFormat::Animation, job.tick(surface, now)?),
            ActiveJob::Video(job) => (ExportFormat::Video, job.tick(surface, now)?),
        };
        self.active = None;
        Some(match outcome {
            Ok(artifact) => ExportEvent::Finished(artifact),
            Err(error) => {
                tracing::warn!(format = format.label(), "export failed: {error}");
                ExportEvent::Failed { format, error }
            }
        })
    }
}
