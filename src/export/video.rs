use super::{Artifact, ExportError, ExportFormat, ExportJob, JobState, even_dims, fit_within};
use crate::surface::{Surface, SurfaceError};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const HIGH_BITRATE: u32 = 8_000_000;
pub const LOW_BITRATE: u32 = 4_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoCodec {
    Vp9,
    Vp8,
    Generic,
}

impl VideoCodec {
    /// Tried in this order; the first supported one wins.
    pub const PREFERENCE: [Self; 3] = [Self::Vp9, Self::Vp8, Self::Generic];

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Vp9 => "video/webm;codecs=vp9",
            Self::Vp8 => "video/webm;codecs=vp8",
            Self::Generic => "video/mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Vp9 | Self::Vp8 => "webm",
            Self::Generic => "mp4",
        }
    }

    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::Vp9 => "libvpx-vp9",
            Self::Vp8 => "libvpx",
            Self::Generic => "mpeg4",
        }
    }
}

pub fn bitrate_for(width: u32, height: u32) -> u32 {
    if width >= 720 || height >= 720 {
        HIGH_BITRATE
    } else {
        LOW_BITRATE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoSettings {
    pub frames: u32,
    pub fps: u32,
    pub max_dimension: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            frames: 150,
            fps: 30,
            max_dimension: 720,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecorderSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bits_per_second: u32,
}

/// Something that can turn a stream of RGBA frames into a video container.
pub trait RecorderBackend {
    fn is_type_supported(&self, codec: VideoCodec) -> bool;
    fn start(&self, settings: &RecorderSettings) -> Result<Box<dyn Recording>, ExportError>;
}

pub trait Recording {
    fn push_frame(&mut self, rgba: &[u8]) -> Result<(), ExportError>;
    /// Flush and return the concatenated container bytes.
    fn stop(self: Box<Self>) -> Result<Vec<u8>, ExportError>;
    fn abort(self: Box<Self>);
}

pub fn pick_codec(backend: &dyn RecorderBackend) -> Option<VideoCodec> {
    VideoCodec::PREFERENCE
        .into_iter()
        .find(|c| backend.is_type_supported(*c))
}

#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct VideoJob {
    job: ExportJob,
    settings: RecorderSettings,
    recording: Option<Box<dyn Recording>>,
    offscreen: Surface,
    captured: u32,
    next_at: Instant,
    interval: Duration,
    cancel: CancelFlag,
}

impl VideoJob {
    pub fn start(
        backend: &dyn RecorderBackend,
        settings: VideoSettings,
        source: (usize, usize),
        now: Instant,
    ) -> Result<Self, ExportError> {
        let codec = pick_codec(backend).ok_or_else(|| {
            ExportError::Unsupported("no codec from vp9, vp8 or mp4 is available".to_string())
        })?;
        let fitted = fit_within(source.0 as u32, source.1 as u32, settings.max_dimension);
        if fitted.0 == 0 || fitted.1 == 0 {
            return Err(SurfaceError::Empty {
                width: source.0,
                height: source.1,
            }
            .into());
        }
        let (width, height) = even_dims(fitted);
        let fps = settings.fps.max(1);
        let rec = RecorderSettings {
            codec,
            width,
            height,
            fps,
            bits_per_second: bitrate_for(width, height),
        };
        let mut job = ExportJob::new(ExportFormat::Video, settings.frames.max(1), fps, settings.max_dimension);
        let recording = backend.start(&rec)?;
        job.advance(JobState::Capturing)?;
        tracing::info!(
            codec = codec.mime_type(),
            width,
            height,
            fps,
            bits_per_second = rec.bits_per_second,
            frames = job.frame_count,
            "video export started"
        );
        Ok(Self {
            job,
            settings: rec,
            recording: Some(recording),
            offscreen: Surface::new(width as usize, height as usize),
            captured: 0,
            next_at: now,
            interval: Duration::from_secs_f64(1.0 / fps as f64),
            cancel: CancelFlag::default(),
        })
    }

    pub fn job(&self) -> &ExportJob {
        &self.job
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn captured(&self) -> u32 {
        self.captured
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn tick(&mut self, surface: &Surface, now: Instant) -> Option<Result<Artifact, ExportError>> {
        if self.cancel.is_cancelled() {
            if let Some(recording) = self.recording.take() {
                recording.abort();
            }
            self.job.fail();
            tracing::info!(frames = self.captured, "video export cancelled");
            return Some(Err(ExportError::Cancelled));
        }
        if now < self.next_at {
            return None;
        }
        self.next_at += self.interval;
        if self.next_at < now {
            self.next_at = now + self.interval;
        }

        if let Err(err) = self.capture(surface) {
            if let Some(recording) = self.recording.take() {
                recording.abort();
            }
            self.job.fail();
            return Some(Err(err));
        }
        if self.captured < self.job.frame_count {
            return None;
        }
        let outcome = self.finish();
        if outcome.is_err() {
            self.job.fail();
        }
        Some(outcome)
    }

    fn capture(&mut self, surface: &Surface) -> Result<(), ExportError> {
        surface.resample_into(&mut self.offscreen)?;
        let recording = self
            .recording
            .as_mut()
            .ok_or_else(|| ExportError::Recorder("recording already closed".to_string()))?;
        recording.push_frame(self.offscreen.pixels())?;
        self.captured += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<Artifact, ExportError> {
        self.job.advance(JobState::Encoding)?;
        let recording = self
            .recording
            .take()
            .ok_or_else(|| ExportError::Recorder("recording already closed".to_string()))?;
        let bytes = recording.stop()?;
        if bytes.is_empty() {
            return Err(ExportError::Recorder("recorder produced no data".to_string()));
        }
        self.job.advance(JobState::Done)?;
        tracing::info!(frames = self.captured, bytes = bytes.len(), "video export encoded");
        Ok(Artifact {
            format: ExportFormat::Video,
            extension: self.settings.codec.extension(),
            width: self.settings.width,
            height: self.settings.height,
            frames: self.captured,
            bytes,
        })
    }
}

/// Records through an `ffmpeg` child process: raw RGBA frames on stdin, the
/// muxed container streamed back on stdout.
pub struct FfmpegRecorder {
    program: PathBuf,
    encoders: OnceLock<Option<String>>,
}

impl FfmpegRecorder {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            encoders: OnceLock::new(),
        }
    }

    fn encoder_list(&self) -> Option<&str> {
        self.encoders
            .get_or_init(|| {
                let output = Command::new(&self.program)
                    .args(["-hide_banner", "-encoders"])
                    .stdin(Stdio::null())
                    .stderr(Stdio::null())
                    .output();
                match output {
                    Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
                    Ok(out) => {
                        tracing::warn!(status = %out.status, "ffmpeg -encoders failed");
                        None
                    }
                    Err(err) => {
                        tracing::warn!(program = %self.program.display(), "ffmpeg unavailable: {err}");
                        None
                    }
                }
            })
            .as_deref()
    }
}

impl Default for FfmpegRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderBackend for FfmpegRecorder {
    fn is_type_supported(&self, codec: VideoCodec) -> bool {
        let Some(list) = self.encoder_list() else {
            return false;
        };
        list.lines()
            .any(|line| line.split_whitespace().nth(1) == Some(codec.ffmpeg_encoder()))
    }

    fn start(&self, settings: &RecorderSettings) -> Result<Box<dyn Recording>, ExportError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-video_size")
            .arg(format!("{}x{}", settings.width, settings.height))
            .arg("-framerate")
            .arg(settings.fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-c:v")
            .arg(settings.codec.ffmpeg_encoder())
            .arg("-b:v")
            .arg(settings.bits_per_second.to_string())
            .arg("-pix_fmt")
            .arg("yuv420p");
        match settings.codec {
            VideoCodec::Vp9 | VideoCodec::Vp8 => {
                cmd.arg("-deadline")
                    .arg("realtime")
                    .arg("-cpu-used")
                    .arg("8")
                    .arg("-f")
                    .arg("webm");
            }
            VideoCodec::Generic => {
                cmd.arg("-movflags")
                    .arg("frag_keyframe+empty_moov")
                    .arg("-f")
                    .arg("mp4");
            }
        }
        cmd.arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| ExportError::Recorder(format!("spawn {}: {e}", self.program.display())))?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(mut stdout)) = (stdin, stdout) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExportError::Recorder("ffmpeg pipes unavailable".to_string()));
        };

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let reader = thread::spawn(move || {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Box::new(FfmpegRecording {
            child,
            stdin: Some(stdin),
            chunks: rx,
            reader: Some(reader),
            frame_len: settings.width as usize * settings.height as usize * 4,
        }))
    }
}

struct FfmpegRecording {
    child: Child,
    stdin: Option<ChildStdin>,
    chunks: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    frame_len: usize,
}

impl Recording for FfmpegRecording {
    fn push_frame(&mut self, rgba: &[u8]) -> Result<(), ExportError> {
        if rgba.len() != self.frame_len {
            return Err(ExportError::Recorder(format!(
                "frame has {} bytes, expected {}",
                rgba.len(),
                self.frame_len
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ExportError::Recorder("ffmpeg stdin closed".to_string()))?;
        stdin
            .write_all(rgba)
            .map_err(|e| ExportError::Recorder(format!("write frame: {e}")))
    }

    fn stop(mut self: Box<Self>) -> Result<Vec<u8>, ExportError> {
        drop(self.stdin.take());
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let status = self
            .child
            .wait()
            .map_err(|e| ExportError::Recorder(format!("wait for ffmpeg: {e}")))?;
        if !status.success() {
            return Err(ExportError::Recorder(format!("ffmpeg exited with status {status}")));
        }
        Ok(self.chunks.try_iter().flatten().collect())
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
