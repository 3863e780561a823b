use super::{Artifact, ExportError, ExportFormat, ExportJob, JobState, fit_within};
use crate::surface::{Surface, SurfaceError};
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MAX_PALETTE_SAMPLES: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GifSettings {
    pub frames: u32,
    pub fps: u32,
    pub max_dimension: u32,
    pub max_colors: usize,
}

impl Default for GifSettings {
    fn default() -> Self {
        Self {
            frames: 8,
            fps: 10,
            max_dimension: 512,
            max_colors: 64,
        }
    }
}

/// Shared colour table built once from the first frame.
#[derive(Clone, Debug)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
    cache: HashMap<[u8; 3], u8>,
}

impl Palette {
    /// Median-cut quantisation of an RGBA buffer to at most `max_colors` entries.
    pub fn median_cut(rgba: &[u8], max_colors: usize) -> Self {
        let max_colors = max_colors.clamp(1, 256);
        let total = rgba.len() / 4;
        let step = (total / MAX_PALETTE_SAMPLES).max(1);
        let samples = rgba
            .chunks_exact(4)
            .step_by(step)
            .map(|p| [p[0], p[1], p[2]])
            .collect::<Vec<_>>();
        if samples.is_empty() {
            return Self::from_colors(vec![[0, 0, 0]]);
        }

        let mut boxes = vec![samples];
        while boxes.len() < max_colors {
            let widest = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.len() > 1)
                .map(|(i, b)| {
                    let (channel, range) = widest_channel(b);
                    (i, channel, range)
                })
                .filter(|(_, _, range)| *range > 0)
                .max_by_key(|(_, _, range)| *range);
            let Some((idx, channel, _)) = widest else {
                break;
            };
            let mut lower = boxes.swap_remove(idx);
            lower.sort_unstable_by_key(|c| c[channel]);
            let upper = lower.split_off(lower.len() / 2);
            boxes.push(lower);
            boxes.push(upper);
        }

        Self::from_colors(boxes.iter().map(|b| mean_color(b)).collect())
    }

    pub fn from_colors(colors: Vec<[u8; 3]>) -> Self {
        Self {
            colors,
            cache: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    /// Flat RGB table as the encoder expects it.
    pub fn to_rgb_table(&self) -> Vec<u8> {
        self.colors.iter().flatten().copied().collect()
    }

    pub fn index_of(&mut self, rgb: [u8; 3]) -> u8 {
        if let Some(idx) = self.cache.get(&rgb) {
            return *idx;
        }
        let idx = self
            .colors
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| {
                let dr = c[0] as i32 - rgb[0] as i32;
                let dg = c[1] as i32 - rgb[1] as i32;
                let db = c[2] as i32 - rgb[2] as i32;
                dr * dr + dg * dg + db * db
            })
            .map(|(i, _)| i as u8)
            .unwrap_or(0);
        self.cache.insert(rgb, idx);
        idx
    }

    pub fn map_frame(&mut self, rgba: &[u8]) -> Vec<u8> {
        rgba.chunks_exact(4)
            .map(|p| self.index_of([p[0], p[1], p[2]]))
            .collect()
    }
}

fn widest_channel(colors: &[[u8; 3]]) -> (usize, u8) {
    let mut lo = [u8::MAX; 3];
    let mut hi = [0u8; 3];
    for c in colors {
        for ch in 0..3 {
            lo[ch] = lo[ch].min(c[ch]);
            hi[ch] = hi[ch].max(c[ch]);
        }
    }
    (0..3)
        .map(|ch| (ch, hi[ch] - lo[ch]))
        .max_by_key(|(_, range)| *range)
        .unwrap_or((0, 0))
}

fn mean_color(colors: &[[u8; 3]]) -> [u8; 3] {
    let n = colors.len().max(1) as u64;
    let mut sum = [0u64; 3];
    for c in colors {
        for ch in 0..3 {
            sum[ch] += c[ch] as u64;
        }
    }
    [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8]
}

/// Animated GIF capture. There is no cancel path: the job captures its
/// frames and finishes or fails.
pub struct GifJob {
    job: ExportJob,
    settings: GifSettings,
    offscreen: Surface,
    palette: Option<Palette>,
    encoder: Option<::gif::Encoder<Vec<u8>>>,
    captured: u32,
    next_at: Instant,
    interval: Duration,
}

impl GifJob {
    pub fn start(settings: GifSettings, source: (usize, usize), now: Instant) -> Result<Self, ExportError> {
        let max_side = settings.max_dimension.min(u16::MAX as u32);
        let (w, h) = fit_within(source.0 as u32, source.1 as u32, max_side);
        if w == 0 || h == 0 {
            return Err(SurfaceError::Empty {
                width: source.0,
                height: source.1,
            }
            .into());
        }
        let fps = settings.fps.max(1);
        let mut job = ExportJob::new(ExportFormat::Animation, settings.frames.max(1), fps, max_side);
        job.advance(JobState::Capturing)?;
        tracing::info!(width = w, height = h, frames = job.frame_count, fps, "gif export started");
        Ok(Self {
            job,
            settings,
            offscreen: Surface::new(w as usize, h as usize),
            palette: None,
            encoder: None,
            captured: 0,
            next_at: now,
            interval: Duration::from_secs_f64(1.0 / fps as f64),
        })
    }

    pub fn job(&self) -> &ExportJob {
        &self.job
    }

    pub fn captured(&self) -> u32 {
        self.captured
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.offscreen.width() as u32, self.offscreen.height() as u32)
    }

    /// Capture a frame when one is due. Returns the outcome once terminal.
    pub fn tick(&mut self, surface: &Surface, now: Instant) -> Option<Result<Artifact, ExportError>> {
        if now < self.next_at {
            return None;
        }
        self.next_at += self.interval;
        if self.next_at < now {
            self.next_at = now + self.interval;
        }

        if let Err(err) = self.capture(surface) {
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
        let (w, h) = self.dims();

        if self.palette.is_none() {
            let palette = Palette::median_cut(self.offscreen.pixels(), self.settings.max_colors);
            let mut encoder = ::gif::Encoder::new(Vec::new(), w as u16, h as u16, &palette.to_rgb_table())?;
            encoder.set_repeat(::gif::Repeat::Infinite)?;
            tracing::debug!(colors = palette.len(), "gif palette built");
            self.palette = Some(palette);
            self.encoder = Some(encoder);
        }
        let (Some(palette), Some(encoder)) = (self.palette.as_mut(), self.encoder.as_mut()) else {
            return Err(ExportError::Transition {
                from: self.job.state(),
                to: JobState::Capturing,
            });
        };

        let indices = palette.map_frame(self.offscreen.pixels());
        let frame = ::gif::Frame {
            width: w as u16,
            height: h as u16,
            buffer: Cow::Owned(indices),
            delay: (100 / self.job.target_fps.max(1)) as u16,
            dispose: ::gif::DisposalMethod::Background,
            ..::gif::Frame::default()
        };
        encoder.write_frame(&frame)?;
        self.captured += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<Artifact, ExportError> {
        self.job.advance(JobState::Encoding)?;
        let encoder = self.encoder.take().ok_or(ExportError::Transition {
            from: JobState::Encoding,
            to: JobState::Done,
        })?;
        let bytes = encoder.into_inner().map_err(::gif::EncodingError::from)?;
        self.job.advance(JobState::Done)?;
        let (width, height) = self.dims();
        tracing::info!(width, height, frames = self.captured, bytes = bytes.len(), "gif export encoded");
        Ok(Artifact {
            format: ExportFormat::Animation,
            extension: "gif",
            width,
            height,
            frames: self.captured,
            bytes,
        })
    }
}
