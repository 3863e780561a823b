use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

pub const FFT_SIZE: usize = 2048;
pub const BIN_COUNT: usize = FFT_SIZE / 2;
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.85;
pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

pub const BASS_BINS: Range<usize> = 0..16;
pub const MID_BINS: Range<usize> = 16..128;
pub const TREBLE_BINS: Range<usize> = 128..512;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("media element is already connected to a source node")]
    SourceAlreadyCreated,
    #[error("no analysis graph has been built")]
    NoGraph,
    #[error("audio output stream failed")]
    StreamFailed,
    #[error("no default audio output device")]
    NoOutputDevice,
    #[error("unsupported output sample format: {0}")]
    UnsupportedFormat(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("read wav {path}: {source}")]
    Wav {
        path: String,
        #[source]
        source: hound::Error,
    },
    #[error("media contains no samples")]
    EmptyMedia,
}

struct MediaShared {
    samples: Vec<f32>,
    sample_rate: u32,
    cursor: AtomicU64,
    playing: AtomicBool,
    source_created: AtomicBool,
}

impl MediaShared {
    /// Copy samples at the playhead into `out`, advancing by `step` source
    /// samples per output sample. Silence while paused; the end pauses and rewinds.
    fn pull(&self, out: &mut [f32], step: f64, frac: &mut f64) {
        if !self.playing.load(Ordering::Acquire) {
            out.fill(0.0);
            return;
        }
        let mut pos = self.cursor.load(Ordering::Acquire);
        let len = self.samples.len() as u64;
        for slot in out.iter_mut() {
            *slot = if pos < len { self.samples[pos as usize] } else { 0.0 };
            *frac += step;
            let whole = frac.floor();
            pos = pos.saturating_add(whole as u64);
            *frac -= whole;
        }
        if pos >= len {
            self.playing.store(false, Ordering::Release);
            pos = 0;
        }
        self.cursor.store(pos, Ordering::Release);
    }
}

/// A playable mono audio clip with a playhead.
#[derive(Clone)]
pub struct MediaElement {
    shared: Arc<MediaShared>,
}

impl MediaElement {
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(MediaShared {
                samples,
                sample_rate: sample_rate.max(1),
                cursor: AtomicU64::new(0),
                playing: AtomicBool::new(false),
                source_created: AtomicBool::new(false),
            }),
        }
    }

    pub fn open(path: &Path) -> Result<Self, AudioError> {
        let wav_err = |source| AudioError::Wav {
            path: path.display().to_string(),
            source,
        };
        let mut reader = hound::WavReader::open(path).map_err(wav_err)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(wav_err)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(wav_err)?
            }
        };
        if interleaved.is_empty() {
            return Err(AudioError::EmptyMedia);
        }
        let mono = interleaved
            .chunks(channels)
            .map(|frame| (frame.iter().sum::<f32>() / channels as f32).clamp(-1.0, 1.0))
            .collect::<Vec<_>>();
        tracing::info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels,
            seconds = mono.len() as f32 / spec.sample_rate.max(1) as f32,
            "media loaded"
        );
        Ok(Self::from_samples(mono, spec.sample_rate))
    }

    pub fn play(&self) {
        self.shared.playing.store(true, Ordering::Release);
    }

    pub fn pause(&self) {
        self.shared.playing.store(false, Ordering::Release);
    }

    /// Returns the new playing state.
    pub fn toggle(&self) -> bool {
        let now = !self.is_playing();
        self.shared.playing.store(now, Ordering::Release);
        now
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn current_time(&self) -> f32 {
        self.shared.cursor.load(Ordering::Acquire) as f32 / self.shared.sample_rate as f32
    }

    pub fn duration(&self) -> f32 {
        self.shared.samples.len() as f32 / self.shared.sample_rate as f32
    }

    pub fn has_source(&self) -> bool {
        self.shared.source_created.load(Ordering::Acquire)
    }

    /// A media element can feed exactly one source node for its whole life.
    pub fn create_source(&self) -> Result<MediaSourceNode, AudioError> {
        if self.shared.source_created.swap(true, Ordering::AcqRel) {
            return Err(AudioError::SourceAlreadyCreated);
        }
        Ok(MediaSourceNode {
            media: Arc::clone(&self.shared),
        })
    }
}

pub struct MediaSourceNode {
    media: Arc<MediaShared>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Play through the default output device.
    Device,
    /// No device; the playhead advances with frame time.
    Silent,
}

enum OutputBackend {
    Device {
        _stream: cpal::Stream,
        failed: Arc<AtomicBool>,
    },
    Silent {
        media: Arc<MediaShared>,
        producer: HeapProd<f32>,
        carry: f64,
        frac: f64,
        scratch: Vec<f32>,
    },
}

pub struct AudioContext {
    sample_rate: u32,
    backend: OutputBackend,
}

impl AudioContext {
    fn new(mode: OutputMode, source: &MediaSourceNode, producer: HeapProd<f32>) -> Result<Self, AudioError> {
        match mode {
            OutputMode::Silent => Ok(Self {
                sample_rate: source.media.sample_rate,
                backend: OutputBackend::Silent {
                    media: Arc::clone(&source.media),
                    producer,
                    carry: 0.0,
                    frac: 0.0,
                    scratch: Vec::new(),
                },
            }),
            OutputMode::Device => {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or(AudioError::NoOutputDevice)?;
                let supported = device
                    .default_output_config()
                    .map_err(|e| AudioError::Device(e.to_string()))?;
                let sample_rate = supported.sample_rate().0;
                let config: cpal::StreamConfig = supported.clone().into();
                let failed = Arc::new(AtomicBool::new(false));
                let media = Arc::clone(&source.media);
                let stream = match supported.sample_format() {
                    cpal::SampleFormat::F32 => {
                        build_output::<f32>(&device, &config, media, producer, Arc::clone(&failed))?
                    }
                    cpal::SampleFormat::I16 => {
                        build_output::<i16>(&device, &config, media, producer, Arc::clone(&failed))?
                    }
                    cpal::SampleFormat::U16 => {
                        build_output::<u16>(&device, &config, media, producer, Arc::clone(&failed))?
                    }
                    fmt => return Err(AudioError::UnsupportedFormat(format!("{fmt:?}"))),
                };
                stream
                    .play()
                    .map_err(|e| AudioError::Device(e.to_string()))?;
                tracing::info!(sample_rate, channels = config.channels, "audio output started");
                Ok(Self {
                    sample_rate,
                    backend: OutputBackend::Device {
                        _stream: stream,
                        failed,
                    },
                })
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Advance a silent context by `dt` seconds; device contexts run on their own.
    fn pump(&mut self, dt: f32) -> Result<(), AudioError> {
        match &mut self.backend {
            OutputBackend::Device { failed, .. } => {
                if failed.load(Ordering::Relaxed) {
                    return Err(AudioError::StreamFailed);
                }
                Ok(())
            }
            OutputBackend::Silent {
                media,
                producer,
                carry,
                frac,
                scratch,
            } => {
                let want = dt.max(0.0) as f64 * media.sample_rate as f64 + *carry;
                let n = (want.floor() as usize).min(FFT_SIZE * 8);
                *carry = (want - n as f64).min(1.0);
                scratch.resize(n, 0.0);
                media.pull(scratch, 1.0, frac);
                producer.push_slice(scratch);
                Ok(())
            }
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    media: Arc<MediaShared>,
    mut producer: HeapProd<f32>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let step = media.sample_rate as f64 / config.sample_rate.0.max(1) as f64;
    let mut frac = 0.0f64;
    let mut mono = Vec::<f32>::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                media.pull(&mut mono, step, &mut frac);
                for (frame, s) in data.chunks_mut(channels).zip(mono.iter()) {
                    let v = T::from_sample(*s);
                    for slot in frame.iter_mut() {
                        *slot = v;
                    }
                    let _ = producer.try_push(*s);
                }
            },
            move |err| {
                tracing::warn!("audio output stream error: {err}");
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| AudioError::Device(e.to_string()))
}

/// Frequency-domain analyser producing a Web-Audio style byte spectrum.
pub struct AnalyserNode {
    consumer: HeapCons<f32>,
    window: Vec<f32>,
    write_pos: usize,
    blackman: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl AnalyserNode {
    fn new(consumer: HeapCons<f32>) -> Self {
        let n = FFT_SIZE;
        let blackman = (0..n)
            .map(|i| {
                let x = i as f32 / n as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        let mut planner = FftPlanner::<f32>::new();
        Self {
            consumer,
            window: vec![0.0; n],
            write_pos: 0,
            blackman,
            fft: planner.plan_fft_forward(n),
            fft_buf: vec![Complex { re: 0.0, im: 0.0 }; n],
            smoothed: vec![0.0; BIN_COUNT],
            smoothing: SMOOTHING_TIME_CONSTANT,
        }
    }

    pub fn fft_size(&self) -> usize {
        FFT_SIZE
    }

    pub fn frequency_bin_count(&self) -> usize {
        BIN_COUNT
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.smoothing
    }

    pub fn get_byte_frequency_data(&mut self, out: &mut [u8]) {
        let n = FFT_SIZE;
        while let Some(s) = self.consumer.try_pop() {
            self.window[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % n;
        }

        for i in 0..n {
            let s = self.window[(self.write_pos + i) % n];
            self.fft_buf[i] = Complex {
                re: s * self.blackman[i],
                im: 0.0,
            };
        }
        self.fft.process(&mut self.fft_buf);

        let tau = self.smoothing;
        let span = MAX_DECIBELS - MIN_DECIBELS;
        for (k, slot) in out.iter_mut().take(BIN_COUNT).enumerate() {
            let mag = self.fft_buf[k].norm() / n as f32;
            let s = tau * self.smoothed[k] + (1.0 - tau) * mag;
            self.smoothed[k] = if s.is_finite() { s } else { 0.0 };
            let db = if self.smoothed[k] > 0.0 {
                20.0 * self.smoothed[k].log10()
            } else {
                MIN_DECIBELS
            };
            *slot = (((db - MIN_DECIBELS) / span) * 255.0).clamp(0.0, 255.0) as u8;
        }
    }
}

pub struct AudioGraph {
    context: AudioContext,
    source: MediaSourceNode,
    analyser: AnalyserNode,
}

impl AudioGraph {
    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn analyser(&self) -> &AnalyserNode {
        &self.analyser
    }

    pub fn media_time(&self) -> f32 {
        self.source.media.cursor.load(Ordering::Acquire) as f32 / self.source.media.sample_rate as f32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandEnergy {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl BandEnergy {
    /// Weighted drive value used by the audio-reactive variant.
    pub fn energy(&self) -> f32 {
        (self.bass * 1.2 + self.mid * 0.9 + self.treble * 0.4) / 3.0
    }
}

/// Per-renderer audio analysis: at most one graph, one reusable spectrum buffer.
pub struct AudioAnalysisSource {
    graph: Option<AudioGraph>,
    pending_source: Option<MediaSourceNode>,
    freq: Vec<u8>,
}

impl AudioAnalysisSource {
    pub fn new() -> Self {
        Self {
            graph: None,
            pending_source: None,
            freq: vec![0u8; BIN_COUNT],
        }
    }

    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }

    pub fn graph(&self) -> Option<&AudioGraph> {
        self.graph.as_ref()
    }

    /// (source nodes, analyser nodes) owned by this instance.
    pub fn graph_node_counts(&self) -> (usize, usize) {
        match self.graph {
            Some(_) => (1, 1),
            None => (usize::from(self.pending_source.is_some()), 0),
        }
    }

    /// Build source -> analyser -> output once. Later calls are no-ops.
    ///
    /// If the output cannot be opened the source node is kept, so a retry
    /// (e.g. with [`OutputMode::Silent`]) never asks the media element for a
    /// second source.
    pub fn ensure_graph(&mut self, media: &MediaElement, mode: OutputMode) -> Result<(), AudioError> {
        if self.graph.is_some() {
            return Ok(());
        }
        let source = match self.pending_source.take() {
            Some(source) => source,
            None => media.create_source()?,
        };

        let capacity = (source.media.sample_rate as usize).max(FFT_SIZE).saturating_mul(4);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let context = match AudioContext::new(mode, &source, producer) {
            Ok(ctx) => ctx,
            Err(err) => {
                self.pending_source = Some(source);
                return Err(err);
            }
        };
        let analyser = AnalyserNode::new(consumer);
        tracing::debug!(?mode, fft_size = FFT_SIZE, "audio graph built");
        self.graph = Some(AudioGraph {
            context,
            source,
            analyser,
        });
        Ok(())
    }

    /// Refresh the spectrum from the live graph.
    pub fn read_frame(&mut self, dt: f32) -> Result<&[u8], AudioError> {
        let graph = self.graph.as_mut().ok_or(AudioError::NoGraph)?;
        graph.context.pump(dt)?;
        graph.analyser.get_byte_frequency_data(&mut self.freq);
        Ok(&self.freq)
    }

    /// Time-driven stand-in spectrum so motion continues without audio.
    pub fn fill_synthetic(&mut self, t: f32) -> &[u8] {
        let pulse = 0.6 + 0.4 * (t * 3.7).sin();
        for (k, slot) in self.freq.iter_mut().enumerate() {
            let x = k as f32 / BIN_COUNT as f32;
            let wave = 0.5 + 0.5 * (t * 2.1 + k as f32 * 0.045).sin();
            let falloff = (1.0 - x).powf(1.5);
            *slot = (wave * falloff * pulse * 255.0).clamp(0.0, 255.0) as u8;
        }
        &self.freq
    }

    pub fn frequency_data(&self) -> &[u8] {
        &self.freq
    }

    pub fn bands(&self) -> BandEnergy {
        BandEnergy {
            bass: band_average(&self.freq, BASS_BINS),
            mid: band_average(&self.freq, MID_BINS),
            treble: band_average(&self.freq, TREBLE_BINS),
        }
    }
}

impl Default for AudioAnalysisSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean of `bins` normalised to 0..=1.
pub fn band_average(freq: &[u8], bins: Range<usize>) -> f32 {
    let end = bins.end.min(freq.len());
    let start = bins.start.min(end);
    if start == end {
        return 0.0;
    }
    let sum: u32 = freq[start..end].iter().map(|v| *v as u32).sum();
    sum as f32 / ((end - start) as f32 * 255.0)
}
