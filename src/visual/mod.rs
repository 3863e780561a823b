pub mod passes;

use crate::audio::{AudioAnalysisSource, AudioError, BandEnergy, MediaElement, OutputMode};
use crate::params::{DEFAULT_SMOOTHING, EffectParams, ParamError, ParamKey, ParamStore, ParamValue};
use crate::presets::{self, Preset};
use crate::surface::Surface;
use image::RgbaImage;

pub use passes::{Pass, PassCtx, PassError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveMode {
    /// Displacement follows the glitch intensity control.
    Manual,
    /// Displacement follows weighted band energy.
    Audio,
}

impl DriveMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Audio => "audio",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Manual => Self::Audio,
            Self::Audio => Self::Manual,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RendererOptions {
    pub seed: Option<u64>,
    pub alpha: f32,
    pub drive: DriveMode,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            seed: None,
            alpha: DEFAULT_SMOOTHING,
            drive: DriveMode::Manual,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub width: usize,
    pub height: usize,
    pub drive: f32,
    pub bands: BandEnergy,
    /// True when the spectrum came from the live analyser this frame.
    pub audio_live: bool,
    pub skipped: Vec<Pass>,
}

/// One renderer instance: owns its surface, parameter store, PRNG and
/// optional audio graph. Nothing here is shared across instances.
pub struct Renderer {
    store: ParamStore,
    rng: fastrand::Rng,
    seed: u64,
    drive_mode: DriveMode,
    audio: AudioAnalysisSource,
    audio_fallback_logged: bool,

    // Buffers
    front: Surface,
    back: Surface,
    frames: u64,
}

impl Renderer {
    pub fn new(opts: RendererOptions) -> Self {
        let seed = opts.seed.unwrap_or_else(|| fastrand::u64(..));
        Self {
            store: ParamStore::new(opts.alpha),
            rng: fastrand::Rng::with_seed(seed),
            seed,
            drive_mode: opts.drive,
            audio: AudioAnalysisSource::new(),
            audio_fallback_logged: false,
            front: Surface::default(),
            back: Surface::default(),
            frames: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng.seed(seed);
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    pub fn target(&self) -> &EffectParams {
        self.store.target()
    }

    pub fn current(&self) -> &EffectParams {
        self.store.current()
    }

    pub fn set_target(&mut self, key: ParamKey, value: ParamValue) -> Result<(), ParamError> {
        self.store.set_target(key, value)
    }

    pub fn set_targets(&mut self, params: EffectParams) {
        self.store.set_targets(params);
    }

    pub fn nudge(&mut self, key: ParamKey, delta: f32) -> Result<(), ParamError> {
        self.store.nudge(key, delta)
    }

    pub fn apply_preset(&mut self, preset: &Preset) {
        tracing::debug!(preset = preset.name, "preset applied");
        presets::apply_preset(&mut self.store, preset);
    }

    /// Draw fresh bounded targets, write them in one step and reseed.
    pub fn randomize(&mut self) -> EffectParams {
        let params = presets::randomize(&mut self.rng);
        self.store.set_targets(params);
        let next = self.rng.u64(..);
        self.reseed(next);
        *self.store.target()
    }

    pub fn drive_mode(&self) -> DriveMode {
        self.drive_mode
    }

    pub fn set_drive_mode(&mut self, mode: DriveMode) {
        self.drive_mode = mode;
    }

    pub fn toggle_drive_mode(&mut self) -> DriveMode {
        self.drive_mode = self.drive_mode.toggled();
        self.drive_mode
    }

    /// Wire the media element into this renderer's analysis graph (once).
    pub fn attach_audio(&mut self, media: &MediaElement, mode: OutputMode) -> Result<(), AudioError> {
        self.audio.ensure_graph(media, mode)
    }

    pub fn audio(&self) -> &AudioAnalysisSource {
        &self.audio
    }

    pub fn surface(&self) -> &Surface {
        &self.front
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Render one frame at `viewport` size. The size is taken fresh every
    /// call, so a resize shows up on the next frame.
    pub fn render(
        &mut self,
        viewport: (usize, usize),
        t: f32,
        dt: f32,
        layers: &[&RgbaImage],
    ) -> FrameReport {
        self.store.tick();
        let params = *self.store.current();
        let (w, h) = viewport;
        self.front.resize(w, h);
        self.back.resize(w, h);
        self.frames += 1;

        let (drive, bands, audio_live) = self.drive_value(&params, t, dt);
        let mut report = FrameReport {
            width: w,
            height: h,
            drive,
            bands,
            audio_live,
            skipped: Vec::new(),
        };
        if self.front.is_empty() {
            return report;
        }

        self.front.fill(passes::background_color(&params));
        let ctx = PassCtx {
            t,
            params,
            drive,
            layers,
        };
        for (pass, run) in passes::PIPELINE {
            match run(&self.front, &ctx, &mut self.rng, &mut self.back) {
                Ok(()) => std::mem::swap(&mut self.front, &mut self.back),
                Err(err) => {
                    tracing::debug!(pass = pass.label(), "pass skipped this frame: {err}");
                    report.skipped.push(pass);
                }
            }
        }
        report
    }

    /// The graph is pumped every frame so the media clock advances and the
    /// analyser stays drained; the spectrum only drives displacement in
    /// [`DriveMode::Audio`].
    fn drive_value(&mut self, params: &EffectParams, t: f32, dt: f32) -> (f32, BandEnergy, bool) {
        let read = self.audio.read_frame(dt).map(|_| ());
        match self.drive_mode {
            DriveMode::Manual => (params.glitch_intensity, BandEnergy::default(), false),
            DriveMode::Audio => {
                let live = match read {
                    Ok(()) => {
                        self.audio_fallback_logged = false;
                        true
                    }
                    Err(err) => {
                        if !self.audio_fallback_logged {
                            tracing::warn!("audio analysis unavailable, using synthetic spectrum: {err}");
                            self.audio_fallback_logged = true;
                        }
                        self.audio.fill_synthetic(t);
                        false
                    }
                };
                let bands = self.audio.bands();
                (bands.energy(), bands, live)
            }
        }
    }
}
