use crate::audio::{MediaElement, OutputMode};
use crate::capability;
use crate::config::{Config, RendererMode};
use crate::export::{self, ExportController, ExportError, ExportEvent, ExportFormat, FfmpegRecorder};
use crate::images::{self, Fetch, HttpFetcher, ImageSources};
use crate::params::{ParamKey, ParamValue};
use crate::prefs::{AppPrefs, prefs_storage_path};
use crate::presets::{self, Preset};
use crate::render::{Frame, HalfBlockRenderer, KittyRenderer, Presenter};
use crate::terminal::TerminalGuard;
use crate::visual::{FrameReport, Renderer, RendererOptions};
use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use image::RgbaImage;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const STATUS_TTL: Duration = Duration::from_secs(4);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Action {
    Quit,
    TogglePlay,
    Screenshot,
    Randomize,
    SwapImages,
    ExportGif,
    ExportVideo,
    CancelVideo,
    Preset(usize),
    ToggleDrive,
    CycleBlend,
    ToggleNoise,
    ToggleAutoShift,
    Nudge(ParamKey, f32),
    ToggleHud,
    Help,
}

pub fn key_action(code: KeyCode, mods: KeyModifiers) -> Option<Action> {
    if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
        return Some(Action::Quit);
    }
    let action = match code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => Action::Quit,
        KeyCode::Char(' ') => Action::TogglePlay,
        KeyCode::Char('s') | KeyCode::Char('S') => Action::Screenshot,
        KeyCode::Char('r') | KeyCode::Char('R') => Action::Randomize,
        KeyCode::Char('w') | KeyCode::Char('W') => Action::SwapImages,
        KeyCode::Char('g') | KeyCode::Char('G') => Action::ExportGif,
        KeyCode::Char('v') | KeyCode::Char('V') => Action::ExportVideo,
        KeyCode::Char('c') | KeyCode::Char('C') => Action::CancelVideo,
        KeyCode::Char(d @ '1'..='9') => Action::Preset(d as usize - '1' as usize),
        KeyCode::Char('m') | KeyCode::Char('M') => Action::ToggleDrive,
        KeyCode::Char('b') | KeyCode::Char('B') => Action::CycleBlend,
        KeyCode::Char('n') | KeyCode::Char('N') => Action::ToggleNoise,
        KeyCode::Char('a') | KeyCode::Char('A') => Action::ToggleAutoShift,
        KeyCode::Up => Action::Nudge(ParamKey::GlitchIntensity, 0.05),
        KeyCode::Down => Action::Nudge(ParamKey::GlitchIntensity, -0.05),
        KeyCode::Right => Action::Nudge(ParamKey::GrainAmount, 0.01),
        KeyCode::Left => Action::Nudge(ParamKey::GrainAmount, -0.01),
        KeyCode::Char(']') => Action::Nudge(ParamKey::SliceCount, 1.0),
        KeyCode::Char('[') => Action::Nudge(ParamKey::SliceCount, -1.0),
        KeyCode::Char('i') | KeyCode::Char('I') => Action::ToggleHud,
        KeyCode::Char('?') | KeyCode::F(1) => Action::Help,
        _ => return None,
    };
    Some(action)
}

struct App {
    renderer: Renderer,
    images: ImageSources,
    fallback_layer: RgbaImage,
    use_fallback_layer: bool,
    media: Option<MediaElement>,
    output_mode: OutputMode,
    exports: ExportController,
    export_dir: PathBuf,
    presets: Vec<Preset>,
    show_hud: bool,
    /// Blocking message; any key dismisses it.
    message: Option<String>,
    status: Option<(String, Instant)>,
}

impl App {
    fn set_status(&mut self, text: impl Into<String>, now: Instant) {
        self.status = Some((text.into(), now));
    }

    fn show_message(&mut self, title: &str, body: impl std::fmt::Display) {
        self.message = Some(format!("{title}\n\n{body}\n\n(press any key)"));
    }

    fn start_playback(&mut self) {
        let Some(media) = self.media.clone() else {
            return;
        };
        if let Err(err) = self.renderer.attach_audio(&media, self.output_mode) {
            tracing::warn!("audio output unavailable: {err}");
            if self.output_mode == OutputMode::Device {
                self.output_mode = OutputMode::Silent;
                if let Err(err) = self.renderer.attach_audio(&media, OutputMode::Silent) {
                    tracing::warn!("silent audio analysis unavailable: {err}");
                }
            }
        }
        let playing = media.toggle();
        tracing::debug!(playing, "playback toggled");
    }

    fn export_failed(&mut self, format: ExportFormat, err: ExportError, now: Instant) {
        match err {
            ExportError::Busy => tracing::debug!(format = format.label(), "export request ignored while busy"),
            ExportError::Cancelled => self.set_status("video export cancelled", now),
            other => {
                tracing::warn!(format = format.label(), "export failed: {other}");
                self.show_message(&format!("{} export failed", format.label()), other);
            }
        }
    }

    fn save(&mut self, artifact: &export::Artifact, now: Instant) {
        match export::save_artifact(&self.export_dir, artifact, chrono::Local::now()) {
            Ok(path) => self.set_status(format!("saved {}", path.display()), now),
            Err(err) => self.show_message("Could not save export", err),
        }
    }

    /// Returns true to quit.
    fn handle(&mut self, action: Action, now: Instant) -> bool {
        match action {
            Action::Quit => return true,
            Action::TogglePlay => self.start_playback(),
            Action::Screenshot => match self.exports.screenshot(self.renderer.surface()) {
                Ok(artifact) => self.save(&artifact, now),
                Err(err) => self.export_failed(ExportFormat::Screenshot, err, now),
            },
            Action::Randomize => {
                self.renderer.randomize();
                self.set_status("randomized", now);
            }
            Action::SwapImages => self.images.swap(),
            Action::ExportGif => match self.exports.start_gif(self.renderer.surface(), now) {
                Ok(()) => self.set_status("recording gif", now),
                Err(err) => self.export_failed(ExportFormat::Animation, err, now),
            },
            Action::ExportVideo => match self.exports.start_video(self.renderer.surface(), now) {
                Ok(()) => self.set_status("recording video (c to cancel)", now),
                Err(err) => self.export_failed(ExportFormat::Video, err, now),
            },
            Action::CancelVideo => {
                if self.exports.cancel() {
                    self.set_status("cancelling video", now);
                }
            }
            Action::Preset(idx) => {
                if let Some(preset) = self.presets.get(idx) {
                    let name = preset.name;
                    self.renderer.apply_preset(preset);
                    self.set_status(format!("preset {name}"), now);
                }
            }
            Action::ToggleDrive => {
                let mode = self.renderer.toggle_drive_mode();
                self.set_status(format!("drive {}", mode.label()), now);
            }
            Action::CycleBlend => {
                let next = self.renderer.target().blend_mode.next();
                let _ = self.renderer.set_target(ParamKey::BlendMode, ParamValue::Blend(next));
            }
            Action::ToggleNoise => {
                let on = !self.renderer.target().noise_overlay;
                let _ = self.renderer.set_target(ParamKey::NoiseOverlay, ParamValue::Toggle(on));
            }
            Action::ToggleAutoShift => {
                let on = !self.renderer.target().auto_shift;
                let _ = self.renderer.set_target(ParamKey::AutoShift, ParamValue::Toggle(on));
            }
            Action::Nudge(key, delta) => {
                if let Err(err) = self.renderer.nudge(key, delta) {
                    tracing::debug!("nudge ignored: {err}");
                }
            }
            Action::ToggleHud => self.show_hud = !self.show_hud,
            Action::Help => self.message = Some(help_text().to_string()),
        }
        false
    }

    fn poll_exports(&mut self, now: Instant) {
        match self.exports.tick(self.renderer.surface(), now) {
            Some(ExportEvent::Finished(artifact)) => self.save(&artifact, now),
            Some(ExportEvent::Failed { format, error }) => self.export_failed(format, error, now),
            None => {}
        }
    }

    fn hud(&self, report: &FrameReport, fps: f32, presenter: &str, now: Instant) -> String {
        let p = self.renderer.current();
        let audio = match &self.media {
            None => "no audio".to_string(),
            Some(m) => format!(
                "{} {:.1}/{:.1}s{}",
                if m.is_playing() { "playing" } else { "paused" },
                m.current_time(),
                m.duration(),
                if report.audio_live { " live" } else { "" }
            ),
        };
        let export = match (self.exports.active_format(), self.exports.progress()) {
            (Some(format), Some((done, total))) => format!("{} {}/{}", format.label(), done, total),
            _ => self.exports.state().label().to_string(),
        };
        let status = self
            .status
            .as_ref()
            .filter(|(_, at)| now.duration_since(*at) < STATUS_TTL)
            .map(|(s, _)| format!(" | {s}"))
            .unwrap_or_default();
        format!(
            "glitch {:.2} grain {:.2} slices {} rgb {:.3} vig {:.2} sat {:.2} hue {:+.0} blend {} noise {} shift {}\n\
             drive {} {:.2} | {} | export {} | {:.0} fps | {}{}",
            p.glitch_intensity,
            p.grain_amount,
            p.slices(),
            p.rgb_shift_amount,
            p.vignette_strength,
            p.saturation,
            p.tint_hue,
            p.blend_mode,
            on_off(p.noise_overlay),
            on_off(p.auto_shift),
            self.renderer.drive_mode().label(),
            report.drive,
            audio,
            export,
            fps,
            presenter,
            status,
        )
    }
}

pub fn run(cfg: Config) -> anyhow::Result<()> {
    let recorder = FfmpegRecorder::with_program(cfg.ffmpeg.clone());
    let mut report = capability::probe_runtime(cfg.renderer, cfg.auto_probe);
    report.video_codec = export::video::pick_codec(&recorder).map(|c| c.mime_type());
    for note in report.notes() {
        tracing::info!("{note}");
    }
    tracing::info!(status = %report.status_label(), "capabilities");

    let prefs_path = if cfg.no_prefs { None } else { prefs_storage_path() };
    let prefs = AppPrefs::load(prefs_path.as_deref()).unwrap_or_else(|err| {
        tracing::warn!("ignoring unreadable prefs: {err}");
        AppPrefs::default()
    });

    let mut renderer = Renderer::new(RendererOptions {
        seed: cfg.seed,
        alpha: cfg.smoothing,
        drive: cfg.drive.into(),
    });
    renderer.set_targets(prefs.params);
    tracing::info!(seed = renderer.seed(), "renderer ready");

    let presets = presets::presets();
    if let Some(name) = cfg.preset.as_deref() {
        match presets::find_preset(&presets, name) {
            Some(preset) => renderer.apply_preset(preset),
            None => tracing::warn!(name, "unknown preset"),
        }
    }

    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(Duration::from_secs(cfg.fetch_timeout_secs.max(1))));
    let mut sources = ImageSources::new(fetcher, cfg.proxy_url.clone());
    sources.load(&cfg.images);

    let media = cfg
        .audio
        .as_deref()
        .map(MediaElement::open)
        .transpose()
        .context("open audio")?;

    let mut app = App {
        renderer,
        images: sources,
        fallback_layer: images::default_asset(),
        use_fallback_layer: cfg.images.is_empty(),
        media,
        output_mode: if cfg.silent { OutputMode::Silent } else { OutputMode::Device },
        exports: ExportController::new(cfg.gif_settings(), cfg.video_settings(), Box::new(recorder)),
        export_dir: cfg.export_dir.clone(),
        presets,
        show_hud: true,
        message: None,
        status: None,
    };
    if app.media.is_some() {
        app.start_playback();
    }

    let _term = TerminalGuard::new()?;
    let mut out = BufWriter::new(TerminalGuard::stdout());
    let mut presenter: Box<dyn Presenter> = match report.renderer {
        RendererMode::HalfBlock => Box::new(HalfBlockRenderer::new()),
        RendererMode::Kitty => Box::new(KittyRenderer::new()),
    };
    let (px_w, px_h) = presenter.cell_pixels();

    let start = Instant::now();
    let mut last_frame = start;
    let mut fps = FpsCounter::new();
    let mut last_report = FrameReport::default();

    let result = loop {
        let now = Instant::now();

        let mut quit = false;
        while event::poll(Duration::from_millis(0))? {
            if let Event::Key(k) = event::read()? {
                if k.kind == KeyEventKind::Release {
                    continue;
                }
                if app.message.take().is_some() {
                    continue;
                }
                if let Some(action) = key_action(k.code, k.modifiers) {
                    quit |= app.handle(action, now);
                }
            }
        }
        if quit {
            break Ok(());
        }

        // Size is re-read every frame; resize events are not always delivered.
        let (term_cols, term_rows) = TerminalGuard::size()?;
        if term_cols < 4 || term_rows < 2 {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }
        let hud = if app.show_hud {
            app.hud(&last_report, fps.fps(), presenter.name(), now)
        } else {
            String::new()
        };
        let hud_rows = (hud.lines().count() as u16).min(term_rows - 1);
        let visual_rows = term_rows - hud_rows;
        let viewport = (term_cols as usize * px_w, visual_rows as usize * px_h);

        let dt = now.duration_since(last_frame).as_secs_f32().max(1e-6);
        last_frame = now;
        let t = now.duration_since(start).as_secs_f32();

        app.images.poll();
        let layers: Vec<&RgbaImage> = if app.use_fallback_layer {
            vec![&app.fallback_layer]
        } else {
            app.images.loaded()
        };
        last_report = app.renderer.render(viewport, t, dt, &layers);
        drop(layers);

        app.poll_exports(now);

        let surface = app.renderer.surface();
        let frame = Frame {
            term_cols,
            term_rows,
            visual_rows,
            pixel_width: surface.width(),
            pixel_height: surface.height(),
            pixels_rgba: surface.pixels(),
            hud: &hud,
            hud_rows,
            overlay: app.message.as_deref(),
            sync_updates: cfg.sync_updates,
        };
        if let Err(err) = presenter.present(&frame, &mut out) {
            break Err(err);
        }
        fps.tick();

        let target = Duration::from_secs_f32(1.0 / cfg.fps.max(1) as f32);
        let elapsed = now.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
    };

    let prefs = AppPrefs {
        params: *app.renderer.target(),
    };
    if let Err(err) = prefs.save(prefs_path.as_deref()) {
        tracing::warn!("could not save prefs: {err}");
    }
    result
}

fn on_off(v: bool) -> &'static str {
    if v { "on" } else { "off" }
}

fn help_text() -> &'static str {
    "glitchviz keys\n\
     space  play / pause audio\n\
     s      screenshot (png)\n\
     g      gif export\n\
     v      video export, c cancels\n\
     r      randomize\n\
     w      swap image layers\n\
     1-6    presets\n\
     m      manual / audio drive\n\
     b n a  blend, noise, auto-shift\n\
     up/dn  glitch   lt/rt grain   [ ] slices\n\
     i      hud      q/esc quit"
}

struct FpsCounter {
    last: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f32();
        if dt >= 0.5 {
            self.fps = self.frames as f32 / dt;
            self.frames = 0;
            self.last = now;
        }
    }

    fn fps(&self) -> f32 {
        self.fps
    }
}
