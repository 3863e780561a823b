use glitchviz::app::{Action, key_action};
use glitchviz::capability::probe_runtime;
use glitchviz::config::{Config, DriveArg, RendererMode};
use glitchviz::params::ParamKey;
use glitchviz::render::{Frame, HalfBlockRenderer, KittyRenderer, Presenter};
use glitchviz::visual::DriveMode;
use clap::Parser;
use crossterm::event::{KeyCode, KeyModifiers};

fn solid_pixels(w: usize, h: usize, rgb: [u8; 3]) -> Vec<u8> {
    let mut buf = vec![0u8; w * h * 4];
    for px in buf.chunks_exact_mut(4) {
        px[..3].copy_from_slice(&rgb);
        px[3] = 255;
    }
    buf
}

fn make_frame<'a>(cols: u16, visual_rows: u16, pw: usize, ph: usize, pixels: &'a [u8], hud: &'a str) -> Frame<'a> {
    Frame {
        term_cols: cols,
        term_rows: visual_rows + 1,
        visual_rows,
        pixel_width: pw,
        pixel_height: ph,
        pixels_rgba: pixels,
        hud,
        hud_rows: 1,
        overlay: None,
        sync_updates: false,
    }
}

#[test]
fn halfblock_paints_every_cell() {
    let (cols, rows) = (10u16, 4u16);
    let pixels = solid_pixels(10, 8, [200, 10, 30]);
    let frame = make_frame(cols, rows, 10, 8, &pixels, "glitch 0.60");
    let mut renderer = HalfBlockRenderer::new();
    let mut out = Vec::new();
    renderer.present(&frame, &mut out).expect("present");

    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(text.matches('\u{2580}').count(), 40);
    assert!(text.contains("\x1b[38;2;200;10;30m"));
    assert!(text.contains("glitch 0.60"));
}

#[test]
fn halfblock_ignores_mismatched_frames() {
    let pixels = solid_pixels(4, 4, [1, 2, 3]);
    let frame = make_frame(10, 4, 4, 4, &pixels, "");
    let mut out = Vec::new();
    HalfBlockRenderer::new()
        .present(&frame, &mut out)
        .expect("present");
    assert!(out.is_empty());
}

#[test]
fn overlay_text_is_drawn_over_the_frame() {
    let pixels = solid_pixels(40, 20, [0, 0, 0]);
    let mut frame = make_frame(40, 10, 40, 20, &pixels, "");
    frame.term_rows = 12;
    frame.overlay = Some("gif export failed\n\nno space left");
    let mut out = Vec::new();
    HalfBlockRenderer::new()
        .present(&frame, &mut out)
        .expect("present");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("gif export failed"));
    assert!(text.contains("no space left"));
}

#[test]
fn kitty_sends_chunked_base64_image() {
    let pixels = solid_pixels(20, 16, [9, 9, 9]);
    let frame = make_frame(10, 4, 20, 16, &pixels, "hud");
    let mut renderer = KittyRenderer::new();
    assert_eq!(renderer.cell_pixels(), (2, 4));
    let mut out = Vec::new();
    renderer.present(&frame, &mut out).expect("present");

    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("\x1b_Ga=T,f=32,s=20,v=16"));
    assert!(text.contains("m=0;"));
}

#[test]
fn probe_without_auto_keeps_requested_renderer() {
    let report = probe_runtime(RendererMode::Kitty, false);
    assert_eq!(report.renderer, RendererMode::Kitty);
    assert!(!report.changed());
    assert!(report.status_label().starts_with("off"));
}

#[test]
fn half_block_request_never_changes() {
    let report = probe_runtime(RendererMode::HalfBlock, true);
    assert_eq!(report.renderer, RendererMode::HalfBlock);
    assert!(!report.notes().is_empty());
}

#[test]
fn config_defaults_and_overrides() {
    let cfg = Config::try_parse_from(["glitchviz"]).expect("defaults parse");
    assert!(cfg.images.is_empty());
    assert_eq!(cfg.fps, 30);
    assert_eq!(cfg.renderer, RendererMode::HalfBlock);
    assert_eq!(cfg.gif_settings().frames, 8);
    assert_eq!(cfg.gif_settings().max_dimension, 512);
    assert_eq!(cfg.video_settings().frames, 150);

    let cfg = Config::try_parse_from([
        "glitchviz",
        "--image",
        "a.png",
        "--image",
        "https://example.test/b.jpg",
        "--drive",
        "audio",
        "--renderer",
        "kitty",
        "--gif-colors",
        "1000",
        "--seed",
        "7",
    ])
    .expect("overrides parse");
    assert_eq!(cfg.images.len(), 2);
    assert_eq!(cfg.drive, DriveArg::Audio);
    assert_eq!(DriveMode::from(cfg.drive), DriveMode::Audio);
    assert_eq!(cfg.renderer, RendererMode::Kitty);
    assert_eq!(cfg.gif_settings().max_colors, 256);
    assert_eq!(cfg.seed, Some(7));
}

#[test]
fn keys_map_to_actions() {
    let none = KeyModifiers::NONE;
    assert_eq!(key_action(KeyCode::Char(' '), none), Some(Action::TogglePlay));
    assert_eq!(key_action(KeyCode::Char('s'), none), Some(Action::Screenshot));
    assert_eq!(key_action(KeyCode::Char('g'), none), Some(Action::ExportGif));
    assert_eq!(key_action(KeyCode::Char('v'), none), Some(Action::ExportVideo));
    assert_eq!(key_action(KeyCode::Char('3'), none), Some(Action::Preset(2)));
    assert_eq!(
        key_action(KeyCode::Up, none),
        Some(Action::Nudge(ParamKey::GlitchIntensity, 0.05))
    );
    assert_eq!(
        key_action(KeyCode::Char('['), none),
        Some(Action::Nudge(ParamKey::SliceCount, -1.0))
    );
    assert_eq!(key_action(KeyCode::Char('c'), KeyModifiers::CONTROL), Some(Action::Quit));
    assert_eq!(key_action(KeyCode::Char('c'), none), Some(Action::CancelVideo));
    assert_eq!(key_action(KeyCode::Esc, none), Some(Action::Quit));
    assert_eq!(key_action(KeyCode::Char('z'), none), None);
}

#[test]
fn logs_go_to_the_requested_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("logs").join("run.log");
    glitchviz::logging::init(Some(&path)).expect("init logging");
    tracing::warn!("image fell back to default asset");
    let text = std::fs::read_to_string(&path).expect("log file");
    assert!(text.contains("image fell back to default asset"), "{text}");
}

#[test]
fn default_log_file_sits_beside_prefs() {
    let log = glitchviz::logging::default_log_path();
    let prefs = glitchviz::prefs::prefs_storage_path();
    assert_eq!(log.as_ref().map(|p| p.parent()), prefs.as_ref().map(|p| p.parent()));
    if let Some(log) = log {
        assert_eq!(log.file_name().and_then(|n| n.to_str()), Some("glitchviz.log"));
    }
}
