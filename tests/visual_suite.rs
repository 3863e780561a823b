use glitchviz::audio::{MediaElement, OutputMode};
use glitchviz::params::{BlendMode, EffectParams, ParamKey, ParamValue};
use glitchviz::presets::random_range;
use glitchviz::surface::{Surface, SurfaceError};
use glitchviz::visual::passes::{self, PIPELINE, PassCtx, PassError};
use glitchviz::visual::{DriveMode, Pass, Renderer, RendererOptions};
use image::RgbaImage;

fn renderer(seed: u64) -> Renderer {
    Renderer::new(RendererOptions {
        seed: Some(seed),
        ..RendererOptions::default()
    })
}

fn checker(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            image::Rgba([230, 230, 230, 255])
        } else {
            image::Rgba([20, 60, 160, 255])
        }
    })
}

fn quiet_params() -> EffectParams {
    EffectParams {
        glitch_intensity: 0.0,
        grain_amount: 0.0,
        rgb_shift_amount: 0.0,
        vignette_strength: 0.0,
        noise_overlay: false,
        saturation: 1.0,
        ..EffectParams::default()
    }
}

#[test]
fn pipeline_runs_in_fixed_order() {
    let order: Vec<Pass> = PIPELINE.iter().map(|(pass, _)| *pass).collect();
    assert_eq!(
        order,
        vec![
            Pass::Composite,
            Pass::SliceGlitch,
            Pass::ChannelShift,
            Pass::Noise,
            Pass::Scanlines,
            Pass::Vignette,
        ]
    );
}

#[test]
fn frames_follow_viewport_size() {
    let layer = checker(64, 48);
    let mut r = renderer(1);

    let report = r.render((80, 40), 0.0, 1.0 / 30.0, &[&layer]);
    assert_eq!((report.width, report.height), (80, 40));
    assert_eq!(r.surface().dims(), (80, 40));
    assert!(report.skipped.is_empty());

    r.render((32, 70), 0.033, 1.0 / 30.0, &[&layer]);
    assert_eq!(r.surface().dims(), (32, 70));
    assert_eq!(r.surface().pixels().len(), 32 * 70 * 4);
    assert_eq!(r.frames(), 2);
}

#[test]
fn zero_sized_viewport_is_skipped_quietly() {
    let mut r = renderer(2);
    let report = r.render((0, 10), 0.0, 0.016, &[]);
    assert!(r.surface().is_empty());
    assert!(report.skipped.is_empty());
}

#[test]
fn same_seed_renders_identical_frames() {
    let layer = checker(40, 40);
    let mut a = renderer(99);
    let mut b = renderer(99);
    for i in 0..5 {
        let t = i as f32 / 30.0;
        a.render((48, 32), t, 1.0 / 30.0, &[&layer]);
        b.render((48, 32), t, 1.0 / 30.0, &[&layer]);
    }
    assert_eq!(a.surface(), b.surface());
}

#[test]
fn empty_layer_skips_composite_but_frame_still_renders() {
    let empty = RgbaImage::new(0, 0);
    let mut r = renderer(3);
    let report = r.render((20, 20), 0.0, 0.016, &[&empty]);
    assert_eq!(report.skipped, vec![Pass::Composite]);
    assert_eq!(r.surface().dims(), (20, 20));
}

#[test]
fn base_layer_adds_over_black_background() {
    let layer = RgbaImage::from_pixel(10, 10, image::Rgba([255, 0, 0, 255]));
    let mut r = renderer(4);
    r.set_targets(quiet_params());
    for _ in 0..200 {
        r.render((16, 16), 0.0, 0.016, &[&layer]);
    }
    let [red, green, blue, alpha] = r.surface().pixel(8, 7).expect("in bounds");
    assert!(red > 200, "red = {red}");
    assert!(green < 30 && blue < 30);
    assert_eq!(alpha, 255);
}

fn settled_centre(params: EffectParams, layers: &[&RgbaImage]) -> [u8; 4] {
    let mut r = renderer(12);
    r.set_targets(params);
    for _ in 0..200 {
        r.render((16, 16), 0.0, 0.016, layers);
    }
    r.surface().pixel(8, 8).expect("in bounds")
}

#[test]
fn tint_hue_shows_through_an_opaque_layer() {
    let grey = RgbaImage::from_pixel(10, 10, image::Rgba([40, 40, 40, 255]));
    let mut tinted = quiet_params();
    tinted.tint_hue = 120.0;
    assert_ne!(passes::background_color(&tinted), [0, 0, 0]);

    let plain = settled_centre(quiet_params(), &[&grey]);
    let green = settled_centre(tinted, &[&grey]);
    assert_ne!(plain, green);
    assert!(green[1] > plain[1], "plain {plain:?} tinted {green:?}");
}

#[test]
fn blend_mode_applies_to_the_second_layer() {
    let base = RgbaImage::from_pixel(10, 10, image::Rgba([40, 40, 40, 255]));
    let top = RgbaImage::from_pixel(10, 10, image::Rgba([200, 200, 200, 255]));
    let mut screen = quiet_params();
    screen.blend_mode = BlendMode::Screen;
    let mut darken = quiet_params();
    darken.blend_mode = BlendMode::Darken;

    let screened = settled_centre(screen, &[&base, &top]);
    let darkened = settled_centre(darken, &[&base, &top]);
    assert!(screened[0] > darkened[0], "screen {screened:?} darken {darkened:?}");
}

#[test]
fn saturate_zero_is_grey_and_one_is_identity() {
    let rgb = [0.9, 0.2, 0.4];
    let grey = passes::saturate(rgb, 0.0);
    assert!((grey[0] - grey[1]).abs() < 1e-5 && (grey[1] - grey[2]).abs() < 1e-5);
    let same = passes::saturate(rgb, 1.0);
    for c in 0..3 {
        assert!((same[c] - rgb[c]).abs() < 1e-5);
    }
}

#[test]
fn slice_glitch_rejects_an_empty_surface() {
    let src = Surface::default();
    let mut out = Surface::default();
    let ctx = PassCtx {
        t: 0.0,
        params: EffectParams::default(),
        drive: 1.0,
        layers: &[],
    };
    let mut rng = fastrand::Rng::with_seed(5);
    let err = passes::slice_glitch(&src, &ctx, &mut rng, &mut out).expect_err("empty surface");
    assert!(matches!(err, PassError::Surface(SurfaceError::Empty { .. })));
}

#[test]
fn slice_glitch_only_moves_pixels_within_rows() {
    let mut src = Surface::new(24, 12);
    for y in 0..12 {
        for x in 0..24 {
            src.put(x, y, [y as u8 * 10, 0, 0, 255]);
        }
    }
    let mut out = Surface::new(24, 12);
    let ctx = PassCtx {
        t: 0.0,
        params: EffectParams::default(),
        drive: 1.0,
        layers: &[],
    };
    let mut rng = fastrand::Rng::with_seed(8);
    passes::slice_glitch(&src, &ctx, &mut rng, &mut out).expect("slice pass");
    for y in 0..12 {
        for x in 0..24 {
            assert_eq!(out.pixel(x, y).expect("in bounds")[0], y as u8 * 10);
        }
    }
}

#[test]
fn vignette_darkens_corners_more_than_centre() {
    let mut src = Surface::new(40, 40);
    src.fill([200, 200, 200]);
    let mut out = Surface::new(40, 40);
    let ctx = PassCtx {
        t: 0.0,
        params: EffectParams {
            vignette_strength: 0.5,
            ..EffectParams::default()
        },
        drive: 0.0,
        layers: &[],
    };
    let mut rng = fastrand::Rng::with_seed(0);
    passes::vignette(&src, &ctx, &mut rng, &mut out).expect("vignette");
    let corner = out.pixel(0, 0).expect("corner")[0];
    let centre = out.pixel(20, 20).expect("centre")[0];
    assert!(corner < centre, "corner {corner} centre {centre}");
    assert_eq!(centre, 200);
}

#[test]
fn scanlines_darken_every_third_row() {
    let mut src = Surface::new(6, 6);
    src.fill([255, 255, 255]);
    let mut out = Surface::new(6, 6);
    let ctx = PassCtx {
        t: 0.0,
        params: EffectParams {
            grain_amount: 0.2,
            ..EffectParams::default()
        },
        drive: 0.0,
        layers: &[],
    };
    let mut rng = fastrand::Rng::with_seed(0);
    passes::scanlines(&src, &ctx, &mut rng, &mut out).expect("scanlines");
    assert!(out.pixel(0, 0).expect("row 0")[0] < 255);
    assert_eq!(out.pixel(0, 1).expect("row 1")[0], 255);
    assert!(out.pixel(0, 3).expect("row 3")[0] < 255);
}

#[test]
fn randomize_sets_bounded_targets_and_reseeds() {
    let mut r = renderer(7);
    let seed = r.seed();
    let params = r.randomize();
    assert_ne!(r.seed(), seed);
    assert_eq!(*r.target(), params);
    for key in ParamKey::ALL {
        if let (Some((lo, hi)), ParamValue::Number(v)) = (random_range(key), params.get(key)) {
            assert!(v >= lo && v <= hi, "{} = {v}", key.name());
        }
    }
}

#[test]
fn blend_target_change_reaches_current_after_a_frame() {
    let mut r = renderer(8);
    r.set_target(ParamKey::BlendMode, ParamValue::Blend(BlendMode::Darken))
        .expect("blend write");
    r.render((8, 8), 0.0, 0.016, &[]);
    assert_eq!(r.current().blend_mode, BlendMode::Darken);
}

#[test]
fn audio_drive_without_graph_uses_synthetic_spectrum() {
    let mut r = Renderer::new(RendererOptions {
        seed: Some(9),
        drive: DriveMode::Audio,
        ..RendererOptions::default()
    });
    let report = r.render((16, 16), 0.5, 0.016, &[]);
    assert!(!report.audio_live);
    assert!(report.bands.bass > 0.0);
    assert!((report.drive - report.bands.energy()).abs() < 1e-6);
}

#[test]
fn audio_drive_reads_attached_graph() {
    let samples = (0..44_100)
        .map(|i| (i as f32 * 0.03).sin() * 0.7)
        .collect();
    let media = MediaElement::from_samples(samples, 44_100);
    let mut r = Renderer::new(RendererOptions {
        seed: Some(10),
        drive: DriveMode::Audio,
        ..RendererOptions::default()
    });
    r.attach_audio(&media, OutputMode::Silent).expect("attach");
    r.attach_audio(&media, OutputMode::Silent).expect("attach again");
    assert_eq!(r.audio().graph_node_counts(), (1, 1));

    media.play();
    let reports: Vec<_> = (0..6)
        .map(|i| r.render((16, 16), i as f32 * 0.05, 0.05, &[]))
        .collect();
    let report = reports.last().expect("rendered");
    assert!(report.audio_live);
    assert!(report.drive > 0.0);
}

#[test]
fn silent_media_clock_advances_under_manual_drive() {
    let media = MediaElement::from_samples(vec![0.0; 5 * 44_100], 44_100);
    let mut r = renderer(13);
    r.attach_audio(&media, OutputMode::Silent).expect("attach");
    media.play();
    for i in 0..60 {
        let report = r.render((8, 8), i as f32 / 30.0, 1.0 / 30.0, &[]);
        assert!(!report.audio_live);
    }
    assert_eq!(r.drive_mode(), DriveMode::Manual);
    let now = media.current_time();
    assert!((now - 2.0).abs() < 0.1, "current_time = {now}");
}

#[test]
fn manual_drive_follows_glitch_intensity() {
    let mut r = renderer(11);
    let report = r.render((8, 8), 0.0, 0.016, &[]);
    assert_eq!(r.drive_mode(), DriveMode::Manual);
    assert!((report.drive - r.current().glitch_intensity).abs() < 1e-6);
    assert_eq!(r.toggle_drive_mode(), DriveMode::Audio);
}
