use glitchviz::params::{BlendMode, EffectParams, ParamError, ParamKey, ParamStore, ParamValue};
use glitchviz::presets::{self, apply_preset, find_preset, randomize, random_range};

fn assert_in_range(params: &EffectParams) {
    for key in ParamKey::ALL {
        if let (Some((lo, hi)), ParamValue::Number(v)) = (key.range(), params.get(key)) {
            assert!(v >= lo && v <= hi, "{} = {v} outside [{lo}, {hi}]", key.name());
        }
    }
}

#[test]
fn defaults_match_documented_values() {
    let p = EffectParams::default();
    assert_eq!(p.glitch_intensity, 0.6);
    assert_eq!(p.grain_amount, 0.08);
    assert_eq!(p.slices(), 8);
    assert_eq!(p.blend_mode, BlendMode::Screen);
}

#[test]
fn writes_are_clamped_into_range() {
    let mut store = ParamStore::default();
    store
        .set_target(ParamKey::GlitchIntensity, ParamValue::Number(7.0))
        .expect("numeric write should succeed");
    store
        .set_target(ParamKey::SliceCount, ParamValue::Number(-3.0))
        .expect("numeric write should succeed");
    store
        .set_target(ParamKey::TintHue, ParamValue::Number(-999.0))
        .expect("numeric write should succeed");

    assert_eq!(store.target().glitch_intensity, 1.0);
    assert_eq!(store.target().slice_count, 2.0);
    assert_eq!(store.target().tint_hue, -180.0);
}

#[test]
fn malformed_writes_are_rejected() {
    let mut store = ParamStore::default();
    let before = *store.target();

    let err = store
        .set_target(ParamKey::GrainAmount, ParamValue::Number(f32::NAN))
        .expect_err("NaN must be rejected");
    assert!(matches!(err, ParamError::NotFinite { .. }));

    let err = store
        .set_target(ParamKey::BlendMode, ParamValue::Number(1.0))
        .expect_err("wrong kind must be rejected");
    assert!(matches!(err, ParamError::WrongKind { .. }));

    assert_eq!(*store.target(), before);
}

#[test]
fn slice_count_rounds_to_integer() {
    let mut store = ParamStore::default();
    store
        .set_target(ParamKey::SliceCount, ParamValue::Number(12.6))
        .expect("numeric write should succeed");
    assert_eq!(store.target().slice_count, 13.0);
}

#[test]
fn tick_converges_geometrically() {
    let alpha = 0.25;
    let mut store = ParamStore::new(alpha);
    let start = store.current().glitch_intensity;
    store
        .set_target(ParamKey::GlitchIntensity, ParamValue::Number(1.0))
        .expect("numeric write should succeed");

    let mut gap = 1.0 - start;
    for _ in 0..20 {
        store.tick();
        let next_gap = 1.0 - store.current().glitch_intensity;
        assert!((next_gap - gap * (1.0 - alpha)).abs() < 1e-4);
        gap = next_gap;
    }
    assert!(gap < 0.01);
}

#[test]
fn discrete_params_switch_on_next_tick() {
    let mut store = ParamStore::default();
    store
        .set_target(ParamKey::BlendMode, ParamValue::Blend(BlendMode::Difference))
        .expect("blend write should succeed");
    store
        .set_target(ParamKey::NoiseOverlay, ParamValue::Toggle(false))
        .expect("toggle write should succeed");
    assert_eq!(store.current().blend_mode, BlendMode::Screen);

    store.tick();
    assert_eq!(store.current().blend_mode, BlendMode::Difference);
    assert!(!store.current().noise_overlay);
}

#[test]
fn current_stays_in_range_while_chasing_any_target() {
    let mut store = ParamStore::new(1.0);
    let mut rng = fastrand::Rng::with_seed(11);
    for _ in 0..200 {
        let key = ParamKey::ALL[rng.usize(..ParamKey::ALL.len())];
        if key.range().is_some() {
            let _ = store.set_target(key, ParamValue::Number(rng.f32() * 2000.0 - 1000.0));
        }
        store.tick();
        assert_in_range(store.current());
    }
}

#[test]
fn nudge_steps_numeric_targets_only() {
    let mut store = ParamStore::default();
    store
        .nudge(ParamKey::GlitchIntensity, 0.05)
        .expect("nudge should succeed");
    assert!((store.target().glitch_intensity - 0.65).abs() < 1e-6);
    assert!(store.nudge(ParamKey::AutoShift, 1.0).is_err());
}

#[test]
fn randomize_from_defaults_stays_inside_sub_ranges() {
    let mut rng = fastrand::Rng::with_seed(42);
    for _ in 0..500 {
        let p = randomize(&mut rng);
        for key in ParamKey::ALL {
            let Some((lo, hi)) = random_range(key) else {
                continue;
            };
            let ParamValue::Number(v) = p.get(key) else {
                panic!("{} should be numeric", key.name());
            };
            assert!(v >= lo - 0.5 * f32::EPSILON && v <= hi, "{} = {v}", key.name());
        }
        assert!(p.glitch_intensity >= 0.3 && p.glitch_intensity <= 1.0);
        assert_in_range(&p);
    }
}

#[test]
fn presets_are_valid_and_found_by_name() {
    let all = presets::presets();
    assert_eq!(all.len(), 6);
    for preset in &all {
        assert_eq!(preset.params.clamped(), preset.params, "{}", preset.name);
    }

    let exact = find_preset(&all, "glitch heavy").expect("exact match");
    assert_eq!(exact.name, "Glitch Heavy");
    let partial = find_preset(&all, "vhs").expect("substring match");
    assert_eq!(partial.name, "Retro VHS");
    assert!(find_preset(&all, "").is_none());
    assert!(find_preset(&all, "does-not-exist").is_none());
}

#[test]
fn applying_a_preset_retargets_without_jumping() {
    let all = presets::presets();
    let preset = find_preset(&all, "noir").expect("noir preset");
    let mut store = ParamStore::default();
    let before = *store.current();

    apply_preset(&mut store, preset);
    assert_eq!(*store.target(), preset.params);
    assert_eq!(*store.current(), before);
}
