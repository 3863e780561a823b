use crate::params::{BlendMode, EffectParams, ParamKey, ParamStore};

pub struct Preset {
    pub name: &'static str,
    pub params: EffectParams,
}

pub fn presets() -> Vec<Preset> {
    let base = EffectParams::default();
    vec![
        Preset {
            name: "Glitch Heavy",
            params: EffectParams {
                glitch_intensity: 1.0,
                grain_amount: 0.18,
                slice_count: 28.0,
                rgb_shift_amount: 0.12,
                vignette_strength: 0.35,
                scale_offset: 0.08,
                rotation_degrees: 4.0,
                speed_multiplier: 1.6,
                saturation: 1.6,
                blend_mode: BlendMode::Difference,
                tint_hue: 0.0,
                noise_overlay: true,
                auto_shift: true,
            },
        },
        Preset {
            name: "Subtle",
            params: EffectParams {
                glitch_intensity: 0.15,
                grain_amount: 0.04,
                slice_count: 4.0,
                rgb_shift_amount: 0.01,
                vignette_strength: 0.2,
                saturation: 1.0,
                speed_multiplier: 0.6,
                blend_mode: BlendMode::Normal,
                noise_overlay: false,
                ..base
            },
        },
        Preset {
            name: "Cyberpunk",
            params: EffectParams {
                glitch_intensity: 0.75,
                grain_amount: 0.1,
                slice_count: 16.0,
                rgb_shift_amount: 0.09,
                vignette_strength: 0.4,
                scale_offset: -0.05,
                rotation_degrees: -3.0,
                speed_multiplier: 1.3,
                saturation: 2.1,
                blend_mode: BlendMode::Screen,
                tint_hue: -60.0,
                noise_overlay: true,
                auto_shift: true,
            },
        },
        Preset {
            name: "Retro VHS",
            params: EffectParams {
                glitch_intensity: 0.45,
                grain_amount: 0.22,
                slice_count: 10.0,
                rgb_shift_amount: 0.06,
                vignette_strength: 0.45,
                scale_offset: 0.02,
                rotation_degrees: 0.0,
                speed_multiplier: 0.8,
                saturation: 0.7,
                blend_mode: BlendMode::Overlay,
                tint_hue: 30.0,
                noise_overlay: true,
                auto_shift: false,
            },
        },
        Preset {
            name: "Dreamy",
            params: EffectParams {
                glitch_intensity: 0.3,
                grain_amount: 0.06,
                slice_count: 6.0,
                rgb_shift_amount: 0.04,
                vignette_strength: 0.25,
                scale_offset: 0.12,
                rotation_degrees: 8.0,
                speed_multiplier: 0.5,
                saturation: 1.4,
                blend_mode: BlendMode::Lighten,
                tint_hue: 120.0,
                noise_overlay: false,
                auto_shift: true,
            },
        },
        Preset {
            name: "Noir",
            params: EffectParams {
                glitch_intensity: 0.5,
                grain_amount: 0.16,
                slice_count: 12.0,
                rgb_shift_amount: 0.0,
                vignette_strength: 0.5,
                saturation: 0.0,
                blend_mode: BlendMode::Multiply,
                ..base
            },
        },
    ]
}

/// Case-insensitive lookup: exact name first, then substring.
pub fn find_preset<'a>(presets: &'a [Preset], name: &str) -> Option<&'a Preset> {
    let needle = name.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return None;
    }
    presets
        .iter()
        .find(|p| p.name.to_ascii_lowercase() == needle)
        .or_else(|| {
            presets
                .iter()
                .find(|p| p.name.to_ascii_lowercase().contains(&needle))
        })
}

/// Retarget the store; smoothing animates the change.
pub fn apply_preset(store: &mut ParamStore, preset: &Preset) {
    store.set_targets(preset.params);
}

/// Sub-ranges `randomize` draws from, narrower than the valid ranges.
pub const RANDOM_RANGES: [(ParamKey, f32, f32); 10] = [
    (ParamKey::GlitchIntensity, 0.3, 1.0),
    (ParamKey::GrainAmount, 0.02, 0.2),
    (ParamKey::SliceCount, 4.0, 28.0),
    (ParamKey::RgbShiftAmount, 0.01, 0.1),
    (ParamKey::VignetteStrength, 0.1, 0.45),
    (ParamKey::ScaleOffset, -0.1, 0.1),
    (ParamKey::RotationDegrees, -6.0, 6.0),
    (ParamKey::SpeedMultiplier, 0.5, 1.6),
    (ParamKey::Saturation, 0.6, 1.8),
    (ParamKey::TintHue, -60.0, 60.0),
];

pub fn random_range(key: ParamKey) -> Option<(f32, f32)> {
    RANDOM_RANGES
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, lo, hi)| (*lo, *hi))
}

pub fn randomize(rng: &mut fastrand::Rng) -> EffectParams {
    let mut pick = |key: ParamKey| {
        let (lo, hi) = random_range(key).unwrap_or((0.0, 0.0));
        lo + rng.f32() * (hi - lo)
    };
    let glitch_intensity = pick(ParamKey::GlitchIntensity);
    let grain_amount = pick(ParamKey::GrainAmount);
    let slice_count = pick(ParamKey::SliceCount).round();
    let rgb_shift_amount = pick(ParamKey::RgbShiftAmount);
    let vignette_strength = pick(ParamKey::VignetteStrength);
    let scale_offset = pick(ParamKey::ScaleOffset);
    let rotation_degrees = pick(ParamKey::RotationDegrees);
    let speed_multiplier = pick(ParamKey::SpeedMultiplier);
    let saturation = pick(ParamKey::Saturation);
    let tint_hue = pick(ParamKey::TintHue);

    EffectParams {
        glitch_intensity,
        grain_amount,
        slice_count,
        rgb_shift_amount,
        vignette_strength,
        scale_offset,
        rotation_degrees,
        speed_multiplier,
        saturation,
        blend_mode: BlendMode::ALL[rng.usize(..BlendMode::ALL.len())],
        tint_hue,
        noise_overlay: rng.f32() < 0.7,
        auto_shift: rng.f32() < 0.4,
    }
}
