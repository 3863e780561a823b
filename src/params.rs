use std::fmt;

use thiserror::Error;

pub const DEFAULT_SMOOTHING: f32 = 0.08;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Lighter,
    Screen,
    Multiply,
    Overlay,
    Darken,
    Lighten,
    Difference,
}

impl BlendMode {
    pub const ALL: [Self; 8] = [
        Self::Normal,
        Self::Lighter,
        Self::Screen,
        Self::Multiply,
        Self::Overlay,
        Self::Darken,
        Self::Lighten,
        Self::Difference,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Lighter => "lighter",
            Self::Screen => "screen",
            Self::Multiply => "multiply",
            Self::Overlay => "overlay",
            Self::Darken => "darken",
            Self::Lighten => "lighten",
            Self::Difference => "difference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.label() == needle)
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamKey {
    GlitchIntensity,
    GrainAmount,
    SliceCount,
    RgbShiftAmount,
    VignetteStrength,
    ScaleOffset,
    RotationDegrees,
    SpeedMultiplier,
    Saturation,
    BlendMode,
    TintHue,
    NoiseOverlay,
    AutoShift,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamKind {
    Number { lo: f32, hi: f32, integer: bool },
    Blend,
    Toggle,
}

impl ParamKey {
    pub const ALL: [Self; 13] = [
        Self::GlitchIntensity,
        Self::GrainAmount,
        Self::SliceCount,
        Self::RgbShiftAmount,
        Self::VignetteStrength,
        Self::ScaleOffset,
        Self::RotationDegrees,
        Self::SpeedMultiplier,
        Self::Saturation,
        Self::BlendMode,
        Self::TintHue,
        Self::NoiseOverlay,
        Self::AutoShift,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::GlitchIntensity => "glitch_intensity",
            Self::GrainAmount => "grain_amount",
            Self::SliceCount => "slice_count",
            Self::RgbShiftAmount => "rgb_shift_amount",
            Self::VignetteStrength => "vignette_strength",
            Self::ScaleOffset => "scale_offset",
            Self::RotationDegrees => "rotation_degrees",
            Self::SpeedMultiplier => "speed_multiplier",
            Self::Saturation => "saturation",
            Self::BlendMode => "blend_mode",
            Self::TintHue => "tint_hue",
            Self::NoiseOverlay => "noise_overlay",
            Self::AutoShift => "auto_shift",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim();
        Self::ALL.into_iter().find(|k| k.name() == needle)
    }

    pub fn kind(self) -> ParamKind {
        let num = |lo, hi| ParamKind::Number {
            lo,
            hi,
            integer: false,
        };
        match self {
            Self::GlitchIntensity => num(0.0, 1.0),
            Self::GrainAmount => num(0.0, 0.3),
            Self::SliceCount => ParamKind::Number {
                lo: 2.0,
                hi: 40.0,
                integer: true,
            },
            Self::RgbShiftAmount => num(0.0, 0.14),
            Self::VignetteStrength => num(0.0, 0.5),
            Self::ScaleOffset => num(-0.2, 0.2),
            Self::RotationDegrees => num(-12.0, 12.0),
            Self::SpeedMultiplier => num(0.2, 2.0),
            Self::Saturation => num(0.0, 2.5),
            Self::BlendMode => ParamKind::Blend,
            Self::TintHue => num(-180.0, 180.0),
            Self::NoiseOverlay | Self::AutoShift => ParamKind::Toggle,
        }
    }

    /// Numeric range, `None` for discrete parameters.
    pub fn range(self) -> Option<(f32, f32)> {
        match self.kind() {
            ParamKind::Number { lo, hi, .. } => Some((lo, hi)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    Number(f32),
    Blend(BlendMode),
    Toggle(bool),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("parameter {key} expects a {expected} value")]
    WrongKind {
        key: &'static str,
        expected: &'static str,
    },
    #[error("parameter {key} rejects non-finite value {value}")]
    NotFinite { key: &'static str, value: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectParams {
    pub glitch_intensity: f32,
    pub grain_amount: f32,
    pub slice_count: f32,
    pub rgb_shift_amount: f32,
    pub vignette_strength: f32,
    pub scale_offset: f32,
    pub rotation_degrees: f32,
    pub speed_multiplier: f32,
    pub saturation: f32,
    pub blend_mode: BlendMode,
    pub tint_hue: f32,
    pub noise_overlay: bool,
    pub auto_shift: bool,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            glitch_intensity: 0.6,
            grain_amount: 0.08,
            slice_count: 8.0,
            rgb_shift_amount: 0.03,
            vignette_strength: 0.3,
            scale_offset: 0.0,
            rotation_degrees: 0.0,
            speed_multiplier: 1.0,
            saturation: 1.2,
            blend_mode: BlendMode::Screen,
            tint_hue: 0.0,
            noise_overlay: true,
            auto_shift: false,
        }
    }
}

impl EffectParams {
    pub fn get(&self, key: ParamKey) -> ParamValue {
        match key {
            ParamKey::BlendMode => ParamValue::Blend(self.blend_mode),
            ParamKey::NoiseOverlay => ParamValue::Toggle(self.noise_overlay),
            ParamKey::AutoShift => ParamValue::Toggle(self.auto_shift),
            numeric => ParamValue::Number(*self.number_ref(numeric)),
        }
    }

    /// Integer view of `slice_count`; smoothing keeps the stored value fractional.
    pub fn slices(&self) -> usize {
        self.slice_count.round().clamp(2.0, 40.0) as usize
    }

    pub fn clamped(mut self) -> Self {
        for key in ParamKey::ALL {
            if let ParamKind::Number { lo, hi, integer } = key.kind() {
                let v = self.number_mut(key);
                *v = clamp_number(*v, lo, hi, integer);
            }
        }
        self
    }

    fn number_ref(&self, key: ParamKey) -> &f32 {
        match key {
            ParamKey::GlitchIntensity => &self.glitch_intensity,
            ParamKey::GrainAmount => &self.grain_amount,
            ParamKey::SliceCount => &self.slice_count,
            ParamKey::RgbShiftAmount => &self.rgb_shift_amount,
            ParamKey::VignetteStrength => &self.vignette_strength,
            ParamKey::ScaleOffset => &self.scale_offset,
            ParamKey::RotationDegrees => &self.rotation_degrees,
            ParamKey::SpeedMultiplier => &self.speed_multiplier,
            ParamKey::Saturation => &self.saturation,
            ParamKey::TintHue => &self.tint_hue,
            ParamKey::BlendMode | ParamKey::NoiseOverlay | ParamKey::AutoShift => {
                unreachable!("discrete parameter {} has no numeric slot", key.name())
            }
        }
    }

    fn number_mut(&mut self, key: ParamKey) -> &mut f32 {
        match key {
            ParamKey::GlitchIntensity => &mut self.glitch_intensity,
            ParamKey::GrainAmount => &mut self.grain_amount,
            ParamKey::SliceCount => &mut self.slice_count,
            ParamKey::RgbShiftAmount => &mut self.rgb_shift_amount,
            ParamKey::VignetteStrength => &mut self.vignette_strength,
            ParamKey::ScaleOffset => &mut self.scale_offset,
            ParamKey::RotationDegrees => &mut self.rotation_degrees,
            ParamKey::SpeedMultiplier => &mut self.speed_multiplier,
            ParamKey::Saturation => &mut self.saturation,
            ParamKey::TintHue => &mut self.tint_hue,
            ParamKey::BlendMode | ParamKey::NoiseOverlay | ParamKey::AutoShift => {
                unreachable!("discrete parameter {} has no numeric slot", key.name())
            }
        }
    }
}

fn clamp_number(v: f32, lo: f32, hi: f32, integer: bool) -> f32 {
    let v = if v.is_finite() { v } else { lo };
    let v = v.clamp(lo, hi);
    if integer { v.round() } else { v }
}

/// Target/current parameter pair with exponential smoothing.
///
/// Writes only ever touch the target side. `tick` moves every current value a
/// fraction `alpha` of the way toward its target and clamps it into range, so
/// the current side is always renderable no matter what was requested.
#[derive(Clone, Debug)]
pub struct ParamStore {
    target: EffectParams,
    current: EffectParams,
    alpha: f32,
}

impl ParamStore {
    pub fn new(alpha: f32) -> Self {
        Self::with_params(EffectParams::default(), alpha)
    }

    pub fn with_params(params: EffectParams, alpha: f32) -> Self {
        let params = params.clamped();
        Self {
            target: params,
            current: params,
            alpha: if alpha.is_finite() {
                alpha.clamp(0.001, 1.0)
            } else {
                DEFAULT_SMOOTHING
            },
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn target(&self) -> &EffectParams {
        &self.target
    }

    pub fn current(&self) -> &EffectParams {
        &self.current
    }

    pub fn set_target(&mut self, key: ParamKey, value: ParamValue) -> Result<(), ParamError> {
        match (key.kind(), value) {
            (ParamKind::Number { lo, hi, integer }, ParamValue::Number(v)) => {
                if !v.is_finite() {
                    return Err(ParamError::NotFinite {
                        key: key.name(),
                        value: v,
                    });
                }
                *self.target.number_mut(key) = clamp_number(v, lo, hi, integer);
                Ok(())
            }
            (ParamKind::Blend, ParamValue::Blend(mode)) => {
                self.target.blend_mode = mode;
                Ok(())
            }
            (ParamKind::Toggle, ParamValue::Toggle(on)) => {
                if key == ParamKey::NoiseOverlay {
                    self.target.noise_overlay = on;
                } else {
                    self.target.auto_shift = on;
                }
                Ok(())
            }
            (kind, _) => Err(ParamError::WrongKind {
                key: key.name(),
                expected: match kind {
                    ParamKind::Number { .. } => "number",
                    ParamKind::Blend => "blend mode",
                    ParamKind::Toggle => "boolean",
                },
            }),
        }
    }

    /// Replace every target in one step.
    pub fn set_targets(&mut self, params: EffectParams) {
        self.target = params.clamped();
    }

    /// Step a numeric target by `delta` (keyboard sliders).
    pub fn nudge(&mut self, key: ParamKey, delta: f32) -> Result<(), ParamError> {
        match self.target.get(key) {
            ParamValue::Number(v) => self.set_target(key, ParamValue::Number(v + delta)),
            _ => Err(ParamError::WrongKind {
                key: key.name(),
                expected: "number",
            }),
        }
    }

    pub fn tick(&mut self) {
        let a = self.alpha;
        for key in ParamKey::ALL {
            if let ParamKind::Number { lo, hi, .. } = key.kind() {
                let target = *self.target.number_ref(key);
                let cur = self.current.number_mut(key);
                let next = *cur + (target - *cur) * a;
                *cur = if next.is_finite() {
                    next.clamp(lo, hi)
                } else {
                    target.clamp(lo, hi)
                };
            }
        }
        self.current.blend_mode = self.target.blend_mode;
        self.current.noise_overlay = self.target.noise_overlay;
        self.current.auto_shift = self.target.auto_shift;
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}
