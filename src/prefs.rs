use crate::params::{BlendMode, EffectParams, ParamKey, ParamKind, ParamValue};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefsError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Effect targets remembered between runs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AppPrefs {
    pub params: EffectParams,
}

impl AppPrefs {
    pub fn load(path: Option<&Path>) -> Result<Self, PrefsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = match std::fs::read_to_string(path) {
            Ok(v) => v,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(PrefsError::Io(err.to_string())),
        };

        let mut params = EffectParams::default();
        for (line_idx, raw) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key_raw, value_raw)) = line.split_once('=') else {
                return Err(PrefsError::Parse {
                    line: line_no,
                    message: "expected <key>=<value>".to_string(),
                });
            };
            // Unknown keys are skipped so older files keep loading.
            let Some(key) = ParamKey::parse(key_raw) else {
                continue;
            };
            let value = parse_value(key, value_raw.trim()).ok_or_else(|| PrefsError::Parse {
                line: line_no,
                message: format!("invalid value for {}", key.name()),
            })?;
            apply(&mut params, key, value);
        }
        Ok(Self {
            params: params.clamped(),
        })
    }

    pub fn save(&self, path: Option<&Path>) -> Result<(), PrefsError> {
        let Some(path) = path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrefsError::Io(e.to_string()))?;
        }
        let mut body = String::from("# glitchviz effect targets v1\n");
        for key in ParamKey::ALL {
            let value = match self.params.get(key) {
                ParamValue::Number(v) => format!("{v}"),
                ParamValue::Blend(mode) => mode.label().to_string(),
                ParamValue::Toggle(on) => if on { "true" } else { "false" }.to_string(),
            };
            body.push_str(key.name());
            body.push('=');
            body.push_str(&value);
            body.push('\n');
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &body).map_err(|e| PrefsError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| PrefsError::Io(e.to_string()))
    }
}

fn parse_value(key: ParamKey, raw: &str) -> Option<ParamValue> {
    match key.kind() {
        ParamKind::Number { .. } => raw
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(ParamValue::Number),
        ParamKind::Blend => BlendMode::parse(raw).map(ParamValue::Blend),
        ParamKind::Toggle => parse_bool(raw).map(ParamValue::Toggle),
    }
}

fn apply(params: &mut EffectParams, key: ParamKey, value: ParamValue) {
    match (key, value) {
        (ParamKey::BlendMode, ParamValue::Blend(mode)) => params.blend_mode = mode,
        (ParamKey::NoiseOverlay, ParamValue::Toggle(on)) => params.noise_overlay = on,
        (ParamKey::AutoShift, ParamValue::Toggle(on)) => params.auto_shift = on,
        (ParamKey::GlitchIntensity, ParamValue::Number(v)) => params.glitch_intensity = v,
        (ParamKey::GrainAmount, ParamValue::Number(v)) => params.grain_amount = v,
        (ParamKey::SliceCount, ParamValue::Number(v)) => params.slice_count = v,
        (ParamKey::RgbShiftAmount, ParamValue::Number(v)) => params.rgb_shift_amount = v,
        (ParamKey::VignetteStrength, ParamValue::Number(v)) => params.vignette_strength = v,
        (ParamKey::ScaleOffset, ParamValue::Number(v)) => params.scale_offset = v,
        (ParamKey::RotationDegrees, ParamValue::Number(v)) => params.rotation_degrees = v,
        (ParamKey::SpeedMultiplier, ParamValue::Number(v)) => params.speed_multiplier = v,
        (ParamKey::Saturation, ParamValue::Number(v)) => params.saturation = v,
        (ParamKey::TintHue, ParamValue::Number(v)) => params.tint_hue = v,
        _ => {}
    }
}

pub fn prefs_storage_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("glitchviz").join("prefs.txt"));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("glitchviz")
            .join("prefs.txt"),
    )
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
