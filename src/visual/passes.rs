use crate::params::{BlendMode, EffectParams};
use crate::surface::{Surface, SurfaceError, sample_bilinear_rgba};
use image::RgbaImage;
use thiserror::Error;

pub const SCANLINE_PITCH: usize = 3;
const LAYER_ALPHA: f32 = 0.75;
const CHANNEL_SHIFT_OPACITY: f32 = 0.35;
const NOISE_ALPHA: f32 = 0.25;

#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("layer {index} has no pixels")]
    EmptyLayer { index: usize },
}

pub struct PassCtx<'a> {
    pub t: f32,
    pub params: EffectParams,
    /// Displacement driver: manual glitch intensity or live band energy.
    pub drive: f32,
    pub layers: &'a [&'a RgbaImage],
}

pub type PassFn = fn(&Surface, &PassCtx<'_>, &mut fastrand::Rng, &mut Surface) -> Result<(), PassError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Composite,
    SliceGlitch,
    ChannelShift,
    Noise,
    Scanlines,
    Vignette,
}

impl Pass {
    pub fn label(self) -> &'static str {
        match self {
            Self::Composite => "composite",
            Self::SliceGlitch => "slice-glitch",
            Self::ChannelShift => "channel-shift",
            Self::Noise => "noise",
            Self::Scanlines => "scanlines",
            Self::Vignette => "vignette",
        }
    }
}

/// Passes after the background fill, in draw order.
pub const PIPELINE: [(Pass, PassFn); 6] = [
    (Pass::Composite, composite_layers),
    (Pass::SliceGlitch, slice_glitch),
    (Pass::ChannelShift, channel_shift),
    (Pass::Noise, noise_overlay),
    (Pass::Scanlines, scanlines),
    (Pass::Vignette, vignette),
];

/// Black, or a dark wash of the tint hue when one is set.
pub fn background_color(params: &EffectParams) -> [u8; 3] {
    if params.tint_hue.abs() > 0.5 {
        crate::surface::hsl_to_rgb(params.tint_hue, 0.5, 0.08)
    } else {
        [0, 0, 0]
    }
}

/// CSS `saturate()` colour matrix.
pub fn saturate(rgb: [f32; 3], s: f32) -> [f32; 3] {
    let [r, g, b] = rgb;
    [
        ((0.213 + 0.787 * s) * r + (0.715 - 0.715 * s) * g + (0.072 - 0.072 * s) * b).clamp(0.0, 1.0),
        ((0.213 - 0.213 * s) * r + (0.715 + 0.285 * s) * g + (0.072 - 0.072 * s) * b).clamp(0.0, 1.0),
        ((0.213 - 0.213 * s) * r + (0.715 - 0.715 * s) * g + (0.072 + 0.928 * s) * b).clamp(0.0, 1.0),
    ]
}

/// Draw every layer cover-fitted over `src`.
///
/// Even layers add onto the (possibly tinted) background with "lighter" and
/// odd layers use the configured blend mode. Only layer 0 draws at full alpha. Scale offset flips sign per layer, translation is a slow sinusoid
/// with amplitude from `ctx.drive`, and rotation oscillates when auto-shift is on.
pub fn composite_layers(
    src: &Surface,
    ctx: &PassCtx<'_>,
    _rng: &mut fastrand::Rng,
    out: &mut Surface,
) -> Result<(), PassError> {
    out.copy_from(src);
    if let Some(index) = ctx
        .layers
        .iter()
        .position(|l| l.width() == 0 || l.height() == 0)
    {
        return Err(PassError::EmptyLayer { index });
    }
    let (w, h) = out.dims();
    if w == 0 || h == 0 {
        return Ok(());
    }

    let p = &ctx.params;
    let phase = ctx.t * p.speed_multiplier;
    let amp = ctx.drive.max(0.0) * 0.02;

    for (index, layer) in ctx.layers.iter().enumerate() {
        let iw = layer.width() as usize;
        let ih = layer.height() as usize;
        let k = index as f32;
        let sign = if index % 2 == 0 { 1.0 } else { -1.0 };

        let cover = (w as f32 / iw as f32).max(h as f32 / ih as f32);
        let scale = (cover * (1.0 + sign * p.scale_offset)).max(1e-3);
        let tx = (phase * 0.9 + k * 1.7).sin() * amp * w as f32;
        let ty = (phase * 0.7 + k * 2.3).cos() * amp * h as f32;
        let mut degrees = p.rotation_degrees * sign;
        if p.auto_shift {
            degrees *= (phase * 0.5 + k).sin();
        }
        let (sin, cos) = degrees.to_radians().sin_cos();

        let mode = if index % 2 == 0 { BlendMode::Lighter } else { p.blend_mode };
        let alpha = if index == 0 { 1.0 } else { LAYER_ALPHA };

        let cx = w as f32 * 0.5 + tx;
        let cy = h as f32 * 0.5 + ty;
        let half_w = iw as f32 * 0.5;
        let half_h = ih as f32 * 0.5;
        let raw = layer.as_raw();
        for y in 0..h {
            let dy = y as f32 + 0.5 - cy;
            for x in 0..w {
                let dx = x as f32 + 0.5 - cx;
                let u = (dx * cos + dy * sin) / scale + half_w;
                let v = (-dx * sin + dy * cos) / scale + half_h;
                if u < 0.0 || v < 0.0 || u >= iw as f32 || v >= ih as f32 {
                    continue;
                }
                let px = sample_bilinear_rgba(raw, iw, ih, u - 0.5, v - 0.5);
                let rgb = saturate([px[0], px[1], px[2]], p.saturation);
                out.blend_pixel(x, y, rgb, alpha * px[3], mode);
            }
        }
    }
    Ok(())
}

/// Displace a random subset of horizontal bands, wrapping at the edges.
pub fn slice_glitch(
    src: &Surface,
    ctx: &PassCtx<'_>,
    rng: &mut fastrand::Rng,
    out: &mut Surface,
) -> Result<(), PassError> {
    src.ensure_readable()?;
    out.copy_from(src);
    let (w, h) = src.dims();
    let drive = ctx.drive.clamp(0.0, 1.0);
    let factor = 0.75 + rng.f32() * 0.5;
    if drive <= 0.0 {
        return Ok(());
    }
    let bands = ((ctx.params.slices() as f32 * factor).round() as usize).clamp(1, h);
    let band_h = h.div_ceil(bands);
    let max_shift = drive * w as f32 * 0.12;

    let mut y = 0usize;
    while y < h {
        let bh = band_h.min(h - y);
        if rng.f32() < drive * 0.6 {
            let shift = ((rng.f32() * 2.0 - 1.0) * max_shift).round() as isize;
            if shift != 0 {
                let rows = src.try_region(0, y, w, bh)?;
                for (r, row) in rows.iter().enumerate() {
                    shift_row(row, out.row_mut(y + r), shift);
                }
            }
        }
        y += bh;
    }
    Ok(())
}

fn shift_row(src: &[u8], dst: &mut [u8], shift: isize) {
    let w = (src.len() / 4) as isize;
    if w == 0 {
        return;
    }
    for x in 0..w {
        let from = (x - shift).rem_euclid(w) as usize * 4;
        let to = x as usize * 4;
        dst[to..to + 4].copy_from_slice(&src[from..from + 4]);
    }
}

/// Occasionally shift one colour channel on a quarter-size copy and lay it
/// back over the frame at low opacity.
pub fn channel_shift(
    src: &Surface,
    ctx: &PassCtx<'_>,
    rng: &mut fastrand::Rng,
    out: &mut Surface,
) -> Result<(), PassError> {
    out.copy_from(src);
    let p = &ctx.params;
    let roll = rng.f32();
    if p.rgb_shift_amount <= 0.0 || roll >= p.glitch_intensity * 0.35 {
        return Ok(());
    }
    let (w, h) = src.dims();
    let sw = (w / 4).max(1);
    let sh = (h / 4).max(1);
    let mut small = Surface::new(sw, sh);
    src.resample_into(&mut small)?;

    let magnitude = ((p.rgb_shift_amount * sw as f32 * 0.5).round() as isize).max(1);
    let offset = if rng.bool() { magnitude } else { -magnitude };
    let channel = rng.usize(..3);

    let mut shifted = small.clone();
    for y in 0..sh {
        let src_row = small.row(y);
        let dst_row = shifted.row_mut(y);
        for x in 0..sw as isize {
            let from = (x - offset).clamp(0, sw as isize - 1) as usize;
            dst_row[x as usize * 4 + channel] = src_row[from * 4 + channel];
        }
    }

    let sx = sw as f32 / w as f32;
    let sy = sh as f32 / h as f32;
    for y in 0..h {
        let fy = (y as f32 + 0.5) * sy - 0.5;
        for x in 0..w {
            let fx = (x as f32 + 0.5) * sx - 0.5;
            let px = shifted.sample_bilinear(fx, fy);
            out.blend_pixel(x, y, [px[0], px[1], px[2]], CHANNEL_SHIFT_OPACITY, BlendMode::Normal);
        }
    }
    Ok(())
}

pub fn noise_overlay(
    src: &Surface,
    ctx: &PassCtx<'_>,
    rng: &mut fastrand::Rng,
    out: &mut Surface,
) -> Result<(), PassError> {
    out.copy_from(src);
    let p = &ctx.params;
    if !p.noise_overlay || p.grain_amount <= 0.0 {
        return Ok(());
    }
    src.ensure_readable()?;
    let (w, h) = src.dims();
    let count = ((w * h) as f32 * p.grain_amount * 0.25) as usize;
    for _ in 0..count {
        let x = rng.usize(..w);
        let y = rng.usize(..h);
        let g = rng.f32();
        out.blend_pixel(x, y, [g, g, g], NOISE_ALPHA, BlendMode::Normal);
    }
    Ok(())
}

pub fn scanlines(
    src: &Surface,
    ctx: &PassCtx<'_>,
    _rng: &mut fastrand::Rng,
    out: &mut Surface,
) -> Result<(), PassError> {
    out.copy_from(src);
    let alpha = (ctx.params.grain_amount * 1.5).min(1.0);
    if alpha <= 0.0 {
        return Ok(());
    }
    let (w, h) = out.dims();
    for y in (0..h).step_by(SCANLINE_PITCH) {
        for x in 0..w {
            out.blend_pixel(x, y, [0.0; 3], alpha, BlendMode::Normal);
        }
    }
    Ok(())
}

pub fn vignette(
    src: &Surface,
    ctx: &PassCtx<'_>,
    _rng: &mut fastrand::Rng,
    out: &mut Surface,
) -> Result<(), PassError> {
    out.copy_from(src);
    let strength = ctx.params.vignette_strength;
    if strength <= 0.0 {
        return Ok(());
    }
    let (w, h) = out.dims();
    let hw = w as f32 * 0.5;
    let hh = h as f32 * 0.5;
    for y in 0..h {
        let dy = (y as f32 + 0.5 - hh) / hh;
        for x in 0..w {
            let dx = (x as f32 + 0.5 - hw) / hw;
            let r = (dx * dx + dy * dy).sqrt();
            let alpha = (strength * smoothstep(0.3, 1.2, r) * 1.5).min(1.0);
            out.blend_pixel(x, y, [0.0; 3], alpha, BlendMode::Normal);
        }
    }
    Ok(())
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
