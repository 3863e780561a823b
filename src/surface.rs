use crate::params::BlendMode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("surface is empty ({width}x{height})")]
    Empty { width: usize, height: usize },
    #[error("region {x},{y} {w}x{h} is outside a {width}x{height} surface")]
    OutOfBounds {
        x: usize,
        y: usize,
        w: usize,
        h: usize,
        width: usize,
        height: usize,
    },
    #[error("pixel buffer has {got} bytes, expected {expected}")]
    BadLength { expected: usize, got: usize },
}

/// Owned RGBA8 drawing surface.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Surface {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: usize, height: usize) -> Self {
        let mut s = Self {
            width,
            height,
            pixels: vec![0u8; width.saturating_mul(height).saturating_mul(4)],
        };
        s.fill([0, 0, 0]);
        s
    }

    pub fn from_rgba(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, SurfaceError> {
        let expected = width.saturating_mul(height).saturating_mul(4);
        if pixels.len() != expected {
            return Err(SurfaceError::BadLength {
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Returns true when the dimensions changed (contents are then undefined).
    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.pixels
            .resize(width.saturating_mul(height).saturating_mul(4), 0);
        true
    }

    pub fn ensure_readable(&self) -> Result<(), SurfaceError> {
        if self.is_empty() {
            return Err(SurfaceError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub fn fill(&mut self, rgb: [u8; 3]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px[0] = rgb[0];
            px[1] = rgb[1];
            px[2] = rgb[2];
            px[3] = 255;
        }
    }

    pub fn copy_from(&mut self, src: &Surface) {
        self.resize(src.width, src.height);
        self.pixels.copy_from_slice(&src.pixels);
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        (y * self.width + x) * 4
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.index(x, y);
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    pub fn put(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.index(x, y);
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.width * 4;
        &self.pixels[y * stride..(y + 1) * stride]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let stride = self.width * 4;
        &mut self.pixels[y * stride..(y + 1) * stride]
    }

    /// Row slice of a rectangular region, checked against the surface bounds.
    pub fn try_region(
        &self,
        x: usize,
        y: usize,
        w: usize,
        h: usize,
    ) -> Result<Vec<&[u8]>, SurfaceError> {
        self.ensure_readable()?;
        if x.saturating_add(w) > self.width || y.saturating_add(h) > self.height {
            return Err(SurfaceError::OutOfBounds {
                x,
                y,
                w,
                h,
                width: self.width,
                height: self.height,
            });
        }
        Ok((y..y + h)
            .map(|row| {
                let start = self.index(x, row);
                &self.pixels[start..start + w * 4]
            })
            .collect())
    }

    /// Composite one colour onto the pixel at (x, y). Colour and alpha are 0..=1.
    #[inline]
    pub fn blend_pixel(&mut self, x: usize, y: usize, src: [f32; 3], alpha: f32, mode: BlendMode) {
        if x >= self.width || y >= self.height || alpha <= 0.0 {
            return;
        }
        let i = self.index(x, y);
        let a = alpha.min(1.0);
        for c in 0..3 {
            let d = self.pixels[i + c] as f32 / 255.0;
            let s = src[c].clamp(0.0, 1.0);
            let out = if mode == BlendMode::Lighter {
                d + s * a
            } else {
                d + (blend_channel(mode, s, d) - d) * a
            };
            self.pixels[i + c] = (out.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        }
        self.pixels[i + 3] = 255;
    }

    /// Bilinear sample at continuous pixel coordinates, RGBA in 0..=1.
    pub fn sample_bilinear(&self, fx: f32, fy: f32) -> [f32; 4] {
        sample_bilinear_rgba(&self.pixels, self.width, self.height, fx, fy)
    }

    /// Copy the whole surface into `dst` at `dst`'s own size.
    pub fn resample_into(&self, dst: &mut Surface) -> Result<(), SurfaceError> {
        self.ensure_readable()?;
        dst.ensure_readable()?;
        if dst.width == self.width && dst.height == self.height {
            dst.pixels.copy_from_slice(&self.pixels);
            return Ok(());
        }
        let sx = self.width as f32 / dst.width as f32;
        let sy = self.height as f32 / dst.height as f32;
        for y in 0..dst.height {
            let fy = (y as f32 + 0.5) * sy - 0.5;
            for x in 0..dst.width {
                let fx = (x as f32 + 0.5) * sx - 0.5;
                let px = self.sample_bilinear(fx, fy);
                let i = dst.index(x, y);
                for c in 0..3 {
                    dst.pixels[i + c] = (px[c] * 255.0 + 0.5) as u8;
                }
                dst.pixels[i + 3] = 255;
            }
        }
        Ok(())
    }
}

pub fn blend_channel(mode: BlendMode, s: f32, d: f32) -> f32 {
    match mode {
        BlendMode::Normal => s,
        BlendMode::Lighter => (s + d).min(1.0),
        BlendMode::Screen => s + d - s * d,
        BlendMode::Multiply => s * d,
        BlendMode::Overlay => {
            if d <= 0.5 {
                2.0 * s * d
            } else {
                1.0 - 2.0 * (1.0 - s) * (1.0 - d)
            }
        }
        BlendMode::Darken => s.min(d),
        BlendMode::Lighten => s.max(d),
        BlendMode::Difference => (s - d).abs(),
    }
}

pub fn sample_bilinear_rgba(pixels: &[u8], w: usize, h: usize, fx: f32, fy: f32) -> [f32; 4] {
    if w == 0 || h == 0 {
        return [0.0; 4];
    }
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;
    let fx = fx.clamp(0.0, max_x);
    let fy = fy.clamp(0.0, max_y);
    let x0 = fx.floor() as usize;
    let y0 = fy.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let tx = fx - x0 as f32;
    let ty = fy - y0 as f32;

    let at = |x: usize, y: usize, c: usize| pixels[(y * w + x) * 4 + c] as f32 / 255.0;
    let mut out = [0.0f32; 4];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = at(x0, y0, c) * (1.0 - tx) + at(x1, y0, c) * tx;
        let bot = at(x0, y1, c) * (1.0 - tx) + at(x1, y1, c) * tx;
        *slot = top * (1.0 - ty) + bot * ty;
    }
    out
}

/// HSL to RGB, hue in degrees, saturation/lightness 0..=1.
pub fn hsl_to_rgb(hue_deg: f32, s: f32, l: f32) -> [u8; 3] {
    let h = hue_deg.rem_euclid(360.0) / 60.0;
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    [
        ((r + m).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((g + m).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((b + m).clamp(0.0, 1.0) * 255.0).round() as u8,
    ]
}
