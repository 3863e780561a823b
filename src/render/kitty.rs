use crate::render::{Frame, Presenter, draw_overlay_popup, write_hud_lines};
use anyhow::{Context, anyhow};
use base64::Engine;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KittyTransport {
    Direct,
    File,
}

impl KittyTransport {
    fn label(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::File => "file",
        }
    }
}

/// Kitty graphics protocol presenter: the surface goes out as one RGBA image
/// placed over the visual rows.
pub struct KittyRenderer {
    image_id: u32,
    placement_id: u32,
    temp_path: PathBuf,
    temp_payload_b64: String,
    transports: Vec<KittyTransport>,
    active_transport_idx: usize,
    b64_buf: Vec<u8>,
    overlay_visible_last: bool,
    last_hud_rows: u16,
}

impl KittyRenderer {
    pub fn new() -> Self {
        let temp_path = std::env::temp_dir().join(format!("glitchviz-{}.rgba", std::process::id()));
        let temp_payload_b64 = base64::engine::general_purpose::STANDARD
            .encode(temp_path.to_string_lossy().as_bytes());
        Self {
            image_id: 1,
            placement_id: 1,
            temp_path,
            temp_payload_b64,
            transports: pick_transport_chain(),
            active_transport_idx: 0,
            b64_buf: Vec::new(),
            overlay_visible_last: false,
            last_hud_rows: 0,
        }
    }

    fn write_image(
        &mut self,
        transport: KittyTransport,
        frame: &Frame<'_>,
        out: &mut dyn Write,
    ) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let rows = frame.visual_rows as usize;
        let (w, h) = (frame.pixel_width, frame.pixel_height);
        match transport {
            KittyTransport::Direct => write_kitty_direct_rgba(
                out,
                frame.pixels_rgba,
                (w, h),
                (cols, rows),
                (self.image_id, self.placement_id),
                &mut self.b64_buf,
            ),
            KittyTransport::File => {
                fs::write(&self.temp_path, frame.pixels_rgba)
                    .with_context(|| format!("write kitty temp file {}", self.temp_path.display()))?;
                write!(
                    out,
                    "\x1b_Ga=T,f=32,s={w},v={h},t=f,i={},p={},c={cols},r={rows},C=1,q=2,z=-1;{}\x1b\\",
                    self.image_id, self.placement_id, self.temp_payload_b64
                )?;
                Ok(())
            }
        }
    }
}

impl Default for KittyRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for KittyRenderer {
    fn name(&self) -> &'static str {
        "kitty"
    }

    fn cell_pixels(&self) -> (usize, usize) {
        (2, 4)
    }

    fn present(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let visual_rows = frame.visual_rows as usize;
        if cols == 0 || visual_rows == 0 || frame.pixel_width == 0 || frame.pixel_height == 0 {
            return Ok(());
        }

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026h")?;
        }

        if let Some(text) = frame.overlay {
            write!(out, "\x1b_Ga=d,d=I,i={}\x1b\\", self.image_id)?;
            clear_text_rows(out, frame.term_rows as usize)?;
            write_hud_lines(out, visual_rows + 1, frame.hud_rows as usize, cols, frame.hud)?;
            draw_overlay_popup(out, frame.term_cols, frame.term_rows, text)?;
            self.overlay_visible_last = true;
            self.last_hud_rows = frame.hud_rows;
            if frame.sync_updates {
                out.write_all(b"\x1b[?2026l")?;
            }
            out.flush()?;
            return Ok(());
        }

        out.write_all(b"\x1b[H")?;
        let start = self.active_transport_idx.min(self.transports.len() - 1);
        let mut last_err: Option<anyhow::Error> = None;
        let mut rendered = false;
        for step in 0..self.transports.len() {
            let idx = (start + step) % self.transports.len();
            let transport = self.transports[idx];
            match self.write_image(transport, frame, out) {
                Ok(()) => {
                    self.active_transport_idx = idx;
                    rendered = true;
                    break;
                }
                Err(err) => {
                    if err.downcast_ref::<std::io::Error>().is_some() {
                        return Err(err);
                    }
                    tracing::debug!(transport = transport.label(), "kitty transport failed: {err:#}");
                    last_err = Some(err.context(format!("kitty transport '{}' failed", transport.label())));
                }
            }
        }
        if !rendered {
            return Err(last_err.unwrap_or_else(|| anyhow!("no kitty transport succeeded")));
        }

        if frame.hud_rows != self.last_hud_rows {
            clear_text_rows(out, frame.term_rows as usize)?;
        }
        if self.overlay_visible_last {
            clear_text_rows(out, visual_rows)?;
        }
        write_hud_lines(out, visual_rows + 1, frame.hud_rows as usize, cols, frame.hud)?;
        self.overlay_visible_last = false;
        self.last_hud_rows = frame.hud_rows;

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026l")?;
        }
        out.flush()?;
        Ok(())
    }
}

impl Drop for KittyRenderer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.temp_path);
    }
}

fn pick_transport_chain() -> Vec<KittyTransport> {
    if let Ok(v) = std::env::var("GLITCHVIZ_KITTY_TRANSPORT") {
        match v.trim().to_ascii_lowercase().as_str() {
            "direct" | "d" => return vec![KittyTransport::Direct],
            "file" | "f" | "temp" | "tempfile" => return vec![KittyTransport::File],
            _ => {}
        }
    }
    vec![KittyTransport::Direct, KittyTransport::File]
}

pub(crate) fn write_kitty_direct_rgba(
    out: &mut dyn Write,
    rgba: &[u8],
    (w, h): (usize, usize),
    (cols, rows): (usize, usize),
    (image_id, placement_id): (u32, u32),
    b64_buf: &mut Vec<u8>,
) -> anyhow::Result<()> {
    // Multiple of 3 so every chunk encodes without padding.
    const RAW_CHUNK: usize = 3 * 1024;

    if rgba.is_empty() {
        return Ok(());
    }
    let chunks = rgba.chunks(RAW_CHUNK);
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.enumerate() {
        let b64_len = chunk.len().div_ceil(3) * 4;
        if b64_buf.len() < b64_len {
            b64_buf.resize(b64_len, 0);
        }
        let written = base64::engine::general_purpose::STANDARD
            .encode_slice(chunk, &mut b64_buf[..b64_len])
            .context("base64 encode pixels")?;
        let more = u8::from(i < last);
        if i == 0 {
            write!(
                out,
                "\x1b_Ga=T,f=32,s={w},v={h},t=d,i={image_id},p={placement_id},c={cols},r={rows},C=1,q=2,z=-1,m={more};"
            )?;
        } else {
            write!(out, "\x1b_Gm={more};")?;
        }
        out.write_all(&b64_buf[..written])?;
        out.write_all(b"\x1b\\")?;
    }
    Ok(())
}

fn clear_text_rows(out: &mut dyn Write, rows: usize) -> anyhow::Result<()> {
    for row in 1..=rows {
        write!(out, "\x1b[{};1H\x1b[0m\x1b[2K", row)?;
    }
    Ok(())
}
