use super::{Artifact, ExportError, ExportFormat, ExportJob, JobState};
use crate::surface::Surface;
use image::ImageEncoder;
use image::codecs::png::PngEncoder;

/// Single-frame PNG capture; the job is terminal when this returns.
pub fn capture(surface: &Surface) -> Result<Artifact, ExportError> {
    let (w, h) = surface.dims();
    let mut job = ExportJob::new(ExportFormat::Screenshot, 1, 0, w.max(h) as u32);
    job.advance(JobState::Capturing)?;
    let result = surface
        .ensure_readable()
        .map_err(ExportError::from)
        .map(|()| surface.pixels().to_vec())
        .and_then(|pixels| {
            job.advance(JobState::Encoding)?;
            encode_png(&pixels, w as u32, h as u32)
        });
    match result {
        Ok(bytes) => {
            job.advance(JobState::Done)?;
            tracing::info!(width = w, height = h, bytes = bytes.len(), "screenshot captured");
            Ok(Artifact {
                format: ExportFormat::Screenshot,
                extension: "png",
                width: w as u32,
                height: h as u32,
                frames: 1,
                bytes,
            })
        }
        Err(err) => {
            job.fail();
            Err(err)
        }
    }
}

pub fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ExportError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(rgba, width, height, image::ExtendedColorType::Rgba8)?;
    Ok(bytes)
}
