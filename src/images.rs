//! Image layer loading.
//!
//! Every locator resolves on its own worker thread and reports back over a
//! channel; the render loop calls [`ImageSources::poll`] once per frame and
//! draws whatever subset has finished. A failed http(s) fetch is retried once
//! through the image proxy, after which the built-in default raster stands in.

use base64::Engine;
use image::RgbaImage;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_PROXY_BASE: &str = "http://localhost:3000/api/proxy-image?url=";
pub const DEFAULT_ASSET_SIZE: u32 = 256;
const MAX_RASTER_SIDE: u32 = 1024;
const MAX_DOWNLOAD_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed data uri: {0}")]
    DataUri(String),
    #[error("decode {locator}: {source}")]
    Decode {
        locator: String,
        #[source]
        source: image::ImageError,
    },
}

/// Byte source for remote locators.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.agent.get(url).call().map_err(|e| FetchError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_DOWNLOAD_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Http(String),
    DataUri(String),
    File(PathBuf),
}

impl Locator {
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Http(s.to_string())
        } else if lower.starts_with("data:") {
            Self::DataUri(s.to_string())
        } else {
            Self::File(PathBuf::from(s))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageStatus {
    Pending,
    Loaded,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOrigin {
    Direct,
    Proxy,
    DefaultAsset,
}

pub struct Resolved {
    pub raster: RgbaImage,
    pub origin: ImageOrigin,
}

pub struct ImageEntry {
    pub locator: String,
    pub status: ImageStatus,
    pub origin: Option<ImageOrigin>,
    slot: usize,
    raster: Option<Arc<RgbaImage>>,
}

impl ImageEntry {
    pub fn raster(&self) -> Option<&RgbaImage> {
        self.raster.as_deref()
    }
}

struct LoadMessage {
    generation: u64,
    slot: usize,
    result: Result<Resolved, FetchError>,
}

pub struct ImageSources {
    fetcher: Arc<dyn Fetch>,
    proxy_base: String,
    generation: u64,
    entries: Vec<ImageEntry>,
    tx: Sender<LoadMessage>,
    rx: Receiver<LoadMessage>,
}

impl ImageSources {
    pub fn new(fetcher: Arc<dyn Fetch>, proxy_base: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            fetcher,
            proxy_base: proxy_base.into(),
            generation: 0,
            entries: Vec::new(),
            tx,
            rx,
        }
    }

    /// Start loading `locators`, superseding whatever was loaded before.
    pub fn load(&mut self, locators: &[String]) {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.entries = locators
            .iter()
            .enumerate()
            .map(|(slot, locator)| ImageEntry {
                locator: locator.clone(),
                status: ImageStatus::Pending,
                origin: None,
                slot,
                raster: None,
            })
            .collect();

        for (slot, locator) in locators.iter().enumerate() {
            let tx = self.tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let proxy_base = self.proxy_base.clone();
            let locator = locator.clone();
            thread::spawn(move || {
                let result = resolve(&locator, fetcher.as_ref(), &proxy_base);
                let _ = tx.send(LoadMessage {
                    generation,
                    slot,
                    result,
                });
            });
        }
        tracing::debug!(generation, count = locators.len(), "image load started");
    }

    /// Drain finished loads. Returns how many entries changed state.
    pub fn poll(&mut self) -> usize {
        let mut changed = 0usize;
        while let Ok(msg) = self.rx.try_recv() {
            if msg.generation != self.generation {
                continue;
            }
            let Some(entry) = self.entries.iter_mut().find(|e| e.slot == msg.slot) else {
                continue;
            };
            match msg.result {
                Ok(resolved) => {
                    tracing::info!(
                        locator = %entry.locator,
                        origin = ?resolved.origin,
                        width = resolved.raster.width(),
                        height = resolved.raster.height(),
                        "image ready"
                    );
                    entry.status = ImageStatus::Loaded;
                    entry.origin = Some(resolved.origin);
                    entry.raster = Some(Arc::new(resolved.raster));
                }
                Err(err) => {
                    tracing::warn!(locator = %entry.locator, "image unavailable: {err}");
                    entry.status = ImageStatus::Failed;
                }
            }
            changed += 1;
        }
        changed
    }

    /// Poll until every entry has settled or `timeout` elapses.
    pub fn wait_settled(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.is_settled() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn is_settled(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.status != ImageStatus::Pending)
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    /// Finished rasters in layer order.
    pub fn loaded(&self) -> Vec<&RgbaImage> {
        self.entries.iter().filter_map(|e| e.raster()).collect()
    }

    pub fn swap(&mut self) {
        self.entries.reverse();
    }
}

pub fn resolve(locator: &str, fetcher: &dyn Fetch, proxy_base: &str) -> Result<Resolved, FetchError> {
    match Locator::parse(locator) {
        Locator::Http(url) => {
            match fetcher.fetch(&url).and_then(|b| decode(&url, &b)) {
                Ok(raster) => {
                    return Ok(Resolved {
                        raster,
                        origin: ImageOrigin::Direct,
                    });
                }
                Err(err) => tracing::warn!(%url, "direct load failed, retrying via proxy: {err}"),
            }
            let proxied = proxy_url(proxy_base, &url);
            match fetcher.fetch(&proxied).and_then(|b| decode(&proxied, &b)) {
                Ok(raster) => Ok(Resolved {
                    raster,
                    origin: ImageOrigin::Proxy,
                }),
                Err(err) => {
                    tracing::warn!(%url, "proxy load failed, using default asset: {err}");
                    Ok(fallback())
                }
            }
        }
        Locator::DataUri(uri) => match decode_data_uri(&uri) {
            Ok(raster) => Ok(Resolved {
                raster,
                origin: ImageOrigin::Direct,
            }),
            Err(err) => {
                tracing::warn!("data uri unusable, using default asset: {err}");
                Ok(fallback())
            }
        },
        Locator::File(path) => {
            let loaded = std::fs::read(&path)
                .map_err(|source| FetchError::Io {
                    path: path.display().to_string(),
                    source,
                })
                .and_then(|b| decode(&path.display().to_string(), &b));
            match loaded {
                Ok(raster) => Ok(Resolved {
                    raster,
                    origin: ImageOrigin::Direct,
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), "file load failed, using default asset: {err}");
                    Ok(fallback())
                }
            }
        }
    }
}

fn fallback() -> Resolved {
    Resolved {
        raster: default_asset(),
        origin: ImageOrigin::DefaultAsset,
    }
}

pub fn proxy_url(proxy_base: &str, original: &str) -> String {
    let mut out = String::with_capacity(proxy_base.len() + original.len() * 3);
    out.push_str(proxy_base);
    for b in original.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn decode(locator: &str, bytes: &[u8]) -> Result<RgbaImage, FetchError> {
    let img = image::load_from_memory(bytes).map_err(|source| FetchError::Decode {
        locator: short_locator(locator),
        source,
    })?;
    let img = if img.width() > MAX_RASTER_SIDE || img.height() > MAX_RASTER_SIDE {
        img.thumbnail(MAX_RASTER_SIDE, MAX_RASTER_SIDE)
    } else {
        img
    };
    Ok(img.to_rgba8())
}

fn decode_data_uri(uri: &str) -> Result<RgbaImage, FetchError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| FetchError::DataUri("missing ',' separator".to_string()))?;
    if !header.to_ascii_lowercase().ends_with(";base64") {
        return Err(FetchError::DataUri(
            "only base64 payloads are supported".to_string(),
        ));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| FetchError::DataUri(e.to_string()))?;
    decode("data uri", &bytes)
}

fn short_locator(locator: &str) -> String {
    if locator.chars().count() > 96 {
        format!("{}...", locator.chars().take(96).collect::<String>())
    } else {
        locator.to_string()
    }
}

/// Built-in stand-in layer: a 256x256 violet/teal diagonal gradient with
/// faint horizontal banding so glitch passes have structure to displace.
pub fn default_asset() -> RgbaImage {
    let n = DEFAULT_ASSET_SIZE;
    RgbaImage::from_fn(n, n, |x, y| {
        let u = x as f32 / (n - 1) as f32;
        let v = y as f32 / (n - 1) as f32;
        let band = if (y / 16) % 2 == 0 { 1.0 } else { 0.86 };
        let r = (0.15 + 0.55 * u) * band;
        let g = (0.1 + 0.6 * v * (1.0 - u)) * band;
        let b = (0.55 + 0.4 * (1.0 - v)) * band;
        image::Rgba([
            (r.clamp(0.0, 1.0) * 255.0) as u8,
            (g.clamp(0.0, 1.0) * 255.0) as u8,
            (b.clamp(0.0, 1.0) * 255.0) as u8,
            255,
        ])
    })
}
