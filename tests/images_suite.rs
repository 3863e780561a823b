use base64::Engine;
use glitchviz::images::{
    self, DEFAULT_ASSET_SIZE, Fetch, FetchError, ImageOrigin, ImageSources, ImageStatus, proxy_url,
    resolve,
};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PROXY: &str = "http://proxy.test/img?url=";

fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(w, h, image::Rgba([200, 40, 90, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("png encode should succeed");
    buf.into_inner()
}

/// Serves a small PNG for every URL in `ok`, fails everything else.
struct ScriptedFetch {
    ok: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetch {
    fn new(ok: &[&str]) -> Self {
        Self {
            ok: ok.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

impl Fetch for ScriptedFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().expect("lock").push(url.to_string());
        if self.ok.iter().any(|u| u == url) {
            Ok(png_bytes(6, 4))
        } else {
            Err(FetchError::Http {
                url: url.to_string(),
                message: "blocked by cors".to_string(),
            })
        }
    }
}

#[test]
fn direct_success_makes_one_request() {
    let fetch = ScriptedFetch::new(&["https://a.test/one.png"]);
    let resolved = resolve("https://a.test/one.png", &fetch, PROXY).expect("resolve");
    assert_eq!(resolved.origin, ImageOrigin::Direct);
    assert_eq!(resolved.raster.dimensions(), (6, 4));
    assert_eq!(fetch.calls().len(), 1);
}

#[test]
fn cross_origin_failure_retries_once_through_proxy() {
    let url = "https://a.test/cat.png?size=2";
    let proxied = proxy_url(PROXY, url);
    let fetch = ScriptedFetch::new(&[proxied.as_str()]);

    let resolved = resolve(url, &fetch, PROXY).expect("resolve");
    assert_eq!(resolved.origin, ImageOrigin::Proxy);
    assert_eq!(fetch.calls(), vec![url.to_string(), proxied]);
}

#[test]
fn failed_proxy_falls_back_to_default_asset() {
    let fetch = ScriptedFetch::new(&[]);
    let resolved = resolve("https://a.test/missing.png", &fetch, PROXY).expect("resolve");

    assert_eq!(resolved.origin, ImageOrigin::DefaultAsset);
    assert_eq!(
        resolved.raster.dimensions(),
        (DEFAULT_ASSET_SIZE, DEFAULT_ASSET_SIZE)
    );
    let calls = fetch.calls();
    assert_eq!(calls.len(), 2, "exactly one proxy retry: {calls:?}");
    assert!(calls[1].starts_with(PROXY));
}

#[test]
fn proxy_url_percent_encodes_original() {
    let got = proxy_url(PROXY, "https://a.test/x y.png?q=1&r=2");
    assert_eq!(
        got,
        "http://proxy.test/img?url=https%3A%2F%2Fa.test%2Fx%20y.png%3Fq%3D1%26r%3D2"
    );
}

#[test]
fn data_uri_decodes_without_network() {
    let payload = base64::engine::general_purpose::STANDARD.encode(png_bytes(3, 5));
    let uri = format!("data:image/png;base64,{payload}");
    let fetch = ScriptedFetch::new(&[]);

    let resolved = resolve(&uri, &fetch, PROXY).expect("resolve");
    assert_eq!(resolved.origin, ImageOrigin::Direct);
    assert_eq!(resolved.raster.dimensions(), (3, 5));
    assert!(fetch.calls().is_empty());
}

#[test]
fn unreadable_file_uses_default_asset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.png");
    let fetch = ScriptedFetch::new(&[]);

    let resolved = resolve(&missing.display().to_string(), &fetch, PROXY).expect("resolve");
    assert_eq!(resolved.origin, ImageOrigin::DefaultAsset);
}

#[test]
fn file_locator_loads_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("layer.png");
    std::fs::write(&path, png_bytes(8, 2)).expect("write png");
    let fetch = ScriptedFetch::new(&[]);

    let resolved = resolve(&path.display().to_string(), &fetch, PROXY).expect("resolve");
    assert_eq!(resolved.origin, ImageOrigin::Direct);
    assert_eq!(resolved.raster.dimensions(), (8, 2));
}

#[test]
fn sources_settle_with_every_entry_renderable() {
    let good = "https://a.test/good.png";
    let fetch = Arc::new(ScriptedFetch::new(&[good]));
    let mut sources = ImageSources::new(fetch.clone(), PROXY);
    sources.load(&[good.to_string(), "https://b.test/bad.png".to_string()]);

    assert!(sources.wait_settled(Duration::from_secs(5)));
    let entries = sources.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.status == ImageStatus::Loaded));
    assert_eq!(entries[0].origin, Some(ImageOrigin::Direct));
    assert_eq!(entries[1].origin, Some(ImageOrigin::DefaultAsset));
    assert_eq!(sources.loaded().len(), 2);

    sources.swap();
    assert_eq!(sources.entries()[0].locator, "https://b.test/bad.png");
}

#[test]
fn reload_discards_results_from_previous_generation() {
    let fetch = Arc::new(ScriptedFetch::new(&[]));
    let mut sources = ImageSources::new(fetch, PROXY);
    sources.load(&["a.png".to_string(), "b.png".to_string()]);
    sources.load(&["c.png".to_string()]);

    assert!(sources.wait_settled(Duration::from_secs(5)));
    assert_eq!(sources.entries().len(), 1);
    assert_eq!(sources.entries()[0].locator, "c.png");
}

#[test]
fn default_asset_is_opaque() {
    let img = images::default_asset();
    assert!(img.pixels().all(|p| p.0[3] == 255));
}
