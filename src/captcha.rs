use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, ImageFormat};
use imageproc::contrast::{threshold, ThresholdType};

/// The identity provider always issues 4-character captchas.
const CAPTCHA_LEN: usize = 4;

/// Contrast boost applied before binarization.
const CONTRAST_BOOST: f32 = 30.0;

/// Intensity cut for binarization: below maps to background (0),
/// at/above to foreground (255). Tunable, not contract-critical.
const BINARIZE_THRESHOLD: u8 = 140;

/// Pluggable captcha recognizer. The solver only depends on this surface,
/// so the backend can be swapped without touching the login flow.
pub trait Ocr {
    async fn classify(&self, png: &[u8]) -> Result<String>;
}

/// Client for a local OCR service (e.g. a ddddocr sidecar): POST the PNG
/// bytes, read the recognized text back.
pub struct HttpOcr {
    client: reqwest::Client,
    url: String,
}

impl HttpOcr {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Ocr for HttpOcr {
    async fn classify(&self, png: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/octet-stream")
            .body(png.to_vec())
            .send()
            .await
            .context("ocr request failed")?;

        let status = response.status();
        let body = response.text().await.context("ocr response unreadable")?;
        if !status.is_success() {
            anyhow::bail!("ocr service returned {status}: {body}");
        }

        // Either a bare string or {"result": "..."} depending on the service
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(result) = value.get("result").and_then(|v| v.as_str()) {
                return Ok(result.to_string());
            }
        }
        Ok(body.trim().to_string())
    }
}

/// Grayscale, boost contrast, binarize. Returns the processed image as PNG.
pub fn preprocess(png: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(png).context("failed to decode captcha image")?;
    let gray: GrayImage = img.to_luma8();
    let boosted = image::imageops::contrast(&gray, CONTRAST_BOOST);
    let binary = threshold(&boosted, BINARIZE_THRESHOLD, ThresholdType::Binary);

    let mut out = Vec::new();
    DynamicImage::ImageLuma8(binary)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .context("failed to encode processed captcha")?;
    Ok(out)
}

/// Strip non-alphanumeric noise; accept only exact 4-character results.
fn normalize(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    (cleaned.len() == CAPTCHA_LEN).then_some(cleaned)
}

/// Best-effort recognition of one captcha image. `None` is a normal,
/// retryable condition (caller refreshes the captcha and tries again),
/// never a fault: recognizer errors are logged and mapped to no-result.
pub async fn solve<O: Ocr>(ocr: &O, png: &[u8], debug_dir: Option<&Path>) -> Option<String> {
    let processed = match preprocess(png) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("captcha preprocessing failed, using raw image: {e:#}");
            png.to_vec()
        }
    };

    if let Some(dir) = debug_dir {
        save_debug_image(dir, &processed);
    }

    let raw = match ocr.classify(&processed).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("captcha recognition failed: {e:#}");
            return None;
        }
    };

    match normalize(&raw) {
        Some(text) => {
            tracing::info!("captcha recognized: {text}");
            Some(text)
        }
        None => {
            tracing::info!("captcha result rejected: {raw:?}");
            None
        }
    }
}

fn save_debug_image(dir: &Path, png: &[u8]) {
    let filename = format!(
        "captcha_{}.png",
        chrono::Local::now().format("%Y%m%d_%H%M%S%3f")
    );
    let path = dir.join(filename);
    if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, png)) {
        tracing::warn!("failed to save captcha debug image {}: {e}", path.display());
    }
}
