use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use log::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::ScrapeContext;
use crate::browser::{NetworkResponse, Page};
use crate::config::ImageOptions;
use crate::epub::IMAGE_DIR;
use crate::error::{Error, Result};
use crate::models::ArchiveItem;

/// How a capture window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// Every requested image arrived.
    Complete,
    /// The window closed with images still pending.
    TimedOut,
}

/// Captures images out of a page's network traffic and recompresses them
/// into the staging area.
pub struct ImageDownloader {
    images_dir: PathBuf,
    timeout: Duration,
    options: ImageOptions,
}

impl ImageDownloader {
    pub fn new(ctx: &ScrapeContext) -> Self {
        Self {
            images_dir: ctx.content_dir().join(IMAGE_DIR),
            timeout: ctx.scraping.timeout(),
            options: ctx.images.clone(),
        }
    }

    /// Navigates `page` to `origin_url` and keeps every response whose URL is
    /// one of `targets`. Returns a map from each target, as given, to its
    /// archived copy. Targets that never arrive inside the timeout window are
    /// simply missing from the map.
    ///
    /// Relative targets resolve against `origin_url` until navigation settles,
    /// then against wherever the page ended up after redirects.
    pub async fn capture(
        &self,
        page: &mut dyn Page,
        origin_url: &str,
        targets: &[String],
    ) -> Result<HashMap<String, ArchiveItem>> {
        let mut captured = HashMap::new();
        let mut pending = pending_targets(Url::parse(origin_url).ok().as_ref(), targets, &captured);
        if pending.is_empty() {
            return Ok(captured);
        }
        fs::create_dir_all(&self.images_dir)?;

        let mut responses = page.listen();
        let navigation = async {
            let result = page.goto(origin_url).await;
            (result, page.url().to_string())
        };
        tokio::pin!(navigation);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut navigating = true;
        let mut listening = true;
        // responses that matched nothing while the final URL was unknown
        let mut unmatched: Vec<NetworkResponse> = Vec::new();

        // Whichever of "nothing pending" and "deadline" comes first ends the
        // loop; the other is never observed.
        let end = loop {
            tokio::select! {
                (result, final_url) = &mut navigation, if navigating => {
                    navigating = false;
                    match result {
                        Err(e) => warn!("navigation for image capture failed: {}", e),
                        Ok(()) if final_url != origin_url => {
                            if let Ok(base) = Url::parse(&final_url) {
                                debug!("{} redirected to {}", origin_url, final_url);
                                pending = pending_targets(Some(&base), targets, &captured);
                            }
                        }
                        Ok(()) => {}
                    }
                    for response in std::mem::take(&mut unmatched) {
                        self.accept(response, &mut pending, &mut captured).await;
                    }
                    if pending.is_empty() {
                        break CaptureEnd::Complete;
                    }
                }
                response = responses.recv(), if listening => {
                    let Some(response) = response else {
                        listening = false;
                        continue;
                    };
                    if let Some(response) = self.accept(response, &mut pending, &mut captured).await {
                        if navigating {
                            unmatched.push(response);
                        }
                        continue;
                    }
                    if pending.is_empty() {
                        break CaptureEnd::Complete;
                    }
                }
                _ = &mut deadline => break CaptureEnd::TimedOut,
            }
        };

        debug!(
            "image capture on {} ended {:?}: {} captured, {} missing",
            origin_url,
            end,
            captured.len(),
            pending.len()
        );
        Ok(captured)
    }

    /// Stores `response` if some target is waiting for it. Hands the response
    /// back when it matched nothing.
    async fn accept(
        &self,
        response: NetworkResponse,
        pending: &mut HashMap<String, Vec<String>>,
        captured: &mut HashMap<String, ArchiveItem>,
    ) -> Option<NetworkResponse> {
        let key = absolute(None, &response.url);
        let Some(originals) = pending.remove(&key) else {
            return Some(response);
        };
        match self.store(response.body).await {
            Ok(item) => {
                for original in originals {
                    captured.insert(original, item.clone());
                }
            }
            Err(e) => {
                warn!("could not process image {}: {}", key, e);
                pending.insert(key, originals);
            }
        }
        None
    }

    /// Recompresses `body` and writes it under a fresh UUID name.
    async fn store(&self, body: Vec<u8>) -> Result<ArchiveItem> {
        let options = self.options.clone();
        let encoded = tokio::task::spawn_blocking(move || recompress(&body, &options))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        let id = Uuid::new_v4();
        let filename = format!("{}.{}", id, self.options.extension());
        fs::write(self.images_dir.join(&filename), encoded)?;

        Ok(ArchiveItem {
            id,
            path: format!("{}/{}", IMAGE_DIR, filename),
            media_type: self.options.media_type().to_string(),
        })
    }
}

/// Absolute URL -> the targets, as written, that point at it. Targets already
/// captured are left out.
fn pending_targets(
    base: Option<&Url>,
    targets: &[String],
    captured: &HashMap<String, ArchiveItem>,
) -> HashMap<String, Vec<String>> {
    let mut pending: HashMap<String, Vec<String>> = HashMap::new();
    for target in targets.iter().filter(|t| !captured.contains_key(*t)) {
        let originals = pending.entry(absolute(base, target)).or_default();
        if !originals.contains(target) {
            originals.push(target.clone());
        }
    }
    pending
}

/// Normalizes `reference` against `base` so page responses and markup
/// references compare equal.
fn absolute(base: Option<&Url>, reference: &str) -> String {
    let reference = reference.trim();
    let parsed = match base {
        Some(base) => base.join(reference),
        None => Url::parse(reference),
    };
    parsed.map(|u| u.to_string()).unwrap_or_else(|_| reference.to_string())
}

/// Decodes any supported format and re-encodes it as lossless WebP or PNG,
/// shrinking it to fit the configured bounds first when asked to.
pub fn recompress(bytes: &[u8], options: &ImageOptions) -> Result<Vec<u8>> {
    let mut img = image::load_from_memory(bytes)?;

    if options.should_resize && (img.width() > options.max_width || img.height() > options.max_height) {
        img = img.resize(options.max_width, options.max_height, FilterType::Lanczos3);
    }

    let mut buffer = Cursor::new(Vec::new());
    if options.webp {
        let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
        rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buffer))?;
    } else {
        let compression = match options.quality {
            0..=33 => CompressionType::Fast,
            34..=66 => CompressionType::Default,
            _ => CompressionType::Best,
        };
        img.write_with_encoder(PngEncoder::new_with_quality(&mut buffer, compression, PngFilter::Adaptive))?;
    }
    Ok(buffer.into_inner())
}
