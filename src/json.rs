//! Flat JSON snapshot of a webnovel, for hand editing or later archiving.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use scraper::Html;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ParsingType;
use crate::crawler::sanitizer;
use crate::epub::{xhtml, CONTENT_DIR, TEXT_DIR, XHTML_MEDIA_TYPE};
use crate::error::{Error, Result};
use crate::models::{ArchiveItem, ChapterArchiveItem, ChapterIndex, Metadata, Webnovel};
use crate::utils::{sanitize_filename, selector, validate_url};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatChapter {
    pub title: String,
    pub url: String,
    pub content: String,
    pub has_been_scraped: bool,
    pub has_been_parsed: bool,
    /// Which entry of `source_urls` the chapter came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<u32>,
    /// Native index within that source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatWebnovel {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
    pub chapters: Vec<FlatChapter>,
}

impl FlatWebnovel {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::invalid_input("webnovel title must not be empty"));
        }
        let bands = self.source_urls.len().max(1);
        for (i, chapter) in self.chapters.iter().enumerate() {
            validate_url(&chapter.url)
                .map_err(|e| Error::invalid_input(format!("chapter {}: {}", i, e)))?;
            if let Some(band) = chapter.band.filter(|b| *b as usize >= bands) {
                return Err(Error::invalid_input(format!(
                    "chapter {}: band {} but only {} sources",
                    i, band, bands
                )));
            }
        }
        if let Some(cover) = &self.cover_image_url {
            validate_url(cover)?;
        }
        Ok(())
    }
}

/// Flattens `webnovel`, reading each chapter body back from `staging`.
pub fn export(webnovel: &Webnovel, staging: &Path) -> Result<FlatWebnovel> {
    let content_sel = selector("div.chapter-content")?;
    let content_dir = staging.join(CONTENT_DIR);

    let mut chapters = Vec::with_capacity(webnovel.chapters.len());
    for chapter in &webnovel.chapters {
        let document = fs::read_to_string(content_dir.join(&chapter.item.path))?;
        let body = Html::parse_document(&document)
            .select(&content_sel)
            .next()
            .map(|div| div.inner_html().trim().to_string())
            .unwrap_or_default();

        chapters.push(FlatChapter {
            title: chapter.title.clone(),
            url: chapter.url.clone(),
            content: body,
            has_been_scraped: true,
            has_been_parsed: true,
            band: Some(chapter.index.band),
            position: Some(chapter.index.position),
        });
    }

    Ok(FlatWebnovel {
        title: webnovel.metadata.title.clone(),
        author: webnovel.metadata.author.clone(),
        cover_image_url: webnovel.metadata.cover_url.clone(),
        source_urls: webnovel.metadata.source_urls.clone(),
        chapters,
    })
}

/// Writes `<sanitized title>.json` into `dir` and returns its path.
pub fn write_json(flat: &FlatWebnovel, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stem = sanitize_filename(&flat.title);
    let name = if stem.is_empty() { "webnovel".to_string() } else { stem };
    let path = dir.join(format!("{}.json", name));
    fs::write(&path, serde_json::to_string_pretty(flat)?)?;
    info!("wrote {}", path.display());
    Ok(path)
}

pub fn read_json(path: &Path) -> Result<FlatWebnovel> {
    let text = fs::read_to_string(path)?;
    let flat: FlatWebnovel = serde_json::from_str(&text)
        .map_err(|e| Error::invalid_input(format!("{}: {}", path.display(), e)))?;
    flat.validate()?;
    Ok(flat)
}

/// Stages the scraped chapters of `flat` as documents and returns the
/// webnovel describing them. The cover is left for the caller to capture.
pub fn import(flat: &FlatWebnovel, staging: &Path) -> Result<Webnovel> {
    flat.validate()?;

    let mut metadata = Metadata {
        title: flat.title.clone(),
        author: flat.author.clone(),
        cover_image: None,
        cover_url: flat.cover_image_url.clone(),
        id: Uuid::new_v4(),
        source_urls: flat.source_urls.clone(),
    };
    if metadata.source_urls.is_empty() {
        metadata.source_urls.push(String::new());
    }
    let mut webnovel = Webnovel::new(metadata);

    // images referenced by the snapshot were never downloaded
    let no_images = HashMap::new();
    let text_dir = staging.join(CONTENT_DIR);
    for (position, chapter) in flat.chapters.iter().enumerate() {
        if !chapter.has_been_scraped {
            warn!("skipping unscraped chapter {}", chapter.url);
            continue;
        }
        let markup = sanitizer::clean(&chapter.content, ParsingType::WithFormat, &no_images);

        let id = Uuid::new_v4();
        let path = format!("{}/{}.xhtml", TEXT_DIR, id);
        fs::write(text_dir.join(&path), xhtml::chapter_document(&chapter.title, &markup))?;

        webnovel.chapters.push(ChapterArchiveItem {
            item: ArchiveItem {
                id,
                path,
                media_type: XHTML_MEDIA_TYPE.to_string(),
            },
            index: ChapterIndex::new(
                chapter.band.unwrap_or(0),
                chapter.position.unwrap_or(position as u32),
            ),
            title: chapter.title.clone(),
            url: chapter.url.clone(),
        });
    }

    webnovel.normalize();
    Ok(webnovel)
}
