//! Staging layout, package assembly and reopening of finished archives.

pub mod compression;
pub mod xhtml;

pub use compression::EpubCompressor;

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use scraper::Html;

use crate::error::{Error, Result};
use crate::models::Webnovel;
use crate::utils::{sanitize_filename, selector, validate_url};

pub const MIMETYPE: &str = "application/epub+zip";
pub const META_INF_DIR: &str = "META-INF";
pub const CONTENT_DIR: &str = "OEBPS";
pub const TEXT_DIR: &str = "Text";
pub const IMAGE_DIR: &str = "Images";
pub const FONT_DIR: &str = "Fonts";
pub const OPF_FILE: &str = "content.opf";
pub const SNAPSHOT_FILE: &str = "wte.json";
pub const SNAPSHOT_ID: &str = "wte-snapshot";
pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// Creates the working layout under `path`, which must not exist yet.
pub fn create_staging(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(Error::ArchiveWrite {
            path: path.to_path_buf(),
            reason: "staging directory already exists".to_string(),
        });
    }
    ensure_layout(path)
}

fn ensure_layout(path: &Path) -> Result<()> {
    fs::create_dir_all(path.join(META_INF_DIR))?;
    let content = path.join(CONTENT_DIR);
    for dir in [FONT_DIR, IMAGE_DIR, TEXT_DIR] {
        fs::create_dir_all(content.join(dir))?;
    }
    Ok(())
}

/// Removes `path` recursively. A path that does not exist is not an error.
pub fn clear_staging(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// An unused path inside the system temp directory.
pub fn scratch_path() -> PathBuf {
    std::env::temp_dir().join(format!("webnovel-fetch-{}", uuid::Uuid::new_v4()))
}

/// A staging directory that is removed when the guard goes out of scope,
/// whether the run succeeded or not.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        create_staging(&path)?;
        Ok(Self { path })
    }

    /// A fresh staging directory inside the system temp directory.
    pub fn temporary() -> Result<Self> {
        Self::create(scratch_path())
    }

    /// Takes ownership of a directory something else created, e.g. the
    /// extraction target of [`reopen`].
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = clear_staging(&self.path) {
            warn!("could not remove staging directory {}: {}", self.path.display(), e);
        }
    }
}

/// `<sanitized title>.epub`
pub fn epub_file_name(title: &str) -> String {
    let stem = sanitize_filename(title);
    if stem.is_empty() {
        "webnovel.epub".to_string()
    } else {
        format!("{}.epub", stem)
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| Error::ArchiveWrite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes every generated document and the snapshot into `staging`, then packs
/// it into `out`. Chapters are put into reading order first. Images no chapter
/// embeds and staged files the manifest does not list are left out.
pub fn finalize(webnovel: &Webnovel, staging: &Path, out: &Path) -> Result<()> {
    let mut webnovel = webnovel.clone();
    webnovel.normalize();

    let content = staging.join(CONTENT_DIR);
    for chapter in &webnovel.chapters {
        let document = content.join(&chapter.item.path);
        if !document.is_file() {
            return Err(Error::ArchiveWrite {
                path: document,
                reason: format!("chapter '{}' was never written to staging", chapter.title),
            });
        }
    }

    let referenced = referenced_images(&webnovel, &content).map_err(|e| Error::ArchiveWrite {
        path: content.clone(),
        reason: e.to_string(),
    })?;
    webnovel.items.retain(|item| referenced.contains(&item.path));
    prune_unlisted(&webnovel, &content).map_err(|e| Error::ArchiveWrite {
        path: content.clone(),
        reason: e.to_string(),
    })?;

    write_file(&staging.join(META_INF_DIR).join("container.xml"), &xhtml::container_xml())?;
    write_file(&content.join(OPF_FILE), &xhtml::content_opf(&webnovel))?;
    write_file(&content.join("toc.ncx"), &xhtml::toc_ncx(&webnovel))?;
    write_file(&content.join("toc.xhtml"), &xhtml::toc_xhtml(&webnovel))?;
    write_file(&content.join(SNAPSHOT_FILE), &serde_json::to_string_pretty(&webnovel)?)?;

    EpubCompressor::new()
        .compress(staging, out)
        .map_err(|e| Error::ArchiveWrite {
            path: out.to_path_buf(),
            reason: e.to_string(),
        })?;

    info!(
        "wrote {} ({} chapters, {} images)",
        out.display(),
        webnovel.chapters.len(),
        webnovel.items.len()
    );
    Ok(())
}

/// Content-relative paths of every image some chapter document embeds.
fn referenced_images(webnovel: &Webnovel, content: &Path) -> Result<HashSet<String>> {
    let img = selector("img[src]")?;
    let mut referenced = HashSet::new();
    for chapter in &webnovel.chapters {
        let document = fs::read_to_string(content.join(&chapter.item.path))?;
        let html = Html::parse_document(&document);
        // chapter documents live one level below the content root
        let paths = html
            .select(&img)
            .filter_map(|e| e.value().attr("src"))
            .filter_map(|src| src.strip_prefix("../"));
        referenced.extend(paths.map(str::to_string));
    }
    Ok(referenced)
}

/// Deletes staged chapter and image files that nothing in `webnovel` lists.
fn prune_unlisted(webnovel: &Webnovel, content: &Path) -> Result<()> {
    let listed: HashSet<&str> = webnovel
        .chapters
        .iter()
        .map(|c| &c.item)
        .chain(webnovel.items.iter())
        .chain(webnovel.metadata.cover_image.iter())
        .map(|item| item.path.as_str())
        .collect();

    for dir in [TEXT_DIR, IMAGE_DIR] {
        let entries = match fs::read_dir(content.join(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = format!("{}/{}", dir, entry.file_name().to_string_lossy());
            if entry.file_type()?.is_file() && !listed.contains(path.as_str()) {
                debug!("dropping unlisted {}", path);
                fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

/// Extracts a previously finalized archive into `extract_to` and reads back
/// its embedded snapshot.
pub fn reopen(path: &Path, extract_to: &Path) -> Result<Webnovel> {
    let invalid = |reason: String| Error::InvalidArchive {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;
    archive
        .extract(extract_to)
        .map_err(|e| invalid(format!("extraction failed: {}", e)))?;

    let snapshot = extract_to.join(CONTENT_DIR).join(SNAPSHOT_FILE);
    if !snapshot.is_file() {
        return Err(invalid(format!("no {} entry", SNAPSHOT_FILE)));
    }
    let text = fs::read_to_string(&snapshot).map_err(|e| invalid(e.to_string()))?;
    let webnovel: Webnovel =
        serde_json::from_str(&text).map_err(|e| invalid(format!("malformed snapshot: {}", e)))?;

    validate_snapshot(&webnovel, &extract_to.join(CONTENT_DIR)).map_err(invalid)?;
    ensure_layout(extract_to)?;

    debug!("reopened {} with {} chapters", path.display(), webnovel.chapters.len());
    Ok(webnovel)
}

fn check_path(path: &str) -> std::result::Result<(), String> {
    let escapes = path.starts_with('/') || path.split('/').any(|part| part == "..");
    if path.is_empty() || escapes {
        return Err(format!("item path '{}' is not inside the package", path));
    }
    Ok(())
}

fn validate_snapshot(webnovel: &Webnovel, content: &Path) -> std::result::Result<(), String> {
    if webnovel.metadata.title.trim().is_empty() {
        return Err("snapshot has an empty title".to_string());
    }

    let mut ids = HashSet::new();
    let mut items = webnovel.items.iter().chain(webnovel.metadata.cover_image.iter());
    if let Some(item) = items.find(|item| check_path(&item.path).is_err() || !ids.insert(item.id)) {
        return Err(format!("item {} is invalid or duplicated", item.id));
    }

    for chapter in &webnovel.chapters {
        validate_url(&chapter.url).map_err(|e| e.to_string())?;
        check_path(&chapter.item.path)?;
        if !ids.insert(chapter.item.id) {
            return Err(format!("duplicate id {}", chapter.item.id));
        }
        if !content.join(&chapter.item.path).is_file() {
            return Err(format!("chapter document {} is missing", chapter.item.path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_layout_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage");
        {
            let staging = StagingDir::create(&path).unwrap();
            for sub in ["META-INF", "OEBPS/Fonts", "OEBPS/Images", "OEBPS/Text"] {
                assert!(staging.path().join(sub).is_dir(), "{} missing", sub);
            }
            assert!(matches!(create_staging(&path), Err(Error::ArchiveWrite { .. })));
        }
        assert!(!path.exists());
    }

    #[test]
    fn clearing_a_missing_path_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        clear_staging(&dir.path().join("never-created")).unwrap();
    }

    #[test]
    fn unsafe_item_paths_are_rejected() {
        assert!(check_path("Text/a.xhtml").is_ok());
        assert!(check_path("../outside.xhtml").is_err());
        assert!(check_path("/etc/passwd").is_err());
        assert!(check_path("").is_err());
    }

    #[test]
    fn file_name_falls_back_for_empty_titles() {
        assert_eq!(epub_file_name("Lord of Mysteries"), "lord-of-mysteries.epub");
        assert_eq!(epub_file_name("???"), "webnovel.epub");
    }
}
