use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chapter as listed by a source, before its content is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSkeleton {
    pub index: u32,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub skeleton: ChapterSkeleton,
    pub content: String,
}

impl Chapter {
    pub fn new(skeleton: ChapterSkeleton, content: String) -> Self {
        Self { skeleton, content }
    }
}

/// Reading-order key of an archived chapter.
///
/// `band` is the position of the contributing source in `Metadata::source_urls`,
/// `position` the chapter's native index within that source. Ordering is
/// lexicographic, so every chapter of band 0 precedes every chapter of band 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChapterIndex {
    pub band: u32,
    pub position: u32,
}

impl ChapterIndex {
    pub fn new(band: u32, position: u32) -> Self {
        Self { band, position }
    }
}

/// Any file embedded in the package, relative to the content root (`OEBPS/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveItem {
    pub id: Uuid,
    pub path: String,
    pub media_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterArchiveItem {
    #[serde(flatten)]
    pub item: ArchiveItem,
    pub index: ChapterIndex,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub author: String,
    pub cover_image: Option<ArchiveItem>,
    /// Where the cover was downloaded from, kept for JSON export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    pub id: Uuid,
    pub source_urls: Vec<String>,
}

impl Metadata {
    pub fn new(title: String, author: String, source_url: String) -> Self {
        Self {
            title,
            author,
            cover_image: None,
            cover_url: None,
            id: Uuid::new_v4(),
            source_urls: vec![source_url],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webnovel {
    pub metadata: Metadata,
    pub chapters: Vec<ChapterArchiveItem>,
    pub items: Vec<ArchiveItem>,
}

impl Webnovel {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            chapters: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Sorts chapters into reading order and drops later duplicates of a URL.
    ///
    /// The sort is stable: chapters sharing an index keep insertion order.
    pub fn normalize(&mut self) {
        self.chapters.sort_by_key(|c| c.index);
        let mut seen = HashSet::new();
        self.chapters.retain(|c| seen.insert(c.url.clone()));
    }

    pub fn chapter_urls(&self) -> HashSet<&str> {
        self.chapters.iter().map(|c| c.url.as_str()).collect()
    }
}
