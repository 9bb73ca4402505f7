use log::warn;

use crate::error::{Error, Result};
use crate::models::{Metadata, Webnovel};

/// Merges scraped fragments into one work.
///
/// Title, author and cover come from `webnovels[keep_metadata_from]`, or from
/// the first fragment when that index is out of range. Other covers are left
/// behind. Every fragment gets its own run of bands after the previous one's,
/// so all of A's chapters sort before all of B's while each keeps its internal
/// order. `source_urls` stays aligned with the bands.
pub fn combine(webnovels: Vec<Webnovel>, keep_metadata_from: usize) -> Result<Webnovel> {
    if webnovels.is_empty() {
        return Err(Error::NothingScraped);
    }
    let keep = if keep_metadata_from < webnovels.len() {
        keep_metadata_from
    } else {
        warn!(
            "metadata index {} out of range for {} sources, using the first",
            keep_metadata_from,
            webnovels.len()
        );
        0
    };

    let kept = &webnovels[keep].metadata;
    let mut metadata = Metadata {
        title: kept.title.clone(),
        author: kept.author.clone(),
        cover_image: kept.cover_image.clone(),
        cover_url: kept.cover_url.clone(),
        id: kept.id,
        source_urls: Vec::new(),
    };
    let mut combined_chapters = Vec::new();
    let mut combined_items = Vec::new();
    let mut band_offset = 0u32;

    for webnovel in webnovels {
        let Webnovel {
            metadata: fragment,
            chapters,
            items,
        } = webnovel;

        let used_bands = chapters.iter().map(|c| c.index.band + 1).max().unwrap_or(0);
        let bands = (fragment.source_urls.len() as u32).max(used_bands).max(1);

        for mut chapter in chapters {
            chapter.index.band += band_offset;
            combined_chapters.push(chapter);
        }
        combined_items.extend(items);

        metadata.source_urls.extend(fragment.source_urls);
        band_offset += bands;
        metadata.source_urls.resize(band_offset as usize, String::new());
    }

    let mut combined = Webnovel {
        metadata,
        chapters: combined_chapters,
        items: combined_items,
    };
    combined.normalize();
    Ok(combined)
}
