//! Generated package documents: container descriptor, chapter pages, the OPF
//! manifest and both navigation documents.

use std::collections::BTreeMap;

use chrono::Utc;

use super::{CONTENT_DIR, OPF_FILE, SNAPSHOT_FILE, SNAPSHOT_ID};
use crate::models::{ArchiveItem, ChapterArchiveItem, Webnovel};
use crate::sources::apex_domain;
use crate::utils::xml_escape;

pub fn container_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="{}/{}" media-type="application/oebps-package+xml"/>
    </rootfiles>
</container>"#,
        CONTENT_DIR, OPF_FILE
    )
}

/// Wraps sanitized chapter markup in a complete XHTML document.
pub fn chapter_document(title: &str, content: &str) -> String {
    let title = xml_escape(title);
    let mut xhtml = String::new();

    xhtml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
    <title>"#);
    xhtml.push_str(&title);
    xhtml.push_str(r#"</title>
    <meta http-equiv="Content-Type" content="text/html; charset=UTF-8"/>
</head>
<body>
    <h1>"#);
    xhtml.push_str(&title);
    xhtml.push_str(r#"</h1>
    <div class="chapter-content">
"#);
    xhtml.push_str(content);
    xhtml.push_str(r#"
    </div>
</body>
</html>"#);

    xhtml
}

fn item_id(item: &ArchiveItem) -> String {
    format!("item-{}", item.id)
}

fn chapter_id(chapter: &ChapterArchiveItem) -> String {
    format!("chapter-{}", chapter.item.id)
}

pub fn content_opf(webnovel: &Webnovel) -> String {
    let metadata = &webnovel.metadata;
    let modified = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

    let mut opf = String::new();
    opf.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
    <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
        <dc:identifier id="book-id">urn:uuid:{}</dc:identifier>
        <dc:title>{}</dc:title>
        <dc:creator id="creator">{}</dc:creator>
        <dc:language>en</dc:language>
        <meta property="dcterms:modified">{}</meta>
"#,
        metadata.id,
        xml_escape(&metadata.title),
        xml_escape(&metadata.author),
        modified
    ));
    for url in metadata.source_urls.iter().filter(|u| !u.is_empty()) {
        opf.push_str(&format!("        <dc:source>{}</dc:source>\n", xml_escape(url)));
    }
    if let Some(cover) = &metadata.cover_image {
        opf.push_str(&format!("        <meta name=\"cover\" content=\"{}\"/>\n", item_id(cover)));
    }
    opf.push_str("    </metadata>\n    <manifest>\n");

    opf.push_str(r#"        <item id="toc" href="toc.xhtml" media-type="application/xhtml+xml" properties="nav"/>
        <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#);
    opf.push_str(&format!(
        "        <item id=\"{}\" href=\"{}\" media-type=\"application/json\"/>\n",
        SNAPSHOT_ID, SNAPSHOT_FILE
    ));
    if let Some(cover) = &metadata.cover_image {
        opf.push_str(&format!(
            "        <item id=\"{}\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\"/>\n",
            item_id(cover),
            xml_escape(&cover.path),
            xml_escape(&cover.media_type)
        ));
    }
    for item in &webnovel.items {
        opf.push_str(&format!(
            "        <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            item_id(item),
            xml_escape(&item.path),
            xml_escape(&item.media_type)
        ));
    }
    for chapter in &webnovel.chapters {
        opf.push_str(&format!(
            "        <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            chapter_id(chapter),
            xml_escape(&chapter.item.path),
            xml_escape(&chapter.item.media_type)
        ));
    }
    opf.push_str("    </manifest>\n");

    opf.push_str("    <spine toc=\"ncx\">\n        <itemref idref=\"toc\"/>\n");
    for chapter in &webnovel.chapters {
        opf.push_str(&format!("        <itemref idref=\"{}\"/>\n", chapter_id(chapter)));
    }
    opf.push_str("    </spine>\n</package>");

    opf
}

/// Chapters grouped by band. Only books built from several sources get one
/// nesting level per source.
fn bands(webnovel: &Webnovel) -> BTreeMap<u32, Vec<&ChapterArchiveItem>> {
    let mut bands: BTreeMap<u32, Vec<&ChapterArchiveItem>> = BTreeMap::new();
    for chapter in &webnovel.chapters {
        bands.entry(chapter.index.band).or_default().push(chapter);
    }
    bands
}

fn band_label(webnovel: &Webnovel, band: u32) -> String {
    webnovel
        .metadata
        .source_urls
        .get(band as usize)
        .and_then(|u| url::Url::parse(u).ok())
        .and_then(|u| u.host_str().map(apex_domain))
        .unwrap_or_else(|| format!("Source {}", band + 1))
}

pub fn toc_ncx(webnovel: &Webnovel) -> String {
    let metadata = &webnovel.metadata;
    let grouped = bands(webnovel);
    let nested = grouped.len() > 1;

    let mut ncx = String::new();
    ncx.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
    <head>
        <meta name="dtb:uid" content="urn:uuid:{}"/>
        <meta name="dtb:depth" content="{}"/>
        <meta name="dtb:totalPageCount" content="0"/>
        <meta name="dtb:maxPageNumber" content="0"/>
    </head>
    <docTitle>
        <text>{}</text>
    </docTitle>
    <docAuthor>
        <text>{}</text>
    </docAuthor>
    <navMap>
"#,
        metadata.id,
        if nested { 2 } else { 1 },
        xml_escape(&metadata.title),
        xml_escape(&metadata.author)
    ));

    if grouped.is_empty() {
        // a navMap needs at least one navPoint
        ncx.push_str(&format!(
            r#"        <navPoint id="nav-contents" playOrder="1">
            <navLabel>
                <text>{}</text>
            </navLabel>
            <content src="toc.xhtml"/>
        </navPoint>
"#,
            xml_escape(&metadata.title)
        ));
    }

    let mut play_order = 1;
    for (band, chapters) in &grouped {
        let indent = if nested { "            " } else { "        " };
        if nested {
            let Some(first) = chapters.first() else {
                continue;
            };
            ncx.push_str(&format!(
                r#"        <navPoint id="band-{}" playOrder="{}">
            <navLabel>
                <text>{}</text>
            </navLabel>
            <content src="{}"/>
"#,
                band,
                play_order,
                xml_escape(&band_label(webnovel, *band)),
                xml_escape(&first.item.path)
            ));
            play_order += 1;
        }

        for chapter in chapters {
            ncx.push_str(&format!(
                r#"{indent}<navPoint id="nav-{}" playOrder="{}">
{indent}    <navLabel>
{indent}        <text>{}</text>
{indent}    </navLabel>
{indent}    <content src="{}"/>
{indent}</navPoint>
"#,
                chapter.item.id,
                play_order,
                xml_escape(&chapter.title),
                xml_escape(&chapter.item.path),
            ));
            play_order += 1;
        }

        if nested {
            ncx.push_str("        </navPoint>\n");
        }
    }

    ncx.push_str("    </navMap>\n</ncx>");
    ncx
}

pub fn toc_xhtml(webnovel: &Webnovel) -> String {
    let title = xml_escape(&webnovel.metadata.title);
    let mut nav = String::new();
    nav.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="en" xml:lang="en">
<head>
    <title>{}</title>
</head>
<body>
    <nav epub:type="toc" id="toc">
        <h1>{}</h1>
        <ol>
"#,
        title, title
    ));
    if webnovel.chapters.is_empty() {
        nav.push_str(&format!("            <li><a href=\"toc.xhtml\">{}</a></li>\n", title));
    }
    for chapter in &webnovel.chapters {
        nav.push_str(&format!(
            "            <li><a href=\"{}\">{}</a></li>\n",
            xml_escape(&chapter.item.path),
            xml_escape(&chapter.title)
        ));
    }
    nav.push_str("        </ol>\n    </nav>\n</body>\n</html>");
    nav
}
