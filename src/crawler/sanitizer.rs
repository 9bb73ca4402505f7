//! Strips chapter markup down to what belongs in an EPUB content document
//! and localizes the images that survive.

use std::collections::{HashMap, HashSet};

use scraper::{ElementRef, Html, Node};

use super::downloader::ImageDownloader;
use crate::browser::Page;
use crate::config::ParsingType;
use crate::error::Result;
use crate::models::ArchiveItem;

/// Elements removed together with everything inside them.
pub const BANNED_TAGS: &[&str] = &[
    "script", "video", "audio", "iframe", "input", "button", "form", "canvas", "embed", "figure",
    "search", "select",
];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "hr", "img", "link", "meta", "source", "track", "wbr",
];

/// Raw-text containers the parser never builds a tree for. Their content
/// can't be filtered, so they go entirely.
const OPAQUE_TAGS: &[&str] = &["noscript", "xmp", "noembed", "noframes", "template"];

/// Elements that start a new line when flattening to text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "blockquote", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "pre", "table", "tr", "hr", "header", "footer", "aside", "main", "center", "dd", "dt",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub markup: String,
    /// Images captured for this markup, to be listed in the archive.
    pub items: Vec<ArchiveItem>,
}

/// Cleans `markup` according to `mode`. In [`ParsingType::WithImage`] mode the
/// page is used to capture every distinct image; the other modes never touch it.
pub async fn sanitize(
    markup: &str,
    mode: ParsingType,
    page: &mut dyn Page,
    origin_url: &str,
    downloader: &ImageDownloader,
) -> Result<Sanitized> {
    let mut captured = HashMap::new();
    if mode == ParsingType::WithImage {
        let targets = image_sources(markup);
        if !targets.is_empty() {
            captured = downloader.capture(page, origin_url, &targets).await?;
        }
    }

    let markup = clean(markup, mode, &captured);

    let mut seen = HashSet::new();
    let items = captured
        .into_values()
        .filter(|item| seen.insert(item.id))
        .collect();

    Ok(Sanitized { markup, items })
}

/// Distinct `<img src>` values outside banned elements, in document order.
pub fn image_sources(markup: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(markup);
    let mut sources = Vec::new();
    collect_images(fragment.root_element(), &mut sources);

    let mut seen = HashSet::new();
    sources.retain(|s| seen.insert(s.clone()));
    sources
}

fn collect_images(parent: ElementRef<'_>, out: &mut Vec<String>) {
    for element in parent.children().filter_map(ElementRef::wrap) {
        let name = element.value().name();
        if BANNED_TAGS.contains(&name) || OPAQUE_TAGS.contains(&name) {
            continue;
        }
        if name == "img" {
            if let Some(src) = element.value().attr("src").map(str::trim).filter(|s| !s.is_empty()) {
                out.push(src.to_string());
            }
        }
        collect_images(element, out);
    }
}

/// The synchronous half of [`sanitize`]: `images` maps original `src` values
/// to captured items. Images missing from the map are dropped.
pub fn clean(markup: &str, mode: ParsingType, images: &HashMap<String, ArchiveItem>) -> String {
    let fragment = Html::parse_fragment(markup);
    let root = fragment.root_element();

    match mode {
        ParsingType::TextOnly => {
            let mut text = String::new();
            collect_text(root, &mut text);
            text.lines()
                .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|line| !line.is_empty())
                .map(|line| format!("<p>{}</p>", escape_text(&line)))
                .collect::<Vec<_>>()
                .join("\n")
        }
        _ => {
            let mut out = String::with_capacity(markup.len());
            let writer = XhtmlWriter {
                keep_images: mode == ParsingType::WithImage,
                images,
            };
            writer.children(root, &mut out);
            out
        }
    }
}

struct XhtmlWriter<'a> {
    keep_images: bool,
    images: &'a HashMap<String, ArchiveItem>,
}

impl XhtmlWriter<'_> {
    fn children(&self, parent: ElementRef<'_>, out: &mut String) {
        let style = parent.value().name() == "style";
        for child in parent.children() {
            match child.value() {
                Node::Text(text) if style => out.push_str(&style_text(text)),
                Node::Text(text) => out.push_str(&escape_text(text)),
                Node::Element(_) => {
                    if let Some(element) = ElementRef::wrap(child) {
                        self.element(element, out);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&self, element: ElementRef<'_>, out: &mut String) {
        let name = element.value().name();
        if BANNED_TAGS.contains(&name) || OPAQUE_TAGS.contains(&name) {
            return;
        }

        let mut attrs: Vec<(&str, String)> = element
            .value()
            .attrs()
            .filter(|(attr, value)| keep_attribute(attr, value))
            .map(|(attr, value)| (attr, value.to_string()))
            .collect();

        if name == "img" {
            if !self.keep_images {
                return;
            }
            let local = element
                .value()
                .attr("src")
                .and_then(|src| self.images.get(src.trim()));
            let Some(item) = local else {
                return;
            };
            for (attr, value) in attrs.iter_mut() {
                if *attr == "src" {
                    *value = format!("../{}", item.path);
                }
            }
        }
        attrs.sort_by(|a, b| a.0.cmp(b.0));

        out.push('<');
        out.push_str(name);
        for (attr, value) in &attrs {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            out.push_str(&escape_attribute(value));
            out.push('"');
        }

        if VOID_TAGS.contains(&name) {
            out.push_str("/>");
            return;
        }
        out.push('>');
        self.children(element, out);
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
}

fn keep_attribute(name: &str, value: &str) -> bool {
    let mut chars = name.chars();
    let well_formed = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || "-_.:".contains(c));
    if !well_formed || name.to_ascii_lowercase().starts_with("on") {
        return false;
    }

    let links = matches!(name, "href" | "src" | "action" | "xlink:href");
    !(links && value.trim().to_ascii_lowercase().starts_with("javascript:"))
}

fn collect_text(parent: ElementRef<'_>, out: &mut String) {
    for child in parent.children() {
        if let Node::Text(text) = child.value() {
            out.push_str(text);
            continue;
        }
        let Some(element) = ElementRef::wrap(child) else {
            continue;
        };

        let name = element.value().name();
        let skipped = BANNED_TAGS.contains(&name) || OPAQUE_TAGS.contains(&name);
        if skipped || matches!(name, "style" | "img") {
            continue;
        }
        if name == "br" {
            out.push('\n');
            continue;
        }
        let block = BLOCK_TAGS.contains(&name);
        if block {
            out.push('\n');
        }
        collect_text(element, out);
        if block {
            out.push('\n');
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";
const CDATA_SPLIT: &str = "]]]]><![CDATA[>";

/// Stylesheet text as XML character data. Text that would not parse as XML
/// goes into a CDATA section; a section written earlier is unwrapped first so
/// cleaning stays stable.
fn style_text(text: &str) -> String {
    let css = text
        .strip_prefix(CDATA_OPEN)
        .and_then(|t| t.strip_suffix(CDATA_CLOSE))
        .map(|t| t.replace(CDATA_SPLIT, CDATA_CLOSE))
        .unwrap_or_else(|| text.to_string());

    if css.contains(['<', '&']) || css.contains(CDATA_CLOSE) {
        format!("{}{}{}", CDATA_OPEN, css.replace(CDATA_CLOSE, CDATA_SPLIT), CDATA_CLOSE)
    } else {
        css
    }
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
