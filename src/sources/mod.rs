//! Per-site adapters and the registry that picks one for a URL.

pub mod novelbin;
pub mod noveloon;
pub mod woopread;

pub use novelbin::NovelbinSource;
pub use noveloon::NoveloonSource;
pub use woopread::WoopreadSource;

use async_trait::async_trait;
use log::debug;
use scraper::{ElementRef, Html};
use url::Url;

use crate::browser::{Connection, Page};
use crate::config::ScrapingOptions;
use crate::error::{Error, Result, Stage};
use crate::models::ChapterSkeleton;
use crate::utils::selector;

/// Capability set every supported site provides.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apex domains this adapter handles.
    fn hostnames(&self) -> &'static [&'static str];

    fn matches(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| self.hostnames().contains(&apex_domain(host).as_str()))
            .unwrap_or(false)
    }

    /// Opens the novel's landing page. Must be called before anything else.
    async fn initialize(
        &mut self,
        url: &str,
        connection: &dyn Connection,
        options: &ScrapingOptions,
    ) -> Result<()>;

    async fn title(&self) -> Result<String>;

    async fn author(&self) -> Result<String>;

    async fn cover_image_url(&self) -> Result<String>;

    /// Every chapter in reading order, indexed `0..n`.
    async fn list_chapters(&mut self) -> Result<Vec<ChapterSkeleton>>;

    /// Raw inner markup of the chapter's content region, loaded in `page`.
    async fn fetch_chapter_markup(
        &self,
        page: &mut dyn Page,
        skeleton: &ChapterSkeleton,
    ) -> Result<String>;
}

/// All adapters in match priority order.
pub fn registry() -> Vec<Box<dyn Source>> {
    vec![
        Box::new(WoopreadSource::new()),
        Box::new(NoveloonSource::new()),
        Box::new(NovelbinSource::new()),
    ]
}

/// Returns a fresh, uninitialized adapter for `url`. First match wins.
pub fn resolve(url: &str) -> Result<Box<dyn Source>> {
    let parsed = Url::parse(url).map_err(|_| Error::SourceNotFound {
        url: url.to_string(),
    })?;

    registry()
        .into_iter()
        .find(|source| source.matches(&parsed))
        .ok_or_else(|| Error::SourceNotFound {
            url: url.to_string(),
        })
}

/// Last two labels of a host name, lowercased: `www.Example.com` -> `example.com`.
pub fn apex_domain(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    labels[labels.len() - 2..].join(".")
}

/// Navigates `page` to `url` and returns the inner markup of the first element
/// matching any of `targets`, tried in order.
pub async fn scrape_page_html(page: &mut dyn Page, url: &str, targets: &[&str]) -> Result<String> {
    page.goto(url).await?;
    let document = Html::parse_document(page.document());
    for css in targets {
        let sel = selector(css)?;
        if let Some(region) = document.select(&sel).next() {
            return Ok(region.inner_html());
        }
    }
    debug!("none of {:?} found on {}", targets, url);
    Err(Error::extraction(Stage::ChapterContent, url))
}

/// The landing page an adapter was initialized with. The first document is
/// kept so metadata reads still work after the tab moved on to list chapters.
pub struct LandingPage {
    pub url: String,
    pub document: String,
    pub page: Box<dyn Page>,
}

impl LandingPage {
    pub async fn open(url: &str, connection: &dyn Connection) -> Result<Self> {
        let mut page = connection.new_page().await?;
        page.goto(url).await?;
        let document = page.document().to_string();
        Ok(Self {
            url: url.to_string(),
            document,
            page,
        })
    }

    pub fn meta(&self, property: &str, stage: Stage) -> Result<String> {
        meta_content(&self.document, property)
            .ok_or_else(|| Error::extraction(stage, &self.url))
    }

    pub fn text(&self, css: &str, stage: Stage) -> Result<String> {
        let sel = selector(css)?;
        Html::parse_document(&self.document)
            .select(&sel)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::extraction(stage, &self.url))
    }
}

pub(crate) fn not_initialized(name: &str) -> Error {
    Error::invalid_input(format!("{} source used before initialize", name))
}

pub fn meta_content(document: &str, property: &str) -> Option<String> {
    let sel = selector(&format!(r#"meta[property="{}"]"#, property)).ok()?;
    Html::parse_document(document)
        .select(&sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collects `(title, absolute url)` pairs for every link matching `link_css`.
/// `title_css` picks a child element for the title, otherwise the link's
/// `title` attribute or text is used. Links without a title or href are skipped.
pub fn collect_links(
    document: &str,
    base_url: &str,
    link_css: &str,
    title_css: Option<&str>,
) -> Result<Vec<(String, String)>> {
    let link_sel = selector(link_css)?;
    let title_sel = title_css.map(selector).transpose()?;
    let base = Url::parse(base_url).ok();
    let html = Html::parse_document(document);

    let links = html
        .select(&link_sel)
        .filter_map(|link| {
            let title = match &title_sel {
                Some(sel) => link.select(sel).next().map(element_text),
                None => link
                    .value()
                    .attr("title")
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .or_else(|| Some(element_text(link))),
            }?;
            let href = link.value().attr("href")?.trim();
            let url = match &base {
                Some(base) => base.join(href).ok()?.to_string(),
                None => href.to_string(),
            };
            if title.is_empty() || href.is_empty() {
                return None;
            }
            Some((title, url))
        })
        .collect();

    Ok(links)
}

/// Numbers chapters `0..n` in the order given.
pub fn into_skeletons(links: Vec<(String, String)>) -> Vec<ChapterSkeleton> {
    links
        .into_iter()
        .enumerate()
        .map(|(i, (title, url))| ChapterSkeleton {
            index: i as u32,
            title,
            url,
        })
        .collect()
}
