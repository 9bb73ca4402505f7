use std::collections::HashSet;

use async_trait::async_trait;
use log::debug;
use scraper::Html;
use url::Url;

use super::{LandingPage, Source, collect_links, into_skeletons, not_initialized, scrape_page_html};
use crate::browser::{Connection, Page};
use crate::config::ScrapingOptions;
use crate::error::{Error, Result, Stage};
use crate::models::ChapterSkeleton;
use crate::utils::selector;

const CHAPTER_LINKS: &str = "main div div:nth-of-type(2) div ul li a";
const NEXT_TOC_PAGE: &str = "main div div:nth-of-type(2) div div nav a:nth-child(3)";
const CONTENT: &[&str] = &["main div article"];

/// noveloon.com: the table of contents is paginated.
#[derive(Default)]
pub struct NoveloonSource {
    landing: Option<LandingPage>,
}

impl NoveloonSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn landing(&self) -> Result<&LandingPage> {
        self.landing.as_ref().ok_or_else(|| not_initialized(self.name()))
    }
}

fn next_toc_page(document: &str, base: &str) -> Result<Option<String>> {
    let sel = selector(NEXT_TOC_PAGE)?;
    let href = Html::parse_document(document)
        .select(&sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());

    Ok(href.and_then(|h| Url::parse(base).ok()?.join(&h).ok().map(|u| u.to_string())))
}

#[async_trait]
impl Source for NoveloonSource {
    fn name(&self) -> &'static str {
        "noveloon"
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["noveloon.com"]
    }

    async fn initialize(
        &mut self,
        url: &str,
        connection: &dyn Connection,
        _options: &ScrapingOptions,
    ) -> Result<()> {
        self.landing = Some(LandingPage::open(url, connection).await?);
        Ok(())
    }

    async fn title(&self) -> Result<String> {
        self.landing()?.meta("og:novel:novel_name", Stage::Title)
    }

    async fn author(&self) -> Result<String> {
        self.landing()?.meta("og:novel:author", Stage::Author)
    }

    async fn cover_image_url(&self) -> Result<String> {
        self.landing()?.meta("og:image", Stage::CoverImage)
    }

    async fn list_chapters(&mut self) -> Result<Vec<ChapterSkeleton>> {
        let name = self.name();
        let landing = self.landing.as_mut().ok_or_else(|| not_initialized(name))?;

        landing.page.goto(&landing.url).await?;
        let mut visited = HashSet::from([landing.page.url().to_string()]);
        let mut links = Vec::new();

        loop {
            let page_links =
                collect_links(landing.page.document(), landing.page.url(), CHAPTER_LINKS, Some("h3"))?;
            debug!("{} chapters on toc page {}", page_links.len(), landing.page.url());
            links.extend(page_links);

            match next_toc_page(landing.page.document(), landing.page.url())? {
                Some(next) if visited.insert(next.clone()) => landing.page.goto(&next).await?,
                _ => break,
            }
        }

        if links.is_empty() {
            return Err(Error::extraction(Stage::ChapterList, &landing.url));
        }
        Ok(into_skeletons(links))
    }

    async fn fetch_chapter_markup(
        &self,
        page: &mut dyn Page,
        skeleton: &ChapterSkeleton,
    ) -> Result<String> {
        scrape_page_html(page, &skeleton.url, CONTENT).await
    }
}
