use async_trait::async_trait;
use log::debug;

use super::{LandingPage, Source, collect_links, into_skeletons, not_initialized, scrape_page_html};
use crate::browser::{Connection, Page};
use crate::config::ScrapingOptions;
use crate::error::{Error, Result, Stage};
use crate::models::ChapterSkeleton;

const AUTHOR: &[&str] = &[
    "main > div > div:nth-of-type(1) > div:nth-of-type(2) > div:nth-of-type(4) > a",
    "div.author-content a",
];
const CHAPTER_LINKS: &str = "main > div > div:nth-of-type(2) > div:nth-of-type(2) > a";
const LOADED_CHAPTER_LINKS: &str = "li.wp-manga-chapter > a";
const CONTENT: &[&str] = &["main main > div > div:nth-of-type(1)", "div.reading-content"];

/// woopread.com and its sister site. Chapters are listed newest first and the
/// full list sits behind a "load more" control.
#[derive(Default)]
pub struct WoopreadSource {
    landing: Option<LandingPage>,
}

impl WoopreadSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn landing(&self) -> Result<&LandingPage> {
        self.landing.as_ref().ok_or_else(|| not_initialized(self.name()))
    }
}

/// Endpoint the "load more" button posts to, relative to the series page.
fn load_more_url(series_url: &str) -> String {
    let base = series_url.split(['?', '#']).next().unwrap_or(series_url);
    format!("{}/ajax/chapters/", base.trim_end_matches('/'))
}

#[async_trait]
impl Source for WoopreadSource {
    fn name(&self) -> &'static str {
        "woopread"
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["woopread.com", "noveltranslationhub.com"]
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
        self.landing()?.meta("og:title", Stage::Title)
    }

    async fn author(&self) -> Result<String> {
        let landing = self.landing()?;
        AUTHOR
            .iter()
            .find_map(|css| landing.text(css, Stage::Author).ok())
            .ok_or_else(|| Error::extraction(Stage::Author, &landing.url))
    }

    async fn cover_image_url(&self) -> Result<String> {
        self.landing()?.meta("og:image", Stage::CoverImage)
    }

    async fn list_chapters(&mut self) -> Result<Vec<ChapterSkeleton>> {
        let name = self.name();
        let landing = self.landing.as_mut().ok_or_else(|| not_initialized(name))?;

        let mut links = collect_links(&landing.document, &landing.url, CHAPTER_LINKS, Some("div > div > h3"))?;
        if links.is_empty() {
            let endpoint = load_more_url(&landing.url);
            debug!("expanding chapter list via {}", endpoint);
            landing.page.post(&endpoint, &[]).await?;
            links = collect_links(landing.page.document(), &landing.url, LOADED_CHAPTER_LINKS, None)?;
        }

        if links.is_empty() {
            return Err(Error::extraction(Stage::ChapterList, &landing.url));
        }
        links.reverse();
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
