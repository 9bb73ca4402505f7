use async_trait::async_trait;

use super::{LandingPage, Source, collect_links, into_skeletons, not_initialized, scrape_page_html};
use crate::browser::{Connection, Page};
use crate::config::ScrapingOptions;
use crate::error::{Error, Result, Stage};
use crate::models::ChapterSkeleton;

const CHAPTER_LINKS: &str = "div.tab-content div.panel-body div.row ul.list-chapter a";
const CONTENT: &[&str] = &["div#chr-content", "div#chapter-content"];

/// novelbin.me: metadata in `og:novel:*` tags, full chapter list on the landing page.
#[derive(Default)]
pub struct NovelbinSource {
    landing: Option<LandingPage>,
}

impl NovelbinSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn landing(&self) -> Result<&LandingPage> {
        self.landing.as_ref().ok_or_else(|| not_initialized(self.name()))
    }
}

#[async_trait]
impl Source for NovelbinSource {
    fn name(&self) -> &'static str {
        "novelbin"
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["novelbin.me"]
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

        // the list is filled in after load, so read it from a fresh navigation
        landing.page.goto(&landing.url).await?;
        let links = collect_links(landing.page.document(), landing.page.url(), CHAPTER_LINKS, None)?;
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
