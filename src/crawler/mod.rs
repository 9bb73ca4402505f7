//! Drives source adapters end to end: metadata, cover, chapters.

pub mod downloader;
pub mod processor;
pub mod sanitizer;

pub use downloader::ImageDownloader;
pub use processor::{ChapterJob, ChapterProcessor, ProcessedChapters, MAX_ATTEMPTS};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::aggregate;
use crate::browser::Connection;
use crate::config::{Config, ImageOptions, ParsingType, ScrapingOptions};
use crate::epub::CONTENT_DIR;
use crate::error::{Error, Result};
use crate::models::{ArchiveItem, ChapterSkeleton, Metadata, Webnovel};
use crate::sources::{self, Source};

/// Everything a run threads through the crawler: where to stage files and
/// how to scrape, recompress and sanitize.
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    pub staging: PathBuf,
    pub scraping: ScrapingOptions,
    pub images: ImageOptions,
    pub parsing: ParsingType,
}

impl ScrapeContext {
    pub fn new(staging: &Path, config: &Config) -> Self {
        Self {
            staging: staging.to_path_buf(),
            scraping: config.scraping.clone(),
            images: config.images.clone(),
            parsing: config.parsing,
        }
    }

    pub fn content_dir(&self) -> PathBuf {
        self.staging.join(CONTENT_DIR)
    }
}

#[derive(Debug, Default)]
pub struct ScrapeReport {
    /// Chapters attempted.
    pub total: usize,
    pub completed: usize,
    /// Chapters that exhausted their retries.
    pub failures: Vec<Error>,
    /// Sources left out entirely, with the reason.
    pub skipped_sources: Vec<(String, Error)>,
}

impl ScrapeReport {
    fn record(&mut self, processed: &mut ProcessedChapters) {
        self.total += processed.total;
        self.completed += processed.chapters.len();
        self.failures.append(&mut processed.failures);
    }

    fn absorb(&mut self, mut other: ScrapeReport) {
        self.total += other.total;
        self.completed += other.completed;
        self.failures.append(&mut other.failures);
        self.skipped_sources.append(&mut other.skipped_sources);
    }
}

#[derive(Debug)]
pub struct ScrapeOutcome {
    pub webnovel: Webnovel,
    pub report: ScrapeReport,
}

pub struct WebnovelCrawler<'a> {
    connection: &'a dyn Connection,
    ctx: &'a ScrapeContext,
}

impl<'a> WebnovelCrawler<'a> {
    pub fn new(connection: &'a dyn Connection, ctx: &'a ScrapeContext) -> Self {
        Self { connection, ctx }
    }

    pub async fn scrape(&self, url: &str) -> Result<ScrapeOutcome> {
        let source = sources::resolve(url)?;
        self.scrape_source(source, url).await
    }

    /// Scrapes one source into a single-band webnovel fragment.
    pub async fn scrape_source(&self, mut source: Box<dyn Source>, url: &str) -> Result<ScrapeOutcome> {
        info!("using {} adapter for {}", source.name(), url);
        let Listing { title, author, chapters: skeletons } =
            list_source(source.as_mut(), url, self.connection, &self.ctx.scraping).await?;
        info!("title: {}, author: {}", title, author);
        info!("found {} chapters", skeletons.len());

        let mut metadata = Metadata::new(title, author, url.to_string());
        if let Some((cover_url, cover)) = self.capture_cover(source.as_ref()).await {
            metadata.cover_url = Some(cover_url);
            metadata.cover_image = Some(cover);
        }

        let jobs = skeletons.into_iter().map(|s| ChapterJob::new(0, s)).collect();
        let mut processed = ChapterProcessor::new(source.as_ref(), self.connection, self.ctx)
            .process(jobs)
            .await;

        let mut report = ScrapeReport::default();
        report.record(&mut processed);

        let mut webnovel = Webnovel::new(metadata);
        webnovel.chapters = processed.chapters;
        webnovel.items = processed.items;
        webnovel.normalize();

        Ok(ScrapeOutcome { webnovel, report })
    }

    /// Cover capture never fails the scrape, the book just goes without.
    async fn capture_cover(&self, source: &dyn Source) -> Option<(String, ArchiveItem)> {
        let cover_url = match source.cover_image_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!("no cover image: {}", e);
                return None;
            }
        };
        self.capture_image(&cover_url).await.map(|item| (cover_url, item))
    }

    /// Captures a standalone image on a tab of its own.
    pub async fn capture_image(&self, url: &str) -> Option<ArchiveItem> {
        let mut page = match self.connection.new_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("could not open a tab for {}: {}", url, e);
                return None;
            }
        };

        let downloader = ImageDownloader::new(self.ctx);
        match downloader.capture(page.as_mut(), url, &[url.to_string()]).await {
            Ok(mut captured) => {
                let item = captured.remove(url);
                if item.is_none() {
                    warn!("image {} did not arrive in time", url);
                }
                item
            }
            Err(e) => {
                warn!("image capture for {} failed: {}", url, e);
                None
            }
        }
    }

    /// Scrapes every URL in order and combines the survivors. Sources that fail
    /// are skipped; metadata comes from `keep_metadata_from`, or the first
    /// surviving source if that one was skipped.
    pub async fn scrape_many(&self, urls: &[String], keep_metadata_from: usize) -> Result<ScrapeOutcome> {
        let mut fragments = Vec::new();
        let mut report = ScrapeReport::default();
        let mut keep = None;

        for (i, url) in urls.iter().enumerate() {
            match self.scrape(url).await {
                Ok(outcome) => {
                    if i == keep_metadata_from {
                        keep = Some(fragments.len());
                    }
                    report.absorb(outcome.report);
                    fragments.push(outcome.webnovel);
                }
                Err(e) => {
                    warn!("skipping source {}: {}", url, e);
                    report.skipped_sources.push((url.clone(), e));
                }
            }
        }

        if fragments.is_empty() {
            return Err(Error::NothingScraped);
        }
        let webnovel = aggregate::combine(fragments, keep.unwrap_or(0))?;
        Ok(ScrapeOutcome { webnovel, report })
    }

    /// Brings an archived webnovel up to date with its recorded sources.
    pub async fn update(&self, webnovel: Webnovel) -> Result<ScrapeOutcome> {
        self.update_with(webnovel, sources::resolve).await
    }

    /// [`update`](Self::update) with a custom source lookup.
    pub async fn update_with<F>(&self, mut webnovel: Webnovel, resolve: F) -> Result<ScrapeOutcome>
    where
        F: Fn(&str) -> Result<Box<dyn Source>>,
    {
        let mut report = ScrapeReport::default();
        let source_urls = webnovel.metadata.source_urls.clone();

        for (band, url) in source_urls.iter().enumerate() {
            let band = band as u32;
            let mut source = match resolve(url) {
                Ok(source) => source,
                Err(e) => {
                    warn!("skipping source {}: {}", url, e);
                    report.skipped_sources.push((url.clone(), e));
                    continue;
                }
            };

            let listed = match list_source(source.as_mut(), url, self.connection, &self.ctx.scraping).await {
                Ok(listing) => listing.chapters,
                Err(e) => {
                    warn!("skipping source {}: {}", url, e);
                    report.skipped_sources.push((url.clone(), e));
                    continue;
                }
            };

            let jobs = plan_update(&mut webnovel, band, listed);
            info!("{}: {} new chapters", url, jobs.len());

            let mut processed = ChapterProcessor::new(source.as_ref(), self.connection, self.ctx)
                .process(jobs)
                .await;
            report.record(&mut processed);
            webnovel.chapters.append(&mut processed.chapters);
            webnovel.items.append(&mut processed.items);
        }

        webnovel.normalize();
        Ok(ScrapeOutcome { webnovel, report })
    }
}

/// What a source says about itself before any chapter is fetched.
struct Listing {
    title: String,
    author: String,
    chapters: Vec<ChapterSkeleton>,
}

/// Initializes `source` and reads its metadata and chapter list, starting
/// over from `initialize` up to [`MAX_ATTEMPTS`] times.
async fn list_source(
    source: &mut dyn Source,
    url: &str,
    connection: &dyn Connection,
    options: &ScrapingOptions,
) -> Result<Listing> {
    let mut attempt = 1;
    loop {
        match read_source(source, url, connection, options).await {
            Ok(listing) => return Ok(listing),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!("attempt {}/{} to list {} failed ({}), retrying", attempt, MAX_ATTEMPTS, url, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn read_source(
    source: &mut dyn Source,
    url: &str,
    connection: &dyn Connection,
    options: &ScrapingOptions,
) -> Result<Listing> {
    source.initialize(url, connection, options).await?;
    let title = source.title().await?;
    let author = source.author().await?;
    let chapters = source.list_chapters().await?;
    Ok(Listing { title, author, chapters })
}

/// Re-syncs the positions of archived chapters in `band` to a fresh listing
/// and returns jobs for the chapters not archived yet.
pub fn plan_update(webnovel: &mut Webnovel, band: u32, listed: Vec<ChapterSkeleton>) -> Vec<ChapterJob> {
    {
        let positions: HashMap<&str, u32> = listed.iter().map(|s| (s.url.as_str(), s.index)).collect();
        for chapter in webnovel.chapters.iter_mut().filter(|c| c.index.band == band) {
            if let Some(position) = positions.get(chapter.url.as_str()) {
                chapter.index.position = *position;
            }
        }
    }

    let archived: HashSet<String> = webnovel.chapter_urls().into_iter().map(str::to_string).collect();
    listed
        .into_iter()
        .filter(|s| !archived.contains(&s.url))
        .map(|s| ChapterJob::new(band, s))
        .collect()
}
