use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use log::{info, warn};
use uuid::Uuid;

use super::downloader::ImageDownloader;
use super::sanitizer::{self, Sanitized};
use super::ScrapeContext;
use crate::browser::{Connection, Page};
use crate::epub::{xhtml, TEXT_DIR, XHTML_MEDIA_TYPE};
use crate::error::{Error, Result};
use crate::models::{ArchiveItem, Chapter, ChapterArchiveItem, ChapterIndex, ChapterSkeleton};
use crate::sources::Source;

/// Total tries per chapter, the first one included.
pub const MAX_ATTEMPTS: usize = 3;

/// One chapter to fetch, with the key it will be archived under.
#[derive(Debug, Clone)]
pub struct ChapterJob {
    pub skeleton: ChapterSkeleton,
    pub index: ChapterIndex,
}

impl ChapterJob {
    /// A job keyed by the skeleton's own index inside `band`.
    pub fn new(band: u32, skeleton: ChapterSkeleton) -> Self {
        Self {
            index: ChapterIndex::new(band, skeleton.index),
            skeleton,
        }
    }
}

/// Idle tabs. A task pops one, owns it for its whole run, then pushes it back.
pub struct TabPool<'a> {
    connection: &'a dyn Connection,
    idle: Mutex<Vec<Box<dyn Page>>>,
}

impl<'a> TabPool<'a> {
    pub fn new(connection: &'a dyn Connection) -> Self {
        Self {
            connection,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub async fn acquire(&self) -> Result<Box<dyn Page>> {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        match idle {
            Some(tab) => Ok(tab),
            None => self.connection.new_page().await,
        }
    }

    pub fn release(&self, tab: Box<dyn Page>) {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(tab);
    }
}

/// Finished/total counter for one batch.
pub struct Progress {
    label: String,
    total: usize,
    finished: AtomicUsize,
}

impl Progress {
    pub fn new(label: impl Into<String>, total: usize) -> Self {
        Self {
            label: label.into(),
            total,
            finished: AtomicUsize::new(0),
        }
    }

    pub fn tick(&self) -> usize {
        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        info!("{}: {}/{} chapters", self.label, finished, self.total);
        finished
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

/// What a batch produced. Chapters arrive in completion order.
#[derive(Debug, Default)]
pub struct ProcessedChapters {
    pub total: usize,
    pub chapters: Vec<ChapterArchiveItem>,
    pub items: Vec<ArchiveItem>,
    pub failures: Vec<Error>,
}

enum Failure {
    Fetch(Error),
    Parse(Error),
}

impl Failure {
    fn into_error(self, url: &str) -> Error {
        match self {
            Failure::Fetch(e) => Error::FetchFailure {
                url: url.to_string(),
                reason: e.to_string(),
            },
            Failure::Parse(e) => Error::ParseFailure {
                url: url.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Fetch(e) => write!(f, "fetch: {}", e),
            Failure::Parse(e) => write!(f, "sanitize: {}", e),
        }
    }
}

pub struct ChapterProcessor<'a> {
    source: &'a dyn Source,
    connection: &'a dyn Connection,
    ctx: &'a ScrapeContext,
    downloader: ImageDownloader,
}

impl<'a> ChapterProcessor<'a> {
    pub fn new(source: &'a dyn Source, connection: &'a dyn Connection, ctx: &'a ScrapeContext) -> Self {
        Self {
            source,
            connection,
            ctx,
            downloader: ImageDownloader::new(ctx),
        }
    }

    /// Runs every job with at most `concurrency` in flight. A failing chapter
    /// only ends up in `failures`; the rest of the batch carries on.
    pub async fn process(&self, jobs: Vec<ChapterJob>) -> ProcessedChapters {
        let total = jobs.len();
        let mut processed = ProcessedChapters {
            total,
            ..ProcessedChapters::default()
        };
        if jobs.is_empty() {
            return processed;
        }

        let pool = TabPool::new(self.connection);
        let progress = Progress::new(self.source.name(), total);
        let concurrency = self.ctx.scraping.concurrency.max(1);

        let results: Vec<Result<(ChapterArchiveItem, Vec<ArchiveItem>)>> = stream::iter(jobs)
            .map(|job| {
                let pool = &pool;
                let progress = &progress;
                async move {
                    let result = match pool.acquire().await {
                        Ok(mut tab) => {
                            let result = self.run(tab.as_mut(), &job).await;
                            pool.release(tab);
                            result
                        }
                        Err(e) => Err(Error::FetchFailure {
                            url: job.skeleton.url.clone(),
                            reason: format!("no tab available: {}", e),
                        }),
                    };
                    progress.tick();
                    result
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                Ok((chapter, items)) => {
                    processed.chapters.push(chapter);
                    processed.items.extend(items);
                }
                Err(e) => {
                    warn!("{}", e);
                    processed.failures.push(e);
                }
            }
        }
        processed
    }

    async fn run(&self, page: &mut dyn Page, job: &ChapterJob) -> Result<(ChapterArchiveItem, Vec<ArchiveItem>)> {
        let url = &job.skeleton.url;
        let mut attempt = 1;
        loop {
            match self.attempt(page, job).await {
                Ok((chapter, items)) => return self.write(job.index, chapter, items),
                Err(failure) if attempt < MAX_ATTEMPTS => {
                    warn!("attempt {}/{} for {} failed ({}), retrying", attempt, MAX_ATTEMPTS, url, failure);
                    attempt += 1;
                }
                Err(failure) => return Err(failure.into_error(url)),
            }
        }
    }

    /// Fetches and sanitizes once. The returned chapter holds the cleaned markup.
    async fn attempt(&self, page: &mut dyn Page, job: &ChapterJob) -> std::result::Result<(Chapter, Vec<ArchiveItem>), Failure> {
        let markup = self
            .source
            .fetch_chapter_markup(page, &job.skeleton)
            .await
            .map_err(Failure::Fetch)?;
        let mut chapter = Chapter::new(job.skeleton.clone(), markup);

        let Sanitized { markup, items } =
            sanitizer::sanitize(&chapter.content, self.ctx.parsing, page, &chapter.skeleton.url, &self.downloader)
                .await
                .map_err(Failure::Parse)?;
        chapter.content = markup;
        Ok((chapter, items))
    }

    /// Writes the chapter document to staging right away.
    fn write(&self, index: ChapterIndex, chapter: Chapter, items: Vec<ArchiveItem>) -> Result<(ChapterArchiveItem, Vec<ArchiveItem>)> {
        let id = Uuid::new_v4();
        let path = format!("{}/{}.xhtml", TEXT_DIR, id);
        let document = xhtml::chapter_document(&chapter.skeleton.title, &chapter.content);
        fs::write(self.ctx.content_dir().join(&path), document)?;

        let ChapterSkeleton { title, url, .. } = chapter.skeleton;
        let archived = ChapterArchiveItem {
            item: ArchiveItem {
                id,
                path,
                media_type: XHTML_MEDIA_TYPE.to_string(),
            },
            index,
            title,
            url,
        };
        Ok((archived, items))
    }
}
