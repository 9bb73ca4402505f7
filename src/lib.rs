pub mod actions;
pub mod aggregate;
pub mod browser;
pub mod config;
pub mod crawler;
pub mod epub;
pub mod error;
pub mod json;
pub mod models;
pub mod sources;
pub mod utils;

pub use config::{Config, ImageOptions, ParsingType, ScrapingOptions};
pub use crawler::{ScrapeContext, ScrapeOutcome, ScrapeReport, WebnovelCrawler};
pub use error::{Error, Result};
pub use models::{ArchiveItem, Chapter, ChapterArchiveItem, ChapterIndex, ChapterSkeleton, Metadata, Webnovel};
