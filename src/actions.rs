//! End-to-end flows. Each one owns a staging directory for its whole run.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::browser::Connection;
use crate::config::Config;
use crate::crawler::{ScrapeContext, ScrapeReport, WebnovelCrawler};
use crate::epub::{self, StagingDir};
use crate::error::Result;
use crate::json;

#[derive(Debug)]
pub struct RunSummary {
    pub output: PathBuf,
    pub report: ScrapeReport,
}

fn log_report(report: &ScrapeReport) {
    info!("{}/{} chapters archived", report.completed, report.total);
    for failure in &report.failures {
        warn!("missing chapter: {}", failure);
    }
    for (url, reason) in &report.skipped_sources {
        warn!("skipped source {}: {}", url, reason);
    }
}

/// Scrapes `urls` in order and packs the combined result into an EPUB.
pub async fn webnovel_to_epub(
    connection: &dyn Connection,
    config: &Config,
    urls: &[String],
    keep_metadata_from: usize,
) -> Result<RunSummary> {
    let staging = StagingDir::temporary()?;
    let ctx = ScrapeContext::new(staging.path(), config);
    let outcome = WebnovelCrawler::new(connection, &ctx)
        .scrape_many(urls, keep_metadata_from)
        .await?;

    let output = config
        .output_dir
        .join(epub::epub_file_name(&outcome.webnovel.metadata.title));
    epub::finalize(&outcome.webnovel, staging.path(), &output)?;
    log_report(&outcome.report);

    Ok(RunSummary {
        output,
        report: outcome.report,
    })
}

/// Scrapes `urls` and writes the flat JSON snapshot instead of an EPUB.
pub async fn webnovel_to_json(
    connection: &dyn Connection,
    config: &Config,
    urls: &[String],
    keep_metadata_from: usize,
) -> Result<RunSummary> {
    let staging = StagingDir::temporary()?;
    let ctx = ScrapeContext::new(staging.path(), config);
    let outcome = WebnovelCrawler::new(connection, &ctx)
        .scrape_many(urls, keep_metadata_from)
        .await?;

    let flat = json::export(&outcome.webnovel, staging.path())?;
    let output = json::write_json(&flat, &config.output_dir)?;
    log_report(&outcome.report);

    Ok(RunSummary {
        output,
        report: outcome.report,
    })
}

/// Archives a JSON snapshot. Only the cover is downloaded.
pub async fn json_to_epub(connection: &dyn Connection, config: &Config, path: &Path) -> Result<RunSummary> {
    let flat = json::read_json(path)?;
    let staging = StagingDir::temporary()?;
    let ctx = ScrapeContext::new(staging.path(), config);

    let mut webnovel = json::import(&flat, staging.path())?;
    if let Some(cover_url) = &flat.cover_image_url {
        webnovel.metadata.cover_image = WebnovelCrawler::new(connection, &ctx)
            .capture_image(cover_url)
            .await;
    }

    let output = config
        .output_dir
        .join(epub::epub_file_name(&webnovel.metadata.title));
    epub::finalize(&webnovel, staging.path(), &output)?;

    let report = ScrapeReport {
        total: flat.chapters.len(),
        completed: webnovel.chapters.len(),
        ..ScrapeReport::default()
    };
    log_report(&report);
    Ok(RunSummary { output, report })
}

/// Adds newly published chapters to an existing archive, in place.
pub async fn update_epub(connection: &dyn Connection, config: &Config, path: &Path) -> Result<RunSummary> {
    let staging = StagingDir::adopt(epub::scratch_path());
    let webnovel = epub::reopen(path, staging.path())?;
    let before = webnovel.chapters.len();

    let ctx = ScrapeContext::new(staging.path(), config);
    let outcome = WebnovelCrawler::new(connection, &ctx).update(webnovel).await?;
    info!(
        "{} had {} chapters, now {}",
        path.display(),
        before,
        outcome.webnovel.chapters.len()
    );

    epub::finalize(&outcome.webnovel, staging.path(), path)?;
    log_report(&outcome.report);

    Ok(RunSummary {
        output: path.to_path_buf(),
        report: outcome.report,
    })
}
