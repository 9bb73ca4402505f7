use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// How much of a chapter's markup survives sanitizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingType {
    /// Keep formatting and localize embedded images.
    #[default]
    WithImage,
    /// Keep formatting, drop images.
    WithFormat,
    /// Plain text re-wrapped into paragraphs.
    TextOnly,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ScrapingOptions {
    /// Number of browser tabs working on chapters at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Navigation and image-capture timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ImageOptions {
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Lossless WebP when set, PNG otherwise
    #[serde(default = "default_true")]
    pub webp: bool,

    #[serde(default)]
    pub should_resize: bool,

    #[serde(default = "default_max_width")]
    pub max_width: u32,

    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub scraping: ScrapingOptions,
    #[serde(default)]
    pub images: ImageOptions,
    #[serde(default)]
    pub parsing: ParsingType,
}

fn default_true() -> bool { true }
fn default_concurrency() -> usize { 3 }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_quality() -> u8 { 80 }
fn default_max_width() -> u32 { 1600 }
fn default_max_height() -> u32 { 2400 }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }

impl Default for ScrapingOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ScrapingOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::invalid_input("concurrency must be a positive integer"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::invalid_input("timeout must be a positive number of milliseconds"));
        }
        Ok(())
    }
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            webp: true,
            should_resize: false,
            max_width: default_max_width(),
            max_height: default_max_height(),
        }
    }
}

impl ImageOptions {
    pub fn extension(&self) -> &'static str {
        if self.webp { "webp" } else { "png" }
    }

    pub fn media_type(&self) -> &'static str {
        if self.webp { "image/webp" } else { "image/png" }
    }

    pub fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(Error::invalid_input("image quality must be between 0 and 100"));
        }
        if self.should_resize && (self.max_width == 0 || self.max_height == 0) {
            return Err(Error::invalid_input("resize bounds must be positive"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            scraping: ScrapingOptions::default(),
            images: ImageOptions::default(),
            parsing: ParsingType::default(),
        }
    }
}

impl Config {
    /// Reads `path` if it exists, falling back to defaults when it does not.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::invalid_input(format!("{}: {}", path.display(), e)))?;
        config.scraping.validate()?;
        config.images.validate()?;
        Ok(config)
    }
}
