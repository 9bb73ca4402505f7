#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use scraper::{Html, Selector};
use tokio::sync::mpsc;
use url::Url;

use webnovel_fetch::browser::{Connection, NetworkResponse, Page};
use webnovel_fetch::error::Stage;
use webnovel_fetch::sources::Source;
use webnovel_fetch::{ChapterSkeleton, Config, Error, ParsingType, Result, ScrapeContext, ScrapingOptions};

#[derive(Clone)]
struct Resource {
    content_type: String,
    body: Vec<u8>,
}

/// In-memory web: URL -> response. Cheap to clone, all clones share state.
#[derive(Clone, Default)]
pub struct MockSite {
    resources: Arc<Mutex<HashMap<String, Resource>>>,
    visits: Arc<Mutex<HashMap<String, usize>>>,
    redirects: Arc<Mutex<HashMap<String, String>>>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: String, content_type: &str, body: Vec<u8>) {
        self.resources.lock().unwrap().insert(
            key,
            Resource {
                content_type: content_type.to_string(),
                body,
            },
        );
    }

    pub fn html(&self, url: &str, body: &str) {
        self.insert(url.to_string(), "text/html", body.as_bytes().to_vec());
    }

    pub fn post_html(&self, url: &str, body: &str) {
        self.insert(format!("POST {}", url), "text/html", body.as_bytes().to_vec());
    }

    pub fn image(&self, url: &str, body: Vec<u8>) {
        self.insert(url.to_string(), "image/png", body);
    }

    /// Navigating to `from` lands on `to`.
    pub fn redirect(&self, from: &str, to: &str) {
        self.redirects.lock().unwrap().insert(from.to_string(), to.to_string());
    }

    fn redirected(&self, url: &str) -> String {
        self.redirects.lock().unwrap().get(url).cloned().unwrap_or_else(|| url.to_string())
    }

    pub fn remove(&self, url: &str) {
        self.resources.lock().unwrap().remove(url);
    }

    pub fn visits(&self, url: &str) -> usize {
        self.visits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn get(&self, key: &str) -> Option<Resource> {
        *self.visits.lock().unwrap().entry(key.to_string()).or_default() += 1;
        self.resources.lock().unwrap().get(key).cloned()
    }

    pub fn connection(&self) -> MockConnection {
        MockConnection {
            site: self.clone(),
            opened: Arc::new(Mutex::new(0)),
        }
    }
}

#[derive(Clone)]
pub struct MockConnection {
    pub site: MockSite,
    pub opened: Arc<Mutex<usize>>,
}

impl MockConnection {
    pub fn tabs_opened(&self) -> usize {
        *self.opened.lock().unwrap()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        *self.opened.lock().unwrap() += 1;
        Ok(Box::new(MockPage::new(self.site.clone())))
    }
}

/// Behaves like a browser tab: the document response is emitted during
/// navigation, image responses trickle in afterwards. Images missing from
/// the site never respond at all.
pub struct MockPage {
    site: MockSite,
    url: String,
    document: String,
    listeners: Vec<mpsc::UnboundedSender<NetworkResponse>>,
}

impl MockPage {
    pub fn new(site: MockSite) -> Self {
        Self {
            site,
            url: String::new(),
            document: String::new(),
            listeners: Vec::new(),
        }
    }

    fn load(&mut self, requested: &str, resource: Resource) {
        self.url = requested.to_string();
        self.document = String::from_utf8_lossy(&resource.body).into_owned();
        self.listeners.retain(|l| !l.is_closed());

        let is_html = resource.content_type.contains("html");
        for listener in &self.listeners {
            let _ = listener.send(NetworkResponse {
                url: requested.to_string(),
                content_type: Some(resource.content_type.clone()),
                body: resource.body.clone(),
            });
        }
        if !is_html || self.listeners.is_empty() {
            return;
        }

        let sources = image_urls(requested, &self.document);
        for (delay, src) in sources.into_iter().rev().enumerate() {
            let Some(image) = self.site.get(&src) else {
                continue;
            };
            let listeners = self.listeners.clone();
            tokio::spawn(async move {
                // reverse document order, to arrive out of order
                tokio::time::sleep(Duration::from_millis(5 * delay as u64)).await;
                for listener in &listeners {
                    let _ = listener.send(NetworkResponse {
                        url: src.clone(),
                        content_type: Some(image.content_type.clone()),
                        body: image.body.clone(),
                    });
                }
            });
        }
    }
}

fn image_urls(base: &str, document: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let img = Selector::parse("img[src]").unwrap();
    let mut seen = HashSet::new();
    Html::parse_document(document)
        .select(&img)
        .filter_map(|e| e.value().attr("src"))
        .filter_map(|src| base.join(src.trim()).ok())
        .map(|u| u.to_string())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

#[async_trait]
impl Page for MockPage {
    async fn goto(&mut self, url: &str) -> Result<()> {
        let landed = self.site.redirected(url);
        match self.site.get(&landed) {
            Some(resource) => {
                self.load(&landed, resource);
                Ok(())
            }
            None => Err(Error::Navigation {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            }),
        }
    }

    async fn post(&mut self, url: &str, _form: &[(&str, &str)]) -> Result<()> {
        match self.site.get(&format!("POST {}", url)) {
            Some(resource) => {
                self.load(url, resource);
                Ok(())
            }
            None => Err(Error::Navigation {
                url: url.to_string(),
                reason: "HTTP 405 Method Not Allowed".to_string(),
            }),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn document(&self) -> &str {
        &self.document
    }

    fn listen(&mut self) -> mpsc::UnboundedReceiver<NetworkResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }
}

/// A source whose chapters come from a script instead of a site.
#[derive(Clone)]
pub struct ScriptedSource {
    pub title: String,
    pub author: String,
    pub cover: Option<String>,
    pub chapters: Vec<ChapterSkeleton>,
    /// Failing calls before a chapter URL succeeds. `usize::MAX` never succeeds.
    pub failures: HashMap<String, usize>,
    pub calls: Arc<Mutex<HashMap<String, usize>>>,
    /// Failing listings before one succeeds.
    pub listing_failures: usize,
    pub listings: Arc<Mutex<usize>>,
}

impl ScriptedSource {
    pub fn new(title: &str, chapter_count: u32) -> Self {
        let slug = title.to_lowercase().replace(' ', "-");
        let chapters = (0..chapter_count)
            .map(|i| ChapterSkeleton {
                index: i,
                title: format!("Chapter {}", i + 1),
                url: format!("https://scripted.test/{}/chapter-{}", slug, i + 1),
            })
            .collect();
        Self {
            title: title.to_string(),
            author: "Scripted Author".to_string(),
            cover: None,
            chapters,
            failures: HashMap::new(),
            calls: Arc::new(Mutex::new(HashMap::new())),
            listing_failures: 0,
            listings: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing_listing(mut self, times: usize) -> Self {
        self.listing_failures = times;
        self
    }

    pub fn listings(&self) -> usize {
        *self.listings.lock().unwrap()
    }

    pub fn failing(mut self, chapter: usize, times: usize) -> Self {
        let url = self.chapters[chapter].url.clone();
        self.failures.insert(url, times);
        self
    }

    pub fn calls(&self, chapter: usize) -> usize {
        let url = &self.chapters[chapter].url;
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn url(&self) -> String {
        format!("https://scripted.test/{}", self.title.to_lowercase().replace(' ', "-"))
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn hostnames(&self) -> &'static [&'static str] {
        &["scripted.test"]
    }

    async fn initialize(&mut self, _url: &str, _connection: &dyn Connection, _options: &ScrapingOptions) -> Result<()> {
        Ok(())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.title.clone())
    }

    async fn author(&self) -> Result<String> {
        Ok(self.author.clone())
    }

    async fn cover_image_url(&self) -> Result<String> {
        self.cover
            .clone()
            .ok_or_else(|| Error::extraction(Stage::CoverImage, self.url()))
    }

    async fn list_chapters(&mut self) -> Result<Vec<ChapterSkeleton>> {
        let listing = {
            let mut listings = self.listings.lock().unwrap();
            *listings += 1;
            *listings
        };
        if listing <= self.listing_failures {
            return Err(Error::Navigation {
                url: self.url(),
                reason: "connection reset while paging".to_string(),
            });
        }
        Ok(self.chapters.clone())
    }

    async fn fetch_chapter_markup(&self, _page: &mut dyn Page, skeleton: &ChapterSkeleton) -> Result<String> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(skeleton.url.clone()).or_default();
            *count += 1;
            *count
        };
        let failures = self.failures.get(&skeleton.url).copied().unwrap_or(0);
        if call <= failures {
            return Err(Error::extraction(Stage::ChapterContent, &skeleton.url));
        }
        Ok(format!("<p>{} text</p>", skeleton.title))
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn config(parsing: ParsingType, timeout_ms: u64) -> Config {
    let mut config = Config::default();
    config.parsing = parsing;
    config.scraping.timeout_ms = timeout_ms;
    config
}

/// A context staging into a fresh `staging/` directory under `dir`.
pub fn context(dir: &std::path::Path, parsing: ParsingType, timeout_ms: u64) -> ScrapeContext {
    let staging = dir.join("staging");
    webnovel_fetch::epub::create_staging(&staging).unwrap();
    ScrapeContext::new(&staging, &config(parsing, timeout_ms))
}

pub const NOVELBIN: &str = "https://novelbin.me/b/shadow-slave";

fn novelbin_chapter_list(count: usize) -> String {
    (1..=count)
        .map(|i| {
            format!(
                r#"<li><a href="/b/shadow-slave/chapter-{i}" title="Chapter {i}"><span>Chapter {i}</span></a></li>"#
            )
        })
        .collect()
}

pub fn novelbin_site(chapters: usize) -> MockSite {
    let site = MockSite::new();
    publish_novelbin(&site, chapters);
    site
}

/// (Re)publishes the novelbin novel with `chapters` chapters on `site`.
pub fn publish_novelbin(site: &MockSite, chapters: usize) {
    site.html(
        NOVELBIN,
        &format!(
            r#"<html><head>
                <meta property="og:novel:novel_name" content="Shadow Slave">
                <meta property="og:novel:author" content="Guiltythree">
                <meta property="og:image" content="https://novelbin.me/media/cover.png">
            </head><body>
                <div class="tab-content"><div class="panel-body"><div class="row">
                    <ul class="list-chapter">{}</ul>
                </div></div></div>
            </body></html>"#,
            novelbin_chapter_list(chapters)
        ),
    );
    site.image("https://novelbin.me/media/cover.png", png(60, 90));
    for i in 1..=chapters {
        add_novelbin_chapter(site, i);
    }
}

pub fn add_novelbin_chapter(site: &MockSite, i: usize) {
    site.html(
        &format!("{}/chapter-{}", NOVELBIN, i),
        &format!(
            r#"<html><body><div id="chr-content">
                <p>Chapter {i} body</p><script>track()</script>
                <img src="/media/chapter-{i}.png">
            </div></body></html>"#
        ),
    );
    site.image(&format!("https://novelbin.me/media/chapter-{}.png", i), png(16, 16));
}
