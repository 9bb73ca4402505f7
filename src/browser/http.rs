use std::collections::HashSet;

use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use scraper::Html;
use tokio::sync::mpsc;
use url::Url;

use super::{Connection, NetworkResponse, Page};
use crate::config::ScrapingOptions;
use crate::error::{Error, Result};
use crate::utils::selector;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Session backed by a shared reqwest client. Cloning the client only bumps
/// a reference count, so every tab shares one connection pool.
pub struct HttpBrowser {
    client: reqwest::Client,
}

impl HttpBrowser {
    pub fn new(options: &ScrapingOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.timeout())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Connection for HttpBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        Ok(Box::new(HttpPage::new(self.client.clone())))
    }
}

pub struct HttpPage {
    client: reqwest::Client,
    url: String,
    document: String,
    listeners: Vec<mpsc::UnboundedSender<NetworkResponse>>,
}

impl HttpPage {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            url: String::new(),
            document: String::new(),
            listeners: Vec::new(),
        }
    }

    async fn load(&mut self, requested: &str, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = header_content_type(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| navigation_error(requested, e))?
            .to_vec();

        if !status.is_success() {
            return Err(Error::Navigation {
                url: requested.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        self.url = final_url;
        self.document = String::from_utf8_lossy(&body).into_owned();
        let is_html = content_type
            .as_deref()
            .is_some_and(|t| t.contains("html"));

        self.emit(NetworkResponse {
            url: requested.to_string(),
            content_type,
            body,
        });

        if is_html {
            self.load_images();
        }
        Ok(())
    }

    fn emit(&mut self, response: NetworkResponse) {
        self.listeners.retain(|l| !l.is_closed());
        for listener in &self.listeners {
            let _ = listener.send(response.clone());
        }
    }

    /// Requests the document's images in the background, the way a browser
    /// would after parsing the page. Only done while someone is listening.
    fn load_images(&mut self) {
        self.listeners.retain(|l| !l.is_closed());
        if self.listeners.is_empty() {
            return;
        }

        for src in image_sources(&self.url, &self.document) {
            let client = self.client.clone();
            let listeners = self.listeners.clone();
            tokio::spawn(async move {
                match fetch(&client, &src).await {
                    Ok(response) => {
                        for listener in &listeners {
                            let _ = listener.send(response.clone());
                        }
                    }
                    Err(e) => debug!("image request {} failed: {}", src, e),
                }
            });
        }
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &str) -> Result<()> {
        debug!("navigating to {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| navigation_error(url, e))?;
        self.load(url, response).await
    }

    async fn post(&mut self, url: &str, form: &[(&str, &str)]) -> Result<()> {
        debug!("posting to {}", url);
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| navigation_error(url, e))?;
        self.load(url, response).await
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

async fn fetch(client: &reqwest::Client, url: &str) -> Result<NetworkResponse> {
    let response = client.get(url).send().await?.error_for_status()?;
    let content_type = header_content_type(&response);
    let body = response.bytes().await?.to_vec();
    Ok(NetworkResponse {
        url: url.to_string(),
        content_type,
        body,
    })
}

fn header_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn navigation_error(url: &str, e: reqwest::Error) -> Error {
    Error::Navigation {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// Absolute, de-duplicated `<img src>` URLs of a document, in document order.
fn image_sources(base: &str, document: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let Ok(img) = selector("img[src]") else {
        return Vec::new();
    };

    let html = Html::parse_document(document);
    let mut seen = HashSet::new();
    html.select(&img)
        .filter_map(|e| e.value().attr("src"))
        .filter_map(|src| base.join(src.trim()).ok())
        .filter(|u| u.scheme() == "http" || u.scheme() == "https")
        .map(|u| u.to_string())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_sources_are_absolute_and_unique() {
        let doc = r#"<html><body>
            <img src="/a.png"><img src="b.jpg"><img src="/a.png">
            <img src="data:image/png;base64,AAAA"><img alt="none">
            <img src="https://cdn.example.com/c.webp">
        </body></html>"#;

        let sources = image_sources("https://novelbin.me/b/novel/chapter-1", doc);
        assert_eq!(
            sources,
            vec![
                "https://novelbin.me/a.png",
                "https://novelbin.me/b/novel/b.jpg",
                "https://cdn.example.com/c.webp",
            ]
        );
    }

    #[tokio::test]
    async fn listeners_can_be_dropped() {
        let mut page = HttpPage::new(reqwest::Client::new());
        let rx = page.listen();
        drop(rx);
        page.emit(NetworkResponse {
            url: "https://a.com/x".into(),
            content_type: None,
            body: Vec::new(),
        });
        assert!(page.listeners.is_empty());
    }
}
