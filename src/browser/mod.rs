//! Capability-restricted handles onto a browsing session.
//!
//! Adapters and the image pipeline only ever see a [`Page`]; where the page
//! comes from is the [`Connection`]'s business. [`HttpBrowser`] is the
//! reqwest-backed implementation used by the binary.

pub mod http;

pub use http::{HttpBrowser, HttpPage};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One network response observed by a page while it navigates.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// A single independently navigable tab.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates to `url` and waits for the document to load.
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// Submits a form to `url` and loads the response as the current document.
    async fn post(&mut self, url: &str, form: &[(&str, &str)]) -> Result<()>;

    /// URL of the currently loaded document.
    fn url(&self) -> &str;

    /// Markup of the currently loaded document.
    fn document(&self) -> &str;

    /// Subscribes to every response the page receives from now on. Responses
    /// may arrive after the navigation that caused them has returned.
    fn listen(&mut self) -> mpsc::UnboundedReceiver<NetworkResponse>;
}

/// Shared session that hands out new tabs.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;
}
