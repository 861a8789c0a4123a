//! Abstract page capability.
//!
//! Workers drive pages exclusively through `BrowserContext`; any engine that
//! can navigate, query selectors, evaluate scripts, and screenshot is
//! acceptable. `chromium` is the production implementation, `static_page`
//! serves tests and extraction unit work with canned documents.

pub mod chromium;
mod launch;
pub mod pool;
mod profile;
pub mod static_page;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CrawlResult;

pub use chromium::ChromiumContext;
pub use launch::launch_browser;
pub use pool::{BrowserPool, BrowserPoolConfig};
pub use profile::{BrowserProfile, Geolocation, Viewport};
pub use static_page::{StaticBrowser, StaticPage, StaticSite};

/// Outcome of a navigation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    /// HTTP status of the main document, when the engine exposes it
    pub status: Option<u16>,
    pub final_url: String,
}

impl PageResponse {
    /// 2xx/3xx (or unknown status) counts as success
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_none_or(|s| s < 400)
    }
}

/// Target state for selector waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorState {
    Visible,
    Attached,
    Hidden,
}

/// Target state for load waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// One page bound to a browser profile.
///
/// All operations are cancel-safe: dropping the future mid-flight leaves the
/// page in an unspecified but closeable state.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn navigate(&self, url: &str) -> CrawlResult<PageResponse>;

    async fn current_url(&self) -> CrawlResult<String>;

    /// Full serialized document
    async fn content(&self) -> CrawlResult<String>;

    /// Number of elements matching the selector
    async fn query_count(&self, selector: &str) -> CrawlResult<usize>;

    /// Rendered text of the nth match
    async fn query_text(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>>;

    /// Attribute value of the nth match
    async fn query_attribute(
        &self,
        selector: &str,
        nth: usize,
        name: &str,
    ) -> CrawlResult<Option<String>>;

    /// Inner HTML of the nth match
    async fn query_html(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>>;

    async fn click(&self, selector: &str) -> CrawlResult<()>;

    /// Click at viewport coordinates
    async fn click_at(&self, x: f64, y: f64) -> CrawlResult<()>;

    async fn hover(&self, selector: &str) -> CrawlResult<()>;

    async fn type_text(&self, selector: &str, text: &str) -> CrawlResult<()>;

    /// Scroll an element into view, or the window by a pixel delta
    async fn scroll(&self, selector: Option<&str>, delta_y: i64) -> CrawlResult<()>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> CrawlResult<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> CrawlResult<()>;

    /// Evaluate a script; the result is serialized to JSON
    async fn evaluate(&self, script: &str) -> CrawlResult<serde_json::Value>;

    /// Screenshot of the nth match (PNG bytes); None when it does not exist
    async fn query_screenshot(&self, selector: &str, nth: usize) -> CrawlResult<Option<Vec<u8>>>;

    /// Full-page screenshot (PNG bytes)
    async fn screenshot(&self) -> CrawlResult<Vec<u8>>;

    /// Release the page
    async fn close(&self) -> CrawlResult<()>;
}

/// A lazy handle on the elements matching one selector
pub struct Locator<'a> {
    ctx: &'a dyn BrowserContext,
    selector: String,
    index: usize,
}

impl<'a> Locator<'a> {
    /// Selector-scoped view over a page
    #[must_use]
    pub fn new(ctx: &'a dyn BrowserContext, selector: &str) -> Self {
        Self {
            ctx,
            selector: selector.to_string(),
            index: 0,
        }
    }
}

impl<'a> Locator<'a> {
    pub async fn count(&self) -> CrawlResult<usize> {
        self.ctx.query_count(&self.selector).await
    }

    /// View narrowed to the nth match
    #[must_use]
    pub fn nth(&self, index: usize) -> Locator<'a> {
        Locator {
            ctx: self.ctx,
            selector: self.selector.clone(),
            index,
        }
    }

    pub async fn text(&self) -> CrawlResult<Option<String>> {
        self.ctx.query_text(&self.selector, self.index).await
    }

    pub async fn attribute(&self, name: &str) -> CrawlResult<Option<String>> {
        self.ctx
            .query_attribute(&self.selector, self.index, name)
            .await
    }

    pub async fn html(&self) -> CrawlResult<Option<String>> {
        self.ctx.query_html(&self.selector, self.index).await
    }

    pub async fn screenshot(&self) -> CrawlResult<Option<Vec<u8>>> {
        self.ctx
            .query_screenshot(&self.selector, self.index)
            .await
    }
}

/// Source of browser contexts.
///
/// The pool implements this for production; the static browser implements it
/// for tests. Contexts are private to one task and returned via `close`.
#[async_trait]
pub trait BrowserProvider: Send + Sync {
    async fn acquire(
        &self,
        profile: Option<&BrowserProfile>,
    ) -> CrawlResult<Box<dyn BrowserContext>>;
}
