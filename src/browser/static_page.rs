//! Static-page browser: canned documents behind the `BrowserContext` trait.
//!
//! Backs tests and extraction unit work. Pages are registered per URL as a
//! sequence of responses; each navigation consumes the next response and the
//! final one repeats, which lets retry scenarios serve a 503 first and a 200
//! afterwards. Anchor clicks follow hrefs, so pagination flows work too.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use scraper::{Html, Selector};
use url::Url;

use crate::browser::{
    BrowserContext, BrowserProfile, BrowserProvider, LoadState, PageResponse, SelectorState,
};
use crate::error::{CrawlError, CrawlResult};
use crate::utils::canonicalize_url;

#[derive(Debug, Clone)]
pub struct StaticPage {
    pub status: u16,
    pub html: String,
}

/// Shared registry of canned pages, keyed by canonical URL
#[derive(Default)]
pub struct StaticSite {
    pages: DashMap<String, Mutex<VecDeque<StaticPage>>>,
}

impl StaticSite {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page that always serves 200
    pub fn add_page(&self, url: &str, html: &str) {
        self.add_response(url, 200, html);
    }

    /// Append a response to the URL's sequence; the last response repeats
    pub fn add_response(&self, url: &str, status: u16, html: &str) {
        let key = canonicalize_url(url).unwrap_or_else(|_| url.to_string());
        self.pages
            .entry(key)
            .or_default()
            .lock()
            .push_back(StaticPage {
                status,
                html: html.to_string(),
            });
    }

    fn fetch(&self, canonical: &str) -> Option<StaticPage> {
        let entry = self.pages.get(canonical)?;
        let mut responses = entry.lock();
        if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        }
    }
}

/// `BrowserProvider` over a shared static site
pub struct StaticBrowser {
    site: Arc<StaticSite>,
}

impl StaticBrowser {
    #[must_use]
    pub fn new(site: Arc<StaticSite>) -> Self {
        Self { site }
    }
}

#[async_trait]
impl BrowserProvider for StaticBrowser {
    async fn acquire(
        &self,
        _profile: Option<&BrowserProfile>,
    ) -> CrawlResult<Box<dyn BrowserContext>> {
        Ok(Box::new(StaticContext {
            site: Arc::clone(&self.site),
            current: Mutex::new(None),
        }))
    }
}

struct CurrentPage {
    url: String,
    html: String,
}

pub struct StaticContext {
    site: Arc<StaticSite>,
    current: Mutex<Option<CurrentPage>>,
}

impl StaticContext {
    /// Run a closure against the parsed current document.
    ///
    /// The parsed `Html` never crosses an await point; scraper documents are
    /// not `Send`.
    fn with_document<R>(&self, f: impl FnOnce(&Url, &Html) -> CrawlResult<R>) -> CrawlResult<R> {
        let current = self.current.lock();
        let page = current
            .as_ref()
            .ok_or_else(|| CrawlError::Browser("no page loaded".into()))?;
        let base = Url::parse(&page.url).map_err(|e| CrawlError::Parse(e.to_string()))?;
        let document = Html::parse_document(&page.html);
        f(&base, &document)
    }

    fn parse_selector(selector: &str) -> CrawlResult<Selector> {
        Selector::parse(selector)
            .map_err(|e| CrawlError::Extraction(format!("selector {selector}: {e}")))
    }
}

#[async_trait]
impl BrowserContext for StaticContext {
    async fn navigate(&self, url: &str) -> CrawlResult<PageResponse> {
        let canonical = canonicalize_url(url)?;
        let page = self
            .site
            .fetch(&canonical)
            .ok_or_else(|| CrawlError::Network(format!("no route to {canonical}")))?;

        *self.current.lock() = Some(CurrentPage {
            url: canonical.clone(),
            html: page.html,
        });
        Ok(PageResponse {
            status: Some(page.status),
            final_url: canonical,
        })
    }

    async fn current_url(&self) -> CrawlResult<String> {
        let current = self.current.lock();
        current
            .as_ref()
            .map(|p| p.url.clone())
            .ok_or_else(|| CrawlError::Browser("no page loaded".into()))
    }

    async fn content(&self) -> CrawlResult<String> {
        let current = self.current.lock();
        current
            .as_ref()
            .map(|p| p.html.clone())
            .ok_or_else(|| CrawlError::Browser("no page loaded".into()))
    }

    async fn query_count(&self, selector: &str) -> CrawlResult<usize> {
        let selector = Self::parse_selector(selector)?;
        self.with_document(|_, doc| Ok(doc.select(&selector).count()))
    }

    async fn query_text(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>> {
        let selector = Self::parse_selector(selector)?;
        self.with_document(|_, doc| {
            Ok(doc
                .select(&selector)
                .nth(nth)
                .map(|el| el.text().collect::<String>().trim().to_string()))
        })
    }

    async fn query_attribute(
        &self,
        selector: &str,
        nth: usize,
        name: &str,
    ) -> CrawlResult<Option<String>> {
        let selector = Self::parse_selector(selector)?;
        self.with_document(|_, doc| {
            Ok(doc
                .select(&selector)
                .nth(nth)
                .and_then(|el| el.value().attr(name).map(ToString::to_string)))
        })
    }

    async fn query_html(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>> {
        let selector = Self::parse_selector(selector)?;
        self.with_document(|_, doc| {
            Ok(doc.select(&selector).nth(nth).map(|el| el.inner_html()))
        })
    }

    async fn click(&self, selector: &str) -> CrawlResult<()> {
        let parsed = Self::parse_selector(selector)?;
        let target = self.with_document(|base, doc| {
            let element = doc.select(&parsed).next().ok_or_else(|| {
                CrawlError::Extraction(format!("selector {selector} matched nothing"))
            })?;
            Ok(element
                .value()
                .attr("href")
                .and_then(|href| crate::utils::resolve_href(base, href)))
        })?;

        // Anchor clicks navigate; anything else is a no-op in a static page
        if let Some(target) = target {
            self.navigate(&target).await?;
        }
        Ok(())
    }

    async fn click_at(&self, _x: f64, _y: f64) -> CrawlResult<()> {
        Ok(())
    }

    async fn hover(&self, selector: &str) -> CrawlResult<()> {
        if self.query_count(selector).await? == 0 {
            return Err(CrawlError::Extraction(format!(
                "selector {selector} matched nothing"
            )));
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, _text: &str) -> CrawlResult<()> {
        if self.query_count(selector).await? == 0 {
            return Err(CrawlError::Extraction(format!(
                "selector {selector} matched nothing"
            )));
        }
        Ok(())
    }

    async fn scroll(&self, _selector: Option<&str>, _delta_y: i64) -> CrawlResult<()> {
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        bound: Duration,
    ) -> CrawlResult<()> {
        // Static documents never change; evaluate once
        let present = self.query_count(selector).await? > 0;
        let satisfied = match state {
            SelectorState::Attached | SelectorState::Visible => present,
            SelectorState::Hidden => !present,
        };
        if satisfied {
            Ok(())
        } else {
            Err(CrawlError::Timeout(format!(
                "selector {selector} did not become {state:?} within {}s",
                bound.as_secs()
            )))
        }
    }

    async fn wait_for_load_state(&self, _state: LoadState, _bound: Duration) -> CrawlResult<()> {
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> CrawlResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn query_screenshot(
        &self,
        selector: &str,
        nth: usize,
    ) -> CrawlResult<Option<Vec<u8>>> {
        if self.query_count(selector).await? <= nth {
            return Ok(None);
        }
        Ok(Some(vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]))
    }

    async fn screenshot(&self) -> CrawlResult<Vec<u8>> {
        // PNG magic only; enough for callers that just persist bytes
        Ok(vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])
    }

    async fn close(&self) -> CrawlResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_HTML: &str = r#"
        <html><body>
          <h1>Products</h1>
          <div class="card"><a href="/p/1">One</a></div>
          <div class="card"><a href="/p/2">Two</a></div>
          <a class="next" href="/list?page=2">Next</a>
        </body></html>
    "#;

    fn site() -> Arc<StaticSite> {
        let site = StaticSite::new();
        site.add_page("https://site.test/list", LIST_HTML);
        site.add_page(
            "https://site.test/list?page=2",
            r#"<html><body><h1>Page 2</h1></body></html>"#,
        );
        Arc::new(site)
    }

    #[tokio::test]
    async fn navigate_and_query() {
        let browser = StaticBrowser::new(site());
        let ctx = browser.acquire(None).await.expect("acquire context");
        let response = ctx
            .navigate("https://site.test/list")
            .await
            .expect("navigate");
        assert_eq!(response.status, Some(200));

        assert_eq!(ctx.query_count(".card a").await.expect("count"), 2);
        assert_eq!(
            ctx.query_text("h1", 0).await.expect("text").as_deref(),
            Some("Products")
        );
        assert_eq!(
            ctx.query_attribute(".card a", 1, "href")
                .await
                .expect("attr")
                .as_deref(),
            Some("/p/2")
        );
    }

    #[tokio::test]
    async fn locator_narrows_and_reads() {
        use crate::browser::Locator;

        let browser = StaticBrowser::new(site());
        let ctx = browser.acquire(None).await.expect("acquire context");
        ctx.navigate("https://site.test/list").await.expect("navigate");

        let cards = Locator::new(ctx.as_ref(), ".card a");
        assert_eq!(cards.count().await.expect("count"), 2);
        assert_eq!(
            cards.nth(1).text().await.expect("text").as_deref(),
            Some("Two")
        );
        assert_eq!(
            cards.nth(0).attribute("href").await.expect("attr").as_deref(),
            Some("/p/1")
        );
        assert!(
            cards
                .nth(0)
                .screenshot()
                .await
                .expect("screenshot")
                .is_some()
        );
        assert!(
            cards
                .nth(5)
                .screenshot()
                .await
                .expect("screenshot")
                .is_none()
        );
    }

    #[tokio::test]
    async fn anchor_click_navigates() {
        let browser = StaticBrowser::new(site());
        let ctx = browser.acquire(None).await.expect("acquire context");
        ctx.navigate("https://site.test/list").await.expect("navigate");
        ctx.click(".next").await.expect("click next");
        assert_eq!(
            ctx.current_url().await.expect("url"),
            "https://site.test/list?page=2"
        );
    }

    #[tokio::test]
    async fn response_sequences_pop_until_last() {
        let site = StaticSite::new();
        site.add_response("https://site.test/flaky", 503, "<html></html>");
        site.add_response("https://site.test/flaky", 200, "<html><h1>ok</h1></html>");
        let browser = StaticBrowser::new(Arc::new(site));
        let ctx = browser.acquire(None).await.expect("acquire context");

        let first = ctx.navigate("https://site.test/flaky").await.expect("nav");
        assert_eq!(first.status, Some(503));
        let second = ctx.navigate("https://site.test/flaky").await.expect("nav");
        assert_eq!(second.status, Some(200));
        let third = ctx.navigate("https://site.test/flaky").await.expect("nav");
        assert_eq!(third.status, Some(200));
    }
}
