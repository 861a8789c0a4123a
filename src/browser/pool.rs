//! Pre-warmed Chrome browser pool with dynamic scaling.
//!
//! Maintains a pool of launched browsers so task handlers get a page without
//! paying launch latency. Pool size scales to `max(in_use + 2, min)`. A
//! profile carrying a proxy gets a dedicated browser instead of a pooled one;
//! Chrome proxies are process-scoped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::chromium::ChromiumContext;
use crate::browser::launch::launch_browser;
use crate::browser::{
    BrowserContext, BrowserProfile, BrowserProvider, LoadState, PageResponse, SelectorState,
};
use crate::error::{CrawlError, CrawlResult};

#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Minimum browsers to keep warm (default: 2)
    pub min_pool_size: usize,
    /// Maximum browsers allowed (default: 10)
    pub max_pool_size: usize,
    /// Interval between keepalive pings (default: 30s)
    pub keepalive_interval: Duration,
    /// Remove browsers idle longer than this (default: 5 minutes)
    pub idle_timeout: Duration,
    pub headless: bool,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 2,
            max_pool_size: 10,
            keepalive_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            headless: true,
        }
    }
}

/// A launched browser with pool metadata
struct PooledBrowser {
    id: u64,
    browser: Browser,
    handler: JoinHandle<()>,
    last_used: Instant,
}

impl Drop for PooledBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

struct PoolShared {
    config: BrowserPoolConfig,
    available: Mutex<VecDeque<PooledBrowser>>,
    in_use_count: AtomicUsize,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl PoolShared {
    fn target_pool_size(&self) -> usize {
        let in_use = self.in_use_count.load(Ordering::Relaxed);
        (in_use + 2)
            .max(self.config.min_pool_size)
            .min(self.config.max_pool_size)
    }

    async fn launch_pooled(&self) -> CrawlResult<PooledBrowser> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (browser, handler) = launch_browser(self.config.headless, None)
            .await
            .map_err(|e| CrawlError::Browser(format!("launch: {e:#}")))?;
        Ok(PooledBrowser {
            id,
            browser,
            handler,
            last_used: Instant::now(),
        })
    }

    async fn scale_to_target(&self) -> CrawlResult<()> {
        let target = self.target_pool_size();
        let current = self.available.lock().await.len();
        if current >= target {
            return Ok(());
        }

        let to_launch = target - current;
        debug!("scaling pool: launching {to_launch} browsers (current={current}, target={target})");
        for _ in 0..to_launch {
            match self.launch_pooled().await {
                Ok(browser) => self.available.lock().await.push_back(browser),
                Err(e) => warn!("failed to launch browser for pool: {e}"),
            }
        }
        Ok(())
    }
}

pub struct BrowserPool {
    shared: Arc<PoolShared>,
    scaler_handle: Mutex<Option<JoinHandle<()>>>,
    keepalive_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserPool {
    #[must_use]
    pub fn new(config: BrowserPoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                available: Mutex::new(VecDeque::new()),
                in_use_count: AtomicUsize::new(0),
                next_id: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
            scaler_handle: Mutex::new(None),
            keepalive_handle: Mutex::new(None),
        }
    }

    /// Pre-warm the pool and start the scaler and keepalive loops
    pub async fn start(&self) -> CrawlResult<()> {
        info!("starting browser pool: {:?}", self.shared.config);
        self.shared.scale_to_target().await?;

        let shared = Arc::clone(&self.shared);
        *self.scaler_handle.lock().await = Some(tokio::spawn(scaler_loop(shared)));

        let shared = Arc::clone(&self.shared);
        *self.keepalive_handle.lock().await = Some(tokio::spawn(keepalive_loop(shared)));

        info!(
            "browser pool started with {} pre-warmed browsers",
            self.shared.available.lock().await.len()
        );
        Ok(())
    }

    /// Close every pooled browser and stop the background loops
    pub async fn shutdown(&self) {
        info!("shutting down browser pool");
        self.shared.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.scaler_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.keepalive_handle.lock().await.take() {
            handle.abort();
        }

        let mut available = self.shared.available.lock().await;
        while let Some(mut pooled) = available.pop_front() {
            if let Err(e) = pooled.browser.close().await {
                warn!("failed to close browser {}: {}", pooled.id, e);
            }
            let _ = pooled.browser.wait().await;
        }
        info!("browser pool shutdown complete");
    }
}

#[async_trait]
impl BrowserProvider for BrowserPool {
    async fn acquire(
        &self,
        profile: Option<&BrowserProfile>,
    ) -> CrawlResult<Box<dyn BrowserContext>> {
        // Proxied profiles get a dedicated browser
        if let Some(proxy) = profile.and_then(|p| p.proxy_url.as_deref()) {
            let (browser, handler) = launch_browser(self.shared.config.headless, Some(proxy))
                .await
                .map_err(|e| CrawlError::Browser(format!("proxied launch: {e:#}")))?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| CrawlError::Browser(format!("new page: {e}")))?;
            let inner = ChromiumContext::bind(page, profile).await?;
            return Ok(Box::new(DedicatedContext {
                inner,
                browser: Mutex::new(Some(browser)),
                handler,
            }));
        }

        loop {
            let pooled = {
                let mut available = self.shared.available.lock().await;
                available.pop_front()
            };

            let pooled = match pooled {
                Some(mut pooled) => {
                    // Health check before handing out
                    match pooled.browser.version().await {
                        Ok(_) => {
                            pooled.last_used = Instant::now();
                            pooled
                        }
                        Err(e) => {
                            warn!("browser {} failed acquire health check: {}", pooled.id, e);
                            continue;
                        }
                    }
                }
                None => {
                    let total = self.shared.in_use_count.load(Ordering::Relaxed)
                        + self.shared.available.lock().await.len();
                    if total >= self.shared.config.max_pool_size {
                        warn!(
                            "browser pool at max capacity ({}), waiting",
                            self.shared.config.max_pool_size
                        );
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                    self.shared.launch_pooled().await?
                }
            };

            self.shared.in_use_count.fetch_add(1, Ordering::Relaxed);
            debug!("acquired browser {} from pool", pooled.id);

            let page = match pooled.browser.new_page("about:blank").await {
                Ok(page) => page,
                Err(e) => {
                    // Broken checkout: drop the browser, try again
                    self.shared.in_use_count.fetch_sub(1, Ordering::Relaxed);
                    warn!("browser {} could not open a page: {}", pooled.id, e);
                    continue;
                }
            };
            let inner = ChromiumContext::bind(page, profile).await?;

            return Ok(Box::new(PooledContext {
                inner,
                slot: parking_lot::Mutex::new(Some(pooled)),
                shared: Arc::clone(&self.shared),
            }));
        }
    }
}

/// Context over a pooled browser; the browser returns to the pool on close
struct PooledContext {
    inner: ChromiumContext,
    slot: parking_lot::Mutex<Option<PooledBrowser>>,
    shared: Arc<PoolShared>,
}

impl PooledContext {
    fn release(&self) {
        if let Some(mut pooled) = self.slot.lock().take() {
            pooled.last_used = Instant::now();
            self.shared.in_use_count.fetch_sub(1, Ordering::Relaxed);
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let id = pooled.id;
                shared.available.lock().await.push_back(pooled);
                debug!("released browser {id} back to pool");
            });
        }
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        self.release();
    }
}

/// Context over a dedicated (proxied) browser; closed for good on close
struct DedicatedContext {
    inner: ChromiumContext,
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
}

impl Drop for DedicatedContext {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

macro_rules! delegate_context {
    ($ty:ident) => {
        #[async_trait]
        impl BrowserContext for $ty {
            async fn navigate(&self, url: &str) -> CrawlResult<PageResponse> {
                self.inner.navigate(url).await
            }
            async fn current_url(&self) -> CrawlResult<String> {
                self.inner.current_url().await
            }
            async fn content(&self) -> CrawlResult<String> {
                self.inner.content().await
            }
            async fn query_count(&self, selector: &str) -> CrawlResult<usize> {
                self.inner.query_count(selector).await
            }
            async fn query_text(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>> {
                self.inner.query_text(selector, nth).await
            }
            async fn query_attribute(
                &self,
                selector: &str,
                nth: usize,
                name: &str,
            ) -> CrawlResult<Option<String>> {
                self.inner.query_attribute(selector, nth, name).await
            }
            async fn query_html(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>> {
                self.inner.query_html(selector, nth).await
            }
            async fn click(&self, selector: &str) -> CrawlResult<()> {
                self.inner.click(selector).await
            }
            async fn click_at(&self, x: f64, y: f64) -> CrawlResult<()> {
                self.inner.click_at(x, y).await
            }
            async fn hover(&self, selector: &str) -> CrawlResult<()> {
                self.inner.hover(selector).await
            }
            async fn type_text(&self, selector: &str, text: &str) -> CrawlResult<()> {
                self.inner.type_text(selector, text).await
            }
            async fn scroll(&self, selector: Option<&str>, delta_y: i64) -> CrawlResult<()> {
                self.inner.scroll(selector, delta_y).await
            }
            async fn wait_for_selector(
                &self,
                selector: &str,
                state: SelectorState,
                bound: Duration,
            ) -> CrawlResult<()> {
                self.inner.wait_for_selector(selector, state, bound).await
            }
            async fn wait_for_load_state(
                &self,
                state: LoadState,
                bound: Duration,
            ) -> CrawlResult<()> {
                self.inner.wait_for_load_state(state, bound).await
            }
            async fn evaluate(&self, script: &str) -> CrawlResult<serde_json::Value> {
                self.inner.evaluate(script).await
            }
            async fn query_screenshot(
                &self,
                selector: &str,
                nth: usize,
            ) -> CrawlResult<Option<Vec<u8>>> {
                self.inner.query_screenshot(selector, nth).await
            }
            async fn screenshot(&self) -> CrawlResult<Vec<u8>> {
                self.inner.screenshot().await
            }
            async fn close(&self) -> CrawlResult<()> {
                self.close_impl().await
            }
        }
    };
}

impl PooledContext {
    async fn close_impl(&self) -> CrawlResult<()> {
        self.inner.close().await?;
        self.release();
        Ok(())
    }
}

impl DedicatedContext {
    async fn close_impl(&self) -> CrawlResult<()> {
        self.inner.close().await?;
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("failed to close dedicated browser: {e}");
            }
            let _ = browser.wait().await;
        }
        Ok(())
    }
}

delegate_context!(PooledContext);
delegate_context!(DedicatedContext);

/// Scale to target every 5 seconds and trim idle browsers beyond the minimum
async fn scaler_loop(shared: Arc<PoolShared>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    while !shared.shutdown.load(Ordering::Relaxed) {
        interval.tick().await;

        if let Err(e) = shared.scale_to_target().await {
            warn!("pool scaler error: {e}");
        }

        let mut available = shared.available.lock().await;
        let now = Instant::now();
        while available.len() > shared.config.min_pool_size {
            match available.front() {
                Some(browser) if now.duration_since(browser.last_used) > shared.config.idle_timeout => {
                    if let Some(removed) = available.pop_front() {
                        debug!(
                            "removing idle browser {} (idle {:?})",
                            removed.id,
                            now.duration_since(removed.last_used)
                        );
                    }
                }
                _ => break,
            }
        }
    }
    debug!("scaler loop exiting");
}

/// Ping every pooled browser; drop the ones that stopped responding
async fn keepalive_loop(shared: Arc<PoolShared>) {
    let mut interval = tokio::time::interval(shared.config.keepalive_interval);
    while !shared.shutdown.load(Ordering::Relaxed) {
        interval.tick().await;

        let mut available = shared.available.lock().await;
        let mut healthy = VecDeque::new();
        while let Some(browser) = available.pop_front() {
            match browser.browser.version().await {
                Ok(_) => healthy.push_back(browser),
                Err(e) => warn!("browser {} failed keepalive: {}", browser.id, e),
            }
        }
        *available = healthy;
        debug!("keepalive complete: {} healthy browsers", available.len());
    }
    debug!("keepalive loop exiting");
}
