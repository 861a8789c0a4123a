//! Chromium-backed page context.
//!
//! Wraps a chromiumoxide `Page`, captures the main-document HTTP status via
//! a CDP network listener around navigation, and applies profile overrides
//! (user agent, metrics, timezone, geolocation, navigator properties)
//! before the first navigation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetGeolocationOverrideParams, SetLocaleOverrideParams,
    SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::browser::{
    BrowserContext, BrowserProfile, LoadState, PageResponse, SelectorState,
};
use crate::error::{CrawlError, CrawlResult};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_CAPTURE_WINDOW: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound timeout wrapper distinguishing timeouts from operation failures
async fn with_page_timeout<F, T>(
    operation: F,
    bound: Duration,
    operation_name: &str,
) -> CrawlResult<T>
where
    F: Future<Output = CrawlResult<T>>,
{
    match timeout(bound, operation).await {
        Ok(result) => result,
        Err(_) => Err(CrawlError::Timeout(format!(
            "{operation_name} after {}s",
            bound.as_secs()
        ))),
    }
}

fn cdp_err(e: impl std::fmt::Display) -> CrawlError {
    CrawlError::Browser(e.to_string())
}

pub struct ChromiumContext {
    page: Page,
}

impl ChromiumContext {
    /// Wrap a fresh page and apply the profile before any navigation
    pub async fn bind(page: Page, profile: Option<&BrowserProfile>) -> CrawlResult<Self> {
        let ctx = Self { page };
        if let Some(profile) = profile {
            ctx.apply_profile(profile).await?;
        }
        Ok(ctx)
    }

    async fn apply_profile(&self, profile: &BrowserProfile) -> CrawlResult<()> {
        if let Some(user_agent) = &profile.user_agent {
            self.page
                .set_user_agent(user_agent.as_str())
                .await
                .map_err(cdp_err)?;
        }

        if let Some(viewport) = &profile.viewport {
            let params = SetDeviceMetricsOverrideParams::builder()
                .width(i64::from(viewport.width))
                .height(i64::from(viewport.height))
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(cdp_err)?;
            self.page.execute(params).await.map_err(cdp_err)?;
        }

        if let Some(timezone) = &profile.timezone {
            let params = SetTimezoneOverrideParams::builder()
                .timezone_id(timezone.clone())
                .build()
                .map_err(cdp_err)?;
            self.page.execute(params).await.map_err(cdp_err)?;
        }

        if let Some(locale) = &profile.locale {
            let params = SetLocaleOverrideParams::builder()
                .locale(locale.clone())
                .build();
            self.page.execute(params).await.map_err(cdp_err)?;
        }

        if let Some(geo) = &profile.geolocation {
            let params = SetGeolocationOverrideParams::builder()
                .latitude(geo.latitude)
                .longitude(geo.longitude)
                .accuracy(1.0)
                .build();
            self.page.execute(params).await.map_err(cdp_err)?;
        }

        if !profile.fingerprint_overrides.is_empty() {
            let mut script = String::new();
            for (property, value) in &profile.fingerprint_overrides {
                let value_json = serde_json::to_string(value)
                    .map_err(|e| CrawlError::Parse(e.to_string()))?;
                script.push_str(&format!(
                    "Object.defineProperty(navigator, '{property}', {{ get: () => {value_json} }});\n"
                ));
            }
            self.page
                .evaluate_on_new_document(script)
                .await
                .map_err(cdp_err)?;
        }

        Ok(())
    }

    async fn nth_element(
        &self,
        selector: &str,
        nth: usize,
    ) -> CrawlResult<Option<chromiumoxide::element::Element>> {
        let mut elements = self.page.find_elements(selector).await.map_err(cdp_err)?;
        if nth < elements.len() {
            Ok(Some(elements.swap_remove(nth)))
        } else {
            Ok(None)
        }
    }

    async fn require_element(
        &self,
        selector: &str,
    ) -> CrawlResult<chromiumoxide::element::Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| CrawlError::Extraction(format!("selector {selector}: {e}")))
    }

    /// True when the first match has a visible box
    async fn is_visible(&self, selector: &str) -> CrawlResult<bool> {
        let selector_json =
            serde_json::to_string(selector).map_err(|e| CrawlError::Parse(e.to_string()))?;
        let script = format!(
            "(() => {{ const el = document.querySelector({selector_json}); \
             return el !== null && el.offsetWidth > 0 && el.offsetHeight > 0; }})()"
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn navigate(&self, url: &str) -> CrawlResult<PageResponse> {
        // Listen for the document response so the HTTP status is known;
        // goto alone does not surface it
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_err)?;

        with_page_timeout(
            async {
                self.page.goto(url).await.map_err(|e| {
                    CrawlError::Network(format!("navigation to {url} failed: {e}"))
                })?;
                Ok(())
            },
            NAVIGATION_TIMEOUT,
            "page navigation",
        )
        .await?;

        with_page_timeout(
            async {
                self.page
                    .wait_for_navigation()
                    .await
                    .map_err(|e| CrawlError::Network(format!("page load failed: {e}")))?;
                Ok(())
            },
            NAVIGATION_TIMEOUT,
            "page load",
        )
        .await?;

        // The document event usually arrived during the load; scan briefly
        let status = timeout(STATUS_CAPTURE_WINDOW, async {
            while let Some(event) = responses.next().await {
                if event.r#type == ResourceType::Document {
                    return Some(event.response.status as u16);
                }
            }
            None
        })
        .await
        .unwrap_or_else(|_| {
            debug!("no document response observed for {url}");
            None
        });

        let final_url = self.current_url().await?;
        Ok(PageResponse { status, final_url })
    }

    async fn current_url(&self) -> CrawlResult<String> {
        self.page
            .url()
            .await
            .map_err(cdp_err)?
            .ok_or_else(|| CrawlError::Browser("page has no url".into()))
    }

    async fn content(&self) -> CrawlResult<String> {
        self.page.content().await.map_err(cdp_err)
    }

    async fn query_count(&self, selector: &str) -> CrawlResult<usize> {
        match self.page.find_elements(selector).await {
            Ok(elements) => Ok(elements.len()),
            // No matches surfaces as an error in CDP; treat as zero
            Err(e) => {
                debug!("find_elements {selector}: {e}");
                Ok(0)
            }
        }
    }

    async fn query_text(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>> {
        let Some(element) = self.nth_element(selector, nth).await? else {
            return Ok(None);
        };
        element.inner_text().await.map_err(cdp_err)
    }

    async fn query_attribute(
        &self,
        selector: &str,
        nth: usize,
        name: &str,
    ) -> CrawlResult<Option<String>> {
        let Some(element) = self.nth_element(selector, nth).await? else {
            return Ok(None);
        };
        element.attribute(name).await.map_err(cdp_err)
    }

    async fn query_html(&self, selector: &str, nth: usize) -> CrawlResult<Option<String>> {
        let Some(element) = self.nth_element(selector, nth).await? else {
            return Ok(None);
        };
        element.inner_html().await.map_err(cdp_err)
    }

    async fn click(&self, selector: &str) -> CrawlResult<()> {
        let element = self.require_element(selector).await?;
        element.click().await.map_err(cdp_err)?;
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> CrawlResult<()> {
        self.page
            .click(chromiumoxide::layout::Point { x, y })
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn hover(&self, selector: &str) -> CrawlResult<()> {
        let element = self.require_element(selector).await?;
        element.scroll_into_view().await.map_err(cdp_err)?;
        let point = element.clickable_point().await.map_err(cdp_err)?;
        self.page.move_mouse(point).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> CrawlResult<()> {
        let element = self.require_element(selector).await?;
        element.click().await.map_err(cdp_err)?;
        element.type_str(text).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn scroll(&self, selector: Option<&str>, delta_y: i64) -> CrawlResult<()> {
        match selector {
            Some(selector) => {
                let element = self.require_element(selector).await?;
                element.scroll_into_view().await.map_err(cdp_err)?;
            }
            None => {
                self.evaluate(&format!("window.scrollBy(0, {delta_y})"))
                    .await?;
            }
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        bound: Duration,
    ) -> CrawlResult<()> {
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            let satisfied = match state {
                SelectorState::Attached => self.query_count(selector).await? > 0,
                SelectorState::Visible => self.is_visible(selector).await?,
                SelectorState::Hidden => !self.is_visible(selector).await?,
            };
            if satisfied {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::Timeout(format!(
                    "selector {selector} did not become {state:?} within {}s",
                    bound.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_load_state(&self, state: LoadState, bound: Duration) -> CrawlResult<()> {
        let target = match state {
            LoadState::DomContentLoaded => "interactive",
            LoadState::Load | LoadState::NetworkIdle => "complete",
        };
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            let ready: String = self
                .evaluate("document.readyState")
                .await?
                .as_str()
                .unwrap_or_default()
                .to_string();
            let satisfied = match target {
                "interactive" => ready == "interactive" || ready == "complete",
                _ => ready == "complete",
            };
            if satisfied {
                if state == LoadState::NetworkIdle {
                    // Approximation: a settle window after load
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::Timeout(format!(
                    "load state {state:?} not reached within {}s",
                    bound.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&self, script: &str) -> CrawlResult<serde_json::Value> {
        let result = self.page.evaluate(script).await.map_err(cdp_err)?;
        result
            .into_value()
            .map_err(|e| CrawlError::Parse(format!("evaluate result: {e}")))
    }

    async fn query_screenshot(
        &self,
        selector: &str,
        nth: usize,
    ) -> CrawlResult<Option<Vec<u8>>> {
        let Some(element) = self.nth_element(selector, nth).await? else {
            return Ok(None);
        };
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map(Some)
            .map_err(cdp_err)
    }

    async fn screenshot(&self) -> CrawlResult<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(cdp_err)
    }

    async fn close(&self) -> CrawlResult<()> {
        if let Err(e) = self.page.clone().close().await {
            warn!("failed to close page: {e}");
        }
        Ok(())
    }
}
