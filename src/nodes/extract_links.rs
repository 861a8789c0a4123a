//! Link extraction node.
//!
//! Collects `href` values under a selector, resolves them against the
//! current page, filters and dedups them within the call, and surfaces the
//! remainder as discovered URLs tagged with the node's declared marker.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use url::Url;

use crate::browser::Locator;
use crate::error::{CrawlError, CrawlResult};
use crate::model::NodeConfig;
use crate::nodes::params::ExtractLinksParams;
use crate::nodes::{DiscoveredUrl, NodeCtx, NodeExecutor, NodeOutput, parse_params};
use crate::utils::resolve_href;

pub struct ExtractLinksNode;

#[async_trait]
impl NodeExecutor for ExtractLinksNode {
    fn kind(&self) -> &'static str {
        "extract_links"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<ExtractLinksParams>(params)?.validate()
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: ExtractLinksParams = parse_params(&config.params)?;
        params.validate()?;

        let base = Url::parse(&ctx.browser.current_url().await?)
            .map_err(|e| CrawlError::Parse(format!("current url: {e}")))?;

        let links = collect_links(ctx.browser, &params, &base).await?;

        let discovered: Vec<DiscoveredUrl> = links
            .iter()
            .map(|url| DiscoveredUrl {
                url: url.clone(),
                marker: params.marker.clone(),
            })
            .collect();

        let mut output = NodeOutput::with_result(json!({ "links": links }));
        output.metadata = Some(json!({ "count": discovered.len() }));
        output.discovered_urls = discovered;
        Ok(output)
    }
}

/// Shared by extract_links and paginate: pull hrefs under a selector,
/// absolute-resolve, filter, dedup, cap at `limit` (0 = unbounded)
pub(crate) async fn collect_links(
    browser: &dyn crate::browser::BrowserContext,
    params: &ExtractLinksParams,
    base: &Url,
) -> CrawlResult<Vec<String>> {
    let include = compile_pattern(params.filter.as_ref().and_then(|f| f.pattern.as_deref()))?;
    let exclude = compile_pattern(
        params
            .filter
            .as_ref()
            .and_then(|f| f.exclude_pattern.as_deref()),
    )?;

    let anchors = Locator::new(browser, &params.selector);
    let count = anchors.count().await?;
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for nth in 0..count {
        if params.limit > 0 && links.len() >= params.limit {
            break;
        }
        let Some(href) = anchors.nth(nth).attribute("href").await? else {
            continue;
        };
        let Some(resolved) = resolve_href(base, &href) else {
            continue;
        };
        if let Some(include) = &include
            && !include.is_match(&resolved)
        {
            continue;
        }
        if let Some(exclude) = &exclude
            && exclude.is_match(&resolved)
        {
            continue;
        }
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }

    Ok(links)
}

fn compile_pattern(pattern: Option<&str>) -> CrawlResult<Option<Regex>> {
    pattern
        .map(|p| Regex::new(p).map_err(|e| CrawlError::Config(format!("bad link pattern: {e}"))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserProvider, StaticBrowser, StaticSite};
    use serde_json::json;
    use std::sync::Arc;

    async fn page_links(html: &str, params: ExtractLinksParams) -> Vec<String> {
        let site = StaticSite::new();
        site.add_page("https://site.test/list", html);
        let browser = StaticBrowser::new(Arc::new(site));
        let ctx = browser.acquire(None).await.expect("acquire");
        ctx.navigate("https://site.test/list").await.expect("navigate");
        let base = Url::parse("https://site.test/list").expect("base");
        collect_links(ctx.as_ref(), &params, &base).await.expect("collect")
    }

    fn params(selector: &str) -> ExtractLinksParams {
        serde_json::from_value(json!({ "selector": selector })).expect("params")
    }

    #[tokio::test]
    async fn resolves_and_dedups() {
        let html = r#"<a href="/p/1">a</a> <a href="/p/2">b</a> <a href="/p/1#frag">dup</a>"#;
        let links = page_links(html, params("a")).await;
        assert_eq!(
            links,
            vec!["https://site.test/p/1", "https://site.test/p/2"]
        );
    }

    #[tokio::test]
    async fn limit_caps_output() {
        let html = r#"<a href="/p/1">a</a> <a href="/p/2">b</a> <a href="/p/3">c</a>"#;
        let mut p = params("a");
        p.limit = 2;
        assert_eq!(page_links(html, p).await.len(), 2);
    }

    #[tokio::test]
    async fn patterns_filter() {
        let html = r#"<a href="/p/1">a</a> <a href="/cart">b</a>"#;
        let p: ExtractLinksParams = serde_json::from_value(json!({
            "selector": "a",
            "filter": { "pattern": "/p/", "exclude_pattern": "cart" }
        }))
        .expect("params");
        assert_eq!(page_links(html, p).await, vec!["https://site.test/p/1"]);
    }

    #[tokio::test]
    async fn skips_non_http_targets() {
        let html = r#"<a href="mailto:x@y.z">m</a> <a href="javascript:void(0)">j</a> <a href="/ok">k</a>"#;
        assert_eq!(page_links(html, params("a")).await, vec!["https://site.test/ok"]);
    }
}
