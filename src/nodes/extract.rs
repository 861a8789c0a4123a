//! Field-map extraction node.
//!
//! Produces one `RawItem` per root-selector match (one item total when no
//! root selector is given), with each field pulled by its own selector as
//! text, an attribute, or inner HTML.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::browser::{BrowserContext, Locator};
use crate::error::{CrawlError, CrawlResult};
use crate::model::NodeConfig;
use crate::nodes::params::{ExtractParams, FieldKind, FieldSpec, FieldTransform};
use crate::nodes::{NodeCtx, NodeExecutor, NodeOutput, RawItem, parse_params};

pub struct ExtractNode;

#[async_trait]
impl NodeExecutor for ExtractNode {
    fn kind(&self) -> &'static str {
        "extract"
    }

    fn validate(&self, params: &serde_json::Value) -> CrawlResult<()> {
        parse_params::<ExtractParams>(params)?.validate()
    }

    async fn execute(&self, ctx: &NodeCtx<'_>, config: &NodeConfig) -> CrawlResult<NodeOutput> {
        let params: ExtractParams = parse_params(&config.params)?;
        params.validate()?;

        let items = match &params.selector {
            // Scoped: one item per root match
            Some(root) => {
                let count = Locator::new(ctx.browser, root).count().await?;
                let mut items = Vec::with_capacity(count);
                for nth in 0..count {
                    let fields =
                        extract_fields(ctx.browser, &params, Some((root.as_str(), nth))).await?;
                    items.push(RawItem {
                        item_type: params.item_type.clone(),
                        fields,
                    });
                }
                items
            }
            // Whole-page: a single item
            None => {
                let fields = extract_fields(ctx.browser, &params, None).await?;
                vec![RawItem {
                    item_type: params.item_type.clone(),
                    fields,
                }]
            }
        };

        if items.iter().all(|item| item.fields.is_empty()) {
            return Err(CrawlError::Extraction(format!(
                "no field matched on {}",
                ctx.item.url
            )));
        }

        let mut output = NodeOutput::with_result(json!({ "count": items.len() }));
        output.extracted_items = items;
        Ok(output)
    }
}

/// Pull every field of the map, scoped under the nth root match when given.
///
/// Scoping composes selectors (`root field` descendant combinator), which is
/// how per-card fields resolve against their own card.
async fn extract_fields(
    browser: &dyn BrowserContext,
    params: &ExtractParams,
    scope: Option<(&str, usize)>,
) -> CrawlResult<serde_json::Map<String, Value>> {
    let mut fields = serde_json::Map::new();

    for (name, spec) in &params.fields {
        let (selector, base_nth) = match scope {
            Some((root, nth)) => (format!("{root} {}", spec.selector), nth),
            None => (spec.selector.clone(), 0),
        };

        let value = if spec.multiple {
            let count = Locator::new(browser, &selector).count().await?;
            let mut values = Vec::with_capacity(count);
            for nth in 0..count {
                if let Some(one) = extract_one(browser, &selector, nth, spec).await? {
                    values.push(one);
                }
            }
            if values.is_empty() {
                None
            } else {
                Some(Value::Array(values))
            }
        } else {
            let nth = if scope.is_some() { scoped_nth(base_nth) } else { 0 };
            extract_one(browser, &selector, nth, spec).await?
        };

        if let Some(value) = value {
            fields.insert(name.clone(), value);
        }
    }

    Ok(fields)
}

// With a descendant-composed selector, the nth root's field is the nth
// match when every root contains exactly one; richer scoping would need
// element-handle queries the abstract capability does not expose.
const fn scoped_nth(base_nth: usize) -> usize {
    base_nth
}

async fn extract_one(
    browser: &dyn BrowserContext,
    selector: &str,
    nth: usize,
    spec: &FieldSpec,
) -> CrawlResult<Option<Value>> {
    let field = Locator::new(browser, selector).nth(nth);
    let raw = match spec.kind {
        FieldKind::Text => field.text().await?,
        FieldKind::Html => field.html().await?,
        FieldKind::Attribute => {
            let name = spec
                .attribute
                .as_deref()
                .ok_or_else(|| CrawlError::Config("attribute field without name".into()))?;
            field.attribute(name).await?
        }
    };

    Ok(raw.map(|value| apply_transform(value, spec.transform)))
}

fn apply_transform(value: String, transform: Option<FieldTransform>) -> Value {
    match transform {
        None => Value::String(value),
        Some(FieldTransform::Trim) => Value::String(value.trim().to_string()),
        Some(FieldTransform::Lowercase) => Value::String(value.to_lowercase()),
        Some(FieldTransform::Uppercase) => Value::String(value.to_uppercase()),
        Some(FieldTransform::Number) => {
            let cleaned: String = value
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned
                .parse::<f64>()
                .ok()
                .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
                .unwrap_or(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserProvider, StaticBrowser, StaticSite};
    use serde_json::json;
    use std::sync::Arc;

    const PRODUCT_HTML: &str = r#"
        <html><body>
          <h1>Acme Widget</h1>
          <span class="price" data-cents="1999">$19.99</span>
          <ul><li class="tag">new</li><li class="tag">sale</li></ul>
        </body></html>
    "#;

    async fn run_extract(params: serde_json::Value) -> Vec<RawItem> {
        let site = StaticSite::new();
        site.add_page("https://site.test/item", PRODUCT_HTML);
        let browser = StaticBrowser::new(Arc::new(site));
        let ctx = browser.acquire(None).await.expect("acquire");
        ctx.navigate("https://site.test/item").await.expect("navigate");

        let extract: ExtractParams = serde_json::from_value(params).expect("params");
        let fields = extract_fields(ctx.as_ref(), &extract, None).await.expect("extract");
        vec![RawItem {
            item_type: extract.item_type,
            fields,
        }]
    }

    #[tokio::test]
    async fn extracts_text_attribute_and_multiple() {
        let items = run_extract(json!({
            "item_type": "product",
            "fields": {
                "title": { "selector": "h1" },
                "price_cents": { "selector": ".price", "type": "attribute", "attribute": "data-cents" },
                "tags": { "selector": ".tag", "multiple": true }
            }
        }))
        .await;

        let fields = &items[0].fields;
        assert_eq!(fields["title"], json!("Acme Widget"));
        assert_eq!(fields["price_cents"], json!("1999"));
        assert_eq!(fields["tags"], json!(["new", "sale"]));
    }

    #[tokio::test]
    async fn number_transform_strips_currency() {
        let items = run_extract(json!({
            "fields": {
                "price": { "selector": ".price", "transform": "number" }
            }
        }))
        .await;
        assert_eq!(items[0].fields["price"], json!(19.99));
    }

    #[tokio::test]
    async fn missing_fields_are_omitted() {
        let items = run_extract(json!({
            "fields": {
                "title": { "selector": "h1" },
                "rating": { "selector": ".rating" }
            }
        }))
        .await;
        assert!(items[0].fields.contains_key("title"));
        assert!(!items[0].fields.contains_key("rating"));
    }
}
