//! Typed parameter structs for the built-in nodes.
//!
//! One struct per node type, deserialized from the free-form `params` map
//! at validation time and again at execution time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::browser::SelectorState;
use crate::error::{CrawlError, CrawlResult};
use crate::model::NodeConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NavigateParams {
    /// Absent means the task's own URL
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitParams {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Selector to wait on instead of a fixed delay
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "default_selector_state")]
    pub state: SelectorState,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl WaitParams {
    pub fn validate(&self) -> CrawlResult<()> {
        if self.delay_ms.is_none() && self.selector.is_none() {
            return Err(CrawlError::Config(
                "wait needs delay_ms or selector".into(),
            ));
        }
        Ok(())
    }
}

const fn default_selector_state() -> SelectorState {
    SelectorState::Visible
}

pub(crate) const fn default_timeout_secs() -> u64 {
    30
}

/// Click a selector, or viewport coordinates when both `x` and `y` are given
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClickParams {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

impl ClickParams {
    pub fn validate(&self) -> CrawlResult<()> {
        let has_point = self.x.is_some() && self.y.is_some();
        if self.selector.is_none() && !has_point {
            return Err(CrawlError::Config(
                "click needs a selector or both x and y".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoverParams {
    pub selector: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrollParams {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "default_scroll_delta")]
    pub delta_y: i64,
}

const fn default_scroll_delta() -> i64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractLinksParams {
    #[serde(default = "default_link_selector")]
    pub selector: String,
    /// 0 = unbounded
    #[serde(default)]
    pub limit: usize,
    /// Marker stamped on every discovered URL
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub filter: Option<LinkFilter>,
}

fn default_link_selector() -> String {
    "a".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkFilter {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub exclude_pattern: Option<String>,
}

impl ExtractLinksParams {
    pub fn validate(&self) -> CrawlResult<()> {
        if let Some(filter) = &self.filter {
            for pattern in [&filter.pattern, &filter.exclude_pattern]
                .into_iter()
                .flatten()
            {
                regex::Regex::new(pattern)
                    .map_err(|e| CrawlError::Config(format!("bad link pattern: {e}")))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Attribute,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    Trim,
    Lowercase,
    Uppercase,
    Number,
}

/// One entry of an extract node's field map
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub selector: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub attribute: Option<String>,
    /// Collect every match instead of the first
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub transform: Option<FieldTransform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractParams {
    #[serde(default = "default_item_type")]
    pub item_type: String,
    /// Root selector; when it matches many elements, one item per match
    #[serde(default)]
    pub selector: Option<String>,
    pub fields: HashMap<String, FieldSpec>,
}

fn default_item_type() -> String {
    "item".to_string()
}

impl ExtractParams {
    pub fn validate(&self) -> CrawlResult<()> {
        if self.fields.is_empty() {
            return Err(CrawlError::Config("extract needs at least one field".into()));
        }
        for (name, spec) in &self.fields {
            if spec.kind == FieldKind::Attribute && spec.attribute.is_none() {
                return Err(CrawlError::Config(format!(
                    "field {name} extracts an attribute but names none"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginateParams {
    /// Selector of the next-page control
    pub selector: String,
    pub max_pages: u32,
    /// Extract these links from every visited page
    #[serde(default)]
    pub link_selector: Option<String>,
    #[serde(default)]
    pub marker: Option<String>,
}

impl PaginateParams {
    pub fn validate(&self) -> CrawlResult<()> {
        if self.max_pages == 0 {
            return Err(CrawlError::Config("paginate needs max_pages >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginParams {
    pub plugin: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceParams {
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionalParams {
    /// Expression over accumulated outputs, e.g. `nav.status == "200"`
    pub condition: String,
    pub then_nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub else_nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopParams {
    pub nodes: Vec<NodeConfig>,
    pub max_iterations: u32,
}

impl LoopParams {
    pub fn validate(&self) -> CrawlResult<()> {
        if self.max_iterations == 0 {
            return Err(CrawlError::Config("loop needs max_iterations >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParallelParams {
    pub nodes: Vec<NodeConfig>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

const fn default_max_concurrent() -> usize {
    4
}
