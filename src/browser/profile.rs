//! Browser profiles.
//!
//! Profiles are resolved once by the orchestrator at execution start and
//! travel inline with task metadata; workers apply them when binding a page.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Fingerprint configuration applied to a page before first navigation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserProfile {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub geolocation: Option<Geolocation>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// navigator property overrides injected on new documents
    #[serde(default)]
    pub fingerprint_overrides: HashMap<String, serde_json::Value>,
}

impl BrowserProfile {
    /// A bare profile with defaults everywhere
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            user_agent: None,
            viewport: None,
            locale: None,
            timezone: None,
            geolocation: None,
            proxy_url: None,
            fingerprint_overrides: HashMap::new(),
        }
    }
}
