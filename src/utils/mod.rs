//! Shared helpers.

pub mod url_utils;

pub use url_utils::{canonicalize_url, extract_domain, is_valid_url, resolve_href, url_hash};
