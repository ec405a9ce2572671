//! Profile adapters: markup-specific extraction of profile fields.
//!
//! Adapters are tried in priority order; [`GenericAdapter`] is the
//! always-last fallback.

mod generic;
mod json_ld;

use scraper::{ElementRef, Html, Selector};

pub use generic::GenericAdapter;
pub use json_ld::JsonLdAdapter;

use crate::Profile;
use crate::text::collapse_whitespace;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Extraction strategy for one family of profile pages.
pub trait ProfileAdapter: Send + Sync {
    /// Whether this adapter understands the document.
    fn detect(&self, doc: &Html) -> bool;

    /// Pull profile fields out of the document.
    fn extract(&self, doc: &Html) -> Profile;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn ProfileAdapter>>,
    fallback: GenericAdapter,
}

impl AdapterRegistry {
    /// Structured-data adapter first, generic markup last.
    pub fn new() -> Self {
        Self {
            adapters: vec![Box::new(JsonLdAdapter)],
            fallback: GenericAdapter,
        }
    }

    /// Pick the first adapter that recognizes the document.
    pub fn detect(&self, doc: &Html) -> &dyn ProfileAdapter {
        self.adapters
            .iter()
            .find(|a| a.detect(doc))
            .map(|a| a.as_ref())
            .unwrap_or(&self.fallback as &dyn ProfileAdapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Selection helpers
// ---------------------------------------------------------------------------

/// Collapsed text of an element, `None` when blank.
pub(crate) fn element_text(el: &ElementRef<'_>) -> Option<String> {
    let text = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
    (!text.is_empty()).then_some(text)
}

/// Text of the first element matching any of `selectors`, in order.
pub(crate) fn first_text(doc: &Html, selectors: &[&Selector]) -> Option<String> {
    selectors
        .iter()
        .find_map(|sel| doc.select(sel).find_map(|el| element_text(&el)))
}

/// Text of the first descendant of `scope` matching any of `selectors`.
pub(crate) fn first_text_in(scope: &ElementRef<'_>, selectors: &[&Selector]) -> Option<String> {
    selectors
        .iter()
        .find_map(|sel| scope.select(sel).find_map(|el| element_text(&el)))
}

/// `content`/`href` of the canonical link or `og:url` meta tag.
pub(crate) fn canonical_url(doc: &Html) -> Option<String> {
    use std::sync::LazyLock;

    static CANONICAL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(r#"link[rel="canonical"]"#).expect("valid selector"));
    static OG_URL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(r#"meta[property="og:url"]"#).expect("valid selector"));

    doc.select(&CANONICAL)
        .find_map(|el| el.value().attr("href"))
        .or_else(|| doc.select(&OG_URL).find_map(|el| el.value().attr("content")))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
