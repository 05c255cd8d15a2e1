//! Body and header rewriting applied to proxied responses.

pub mod css;
pub mod headers;
pub mod html;

use url::Url;

use crate::url_codec::{self, PROXY_PREFIX};

pub use css::rewrite_css;
pub use headers::{BodyState, rewrite_headers};
pub use html::{Rule, RuleSet, rewrite_html};

/// Values that never point at a fetchable upstream resource.
const SKIPPED_SCHEMES: &[&str] = &["javascript:", "data:", "mailto:", "tel:", "blob:", "about:"];

/// Per-response state used while rewriting a document.
#[derive(Clone, Debug)]
pub struct RewriteContext {
    /// URL of the document being rewritten; the base for relative links.
    pub page: Url,
    pub rules: RuleSet,
}

impl RewriteContext {
    pub fn new(page: Url) -> Self {
        Self {
            page,
            rules: RuleSet::all(),
        }
    }

    /// Context for the root document of `https://{host}/`.
    pub fn for_host(host: &str) -> Option<Self> {
        Url::parse(&format!("https://{host}/")).ok().map(Self::new)
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn target_host(&self) -> &str {
        self.page.host_str().unwrap_or_default()
    }
}

/// Maps an attribute or CSS URL value to its proxy path. Returns `None` for
/// values that must be left alone: fragments, non-fetchable schemes and
/// values that already go through the proxy.
pub fn proxied_url(value: &str, base: &Url) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(PROXY_PREFIX) {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if SKIPPED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        return None;
    }

    match base.join(trimmed) {
        Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => {
            Some(url_codec::encode(absolute.as_str()))
        }
        Ok(_) => None,
        Err(_) => Some(url_codec::encode(&url_codec::resolve(
            trimmed,
            base.host_str().unwrap_or_default(),
        ))),
    }
}
