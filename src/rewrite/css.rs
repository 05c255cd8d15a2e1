use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use super::proxied_url;

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)"#)
        .expect("css url pattern is valid")
});

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("css import pattern is valid")
});

/// Rewrites `url(...)` references and string `@import`s so they load
/// through the proxy.
pub fn rewrite_css(css: &str, base: &Url) -> String {
    let rewritten = CSS_URL.replace_all(css, |caps: &Captures| {
        let (value, quote) = quoted_value(caps);
        match proxied_url(value, base) {
            Some(url) => format!("url({quote}{url}{quote})"),
            None => caps[0].to_string(),
        }
    });
    CSS_IMPORT
        .replace_all(&rewritten, |caps: &Captures| {
            let (value, quote) = quoted_value(caps);
            match proxied_url(value, base) {
                Some(url) => format!("@import {quote}{url}{quote}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn quoted_value<'c>(caps: &'c Captures) -> (&'c str, &'static str) {
    if let Some(m) = caps.get(1) {
        (m.as_str(), "\"")
    } else if let Some(m) = caps.get(2) {
        (m.as_str(), "'")
    } else {
        (caps.get(3).map(|m| m.as_str()).unwrap_or_default(), "")
    }
}
