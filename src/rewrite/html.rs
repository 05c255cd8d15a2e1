use std::{cell::RefCell, sync::LazyLock};

use lol_html::{
    HtmlRewriter, Settings, element, errors::RewritingError, html_content::ContentType,
    html_content::Element, text,
};
use regex::Regex;
use tracing::warn;
use url::Url;

use super::{RewriteContext, css::rewrite_css, proxied_url};
use crate::url_codec::{self, PROXY_PREFIX};

/// Attributes carrying resource URLs on any element.
const URL_ATTRIBUTES: &[&str] = &["src", "href", "data-src", "poster"];

static WINDOW_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bwindow\s*\.\s*open\s*\(").expect("window.open pattern is valid")
});

/// Individual DOM rewrite rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    /// Compatibility script at the top of `<head>` and the end of `<body>`.
    InjectScripts,
    /// `src`/`href`/`data-src`/`poster` through the proxy.
    UrlAttributes,
    /// No `target` attributes. Inline `window.open` calls are routed to the
    /// same-window helper only while [`Rule::InjectScripts`] installs it.
    SameWindow,
    /// Form `action` through the proxy, empty actions pinned to the page.
    FormAction,
    /// `url(...)` in `style` attributes and `<style>` blocks.
    StyleUrls,
    /// `<base href>` and `<meta http-equiv="refresh">` targets.
    BaseAndRefresh,
    /// CSP meta tags, `integrity` and `nonce` on scripts and stylesheets.
    StripCsp,
}

impl Rule {
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of enabled [`Rule`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleSet(u8);

impl RuleSet {
    pub const fn all() -> Self {
        Self(0x7f)
    }

    pub const fn none() -> Self {
        Self(0)
    }

    pub fn only(rules: &[Rule]) -> Self {
        Self(rules.iter().fold(0, |acc, rule| acc | rule.bit()))
    }

    pub fn without(self, rule: Rule) -> Self {
        Self(self.0 & !rule.bit())
    }

    pub fn with(self, rule: Rule) -> Self {
        Self(self.0 | rule.bit())
    }

    pub fn enabled(&self, rule: Rule) -> bool {
        self.0 & rule.bit() != 0
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Rewrites a document so it keeps working inside the proxy. Fails open:
/// if the rewriter rejects the markup the input is returned as is.
pub fn rewrite_html(html: &[u8], ctx: &RewriteContext) -> Vec<u8> {
    match try_rewrite_html(html, ctx) {
        Ok(out) => out,
        Err(err) => {
            warn!(%err, page = %ctx.page, "html rewrite failed; serving original markup");
            html.to_vec()
        }
    }
}

fn try_rewrite_html(html: &[u8], ctx: &RewriteContext) -> Result<Vec<u8>, RewritingError> {
    let rules = ctx.rules;
    let same_window_calls = rules.enabled(Rule::SameWindow) && rules.enabled(Rule::InjectScripts);
    let base = RefCell::new(ctx.page.clone());
    let head_script = head_script(&ctx.page);
    let page_path = url_codec::encode(ctx.page.as_str());
    let mut style_text = String::new();
    let mut script_text = String::new();
    let mut output = Vec::with_capacity(html.len() + HEAD_SCRIPT.len() + BODY_SCRIPT.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("head", |el| {
                    if rules.enabled(Rule::InjectScripts) {
                        el.prepend(&head_script, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if rules.enabled(Rule::InjectScripts) {
                        el.append(BODY_SCRIPT, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("base[href]", |el| {
                    if rules.enabled(Rule::BaseAndRefresh) {
                        rewrite_base(el, &base)?;
                    }
                    Ok(())
                }),
                element!("*", |el| {
                    if rules.enabled(Rule::UrlAttributes) && el.tag_name() != "base" {
                        let base = base.borrow();
                        for name in URL_ATTRIBUTES {
                            if let Some(value) = el.get_attribute(name)
                                && let Some(url) = proxied_url(&value, &base)
                            {
                                el.set_attribute(name, &url)?;
                            }
                        }
                    }
                    Ok(())
                }),
                element!("[target]", |el| {
                    if rules.enabled(Rule::SameWindow)
                        && matches!(el.tag_name().as_str(), "a" | "area" | "form" | "base")
                    {
                        el.remove_attribute("target");
                    }
                    Ok(())
                }),
                element!("[onclick]", |el| {
                    if same_window_calls
                        && let Some(handler) = el.get_attribute("onclick")
                        && WINDOW_OPEN.is_match(&handler)
                    {
                        el.set_attribute("onclick", &neutralize_window_open(&handler))?;
                    }
                    Ok(())
                }),
                element!("form", |el| {
                    if rules.enabled(Rule::FormAction) {
                        let action = el.get_attribute("action").unwrap_or_default();
                        if action.trim().is_empty() {
                            el.set_attribute("action", &page_path)?;
                        } else if let Some(url) = proxied_url(&action, &base.borrow()) {
                            el.set_attribute("action", &url)?;
                        }
                    }
                    Ok(())
                }),
                element!("[style]", |el| {
                    if rules.enabled(Rule::StyleUrls)
                        && let Some(style) = el.get_attribute("style")
                    {
                        let rewritten = rewrite_css(&style, &base.borrow());
                        if rewritten != style {
                            el.set_attribute("style", &rewritten)?;
                        }
                    }
                    Ok(())
                }),
                text!("style", |chunk| {
                    if !rules.enabled(Rule::StyleUrls) {
                        return Ok(());
                    }
                    style_text.push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        let rewritten = rewrite_css(&style_text, &base.borrow());
                        chunk.replace(&rewritten, ContentType::Html);
                        style_text.clear();
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }),
                text!("script", |chunk| {
                    if !same_window_calls {
                        return Ok(());
                    }
                    script_text.push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        let rewritten = neutralize_window_open(&script_text);
                        chunk.replace(&rewritten, ContentType::Html);
                        script_text.clear();
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }),
                element!("meta[http-equiv]", |el| {
                    let equiv = el
                        .get_attribute("http-equiv")
                        .unwrap_or_default()
                        .to_ascii_lowercase();
                    if rules.enabled(Rule::StripCsp)
                        && equiv.starts_with("content-security-policy")
                    {
                        el.remove();
                    } else if rules.enabled(Rule::BaseAndRefresh)
                        && equiv == "refresh"
                        && let Some(content) = el.get_attribute("content")
                        && let Some(rewritten) = rewrite_meta_refresh(&content, &base.borrow())
                    {
                        el.set_attribute("content", &rewritten)?;
                    }
                    Ok(())
                }),
                element!("script, link", |el| {
                    if rules.enabled(Rule::StripCsp) {
                        el.remove_attribute("integrity");
                        el.remove_attribute("nonce");
                    }
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter.write(html)?;
    rewriter.end()?;
    Ok(output)
}

/// Points `<base href>` at the proxy and makes it the base for the rest of
/// the document. The unencoded form keeps browser-side relative resolution
/// inside `/proxy/`.
fn rewrite_base(
    el: &mut Element,
    base: &RefCell<Url>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let Some(href) = el.get_attribute("href") else {
        return Ok(());
    };
    if href.trim().starts_with(PROXY_PREFIX) {
        return Ok(());
    }
    let resolved = base.borrow().join(href.trim());
    if let Ok(resolved) = resolved
        && matches!(resolved.scheme(), "http" | "https")
    {
        el.set_attribute("href", &format!("{PROXY_PREFIX}{resolved}"))?;
        *base.borrow_mut() = resolved;
    }
    Ok(())
}

/// Rewrites the target of `content="5; url=/next"`.
fn rewrite_meta_refresh(content: &str, base: &Url) -> Option<String> {
    let (delay, rest) = content.split_once(';').or_else(|| content.split_once(','))?;
    let rest = rest.trim();
    let target = match rest.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("url=") => &rest[4..],
        _ => rest,
    };
    let target = target.trim().trim_matches(|c| c == '\'' || c == '"');
    let proxied = proxied_url(target, base)?;
    Some(format!("{}; url={proxied}", delay.trim()))
}

/// Routes `window.open(...)` through the same-window helper installed by
/// the head script.
pub fn neutralize_window_open(js: &str) -> String {
    WINDOW_OPEN
        .replace_all(js, "window.__proxySameWindow(")
        .into_owned()
}

fn head_script(page: &Url) -> String {
    let target = serde_json::to_string(page.as_str())
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/");
    HEAD_SCRIPT.replace("__PROXY_TARGET__", &target)
}

const HEAD_SCRIPT: &str = r#"<script data-proxy-injected="true">
(function () {
  var PREFIX = '/proxy/';
  var target = __PROXY_TARGET__;
  function proxied(value) {
    if (typeof value !== 'string' || value.indexOf(PREFIX) === 0) {
      return value;
    }
    if (/^\s*(#|javascript:|data:|blob:|about:|mailto:|tel:)/i.test(value)) {
      return value;
    }
    var absolute;
    try {
      absolute = new URL(value, target).href;
    } catch (err) {
      return value;
    }
    if (!/^https?:/i.test(absolute) || absolute.indexOf(location.origin + PREFIX) === 0) {
      return value;
    }
    return PREFIX + encodeURIComponent(absolute);
  }
  window.__proxyTarget = target;
  window.__proxyUrl = proxied;
  window.__proxySameWindow = function (url) {
    if (url) {
      location.href = proxied(String(url));
    }
    return window;
  };
  window.open = window.__proxySameWindow;
  if (window.fetch) {
    var nativeFetch = window.fetch;
    window.fetch = function (input, init) {
      if (typeof input === 'string') {
        input = proxied(input);
      } else if (input && input.url) {
        input = new Request(proxied(input.url), input);
      }
      return nativeFetch.call(this, input, init);
    };
  }
  var nativeOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function (method, url) {
    var args = Array.prototype.slice.call(arguments);
    args[1] = proxied(String(url));
    return nativeOpen.apply(this, args);
  };
})();
</script>"#;

const BODY_SCRIPT: &str = r#"<script data-proxy-injected="true">
(function () {
  function strip(root) {
    if (!root || !root.querySelectorAll) {
      return;
    }
    if (root.hasAttribute && root.hasAttribute('target')) {
      root.removeAttribute('target');
    }
    var nodes = root.querySelectorAll('a[target], area[target], form[target]');
    for (var i = 0; i < nodes.length; i++) {
      nodes[i].removeAttribute('target');
    }
  }
  strip(document);
  if (window.MutationObserver) {
    new MutationObserver(function (records) {
      records.forEach(function (record) {
        record.addedNodes.forEach(function (node) {
          if (node.nodeType === 1) {
            strip(node);
          }
        });
      });
    }).observe(document.documentElement, { childList: true, subtree: true });
  }
})();
</script>"#;
