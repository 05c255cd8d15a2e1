//! Mapping between upstream URLs and the `/proxy/<encoded-url>` path scheme.

use url::Url;

pub const PROXY_PREFIX: &str = "/proxy/";

/// Upper bound on percent-decoding rounds when unwrapping a proxied path.
const MAX_DECODE_ROUNDS: usize = 5;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidUrl {
    #[error("path does not start with {PROXY_PREFIX}")]
    MissingPrefix,
    #[error("no target url after {PROXY_PREFIX}")]
    Empty,
    #[error("target url did not converge after {MAX_DECODE_ROUNDS} decoding rounds")]
    NotConverged,
    #[error("malformed target url {url:?}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("target url has no host")]
    MissingHost,
}

/// Builds the proxy path for an absolute upstream URL.
pub fn encode(target: &str) -> String {
    format!("{PROXY_PREFIX}{}", urlencoding::encode(target))
}

/// Extracts and validates the upstream URL carried by a proxy path.
///
/// The value may have been percent-encoded more than once, and pages that
/// build links from an already proxied location end up with
/// `/proxy/.../proxy/<inner>` chains; the innermost URL wins.
pub fn decode(path: &str) -> Result<Url, InvalidUrl> {
    let rest = path
        .strip_prefix(PROXY_PREFIX)
        .ok_or(InvalidUrl::MissingPrefix)?;
    if rest.is_empty() {
        return Err(InvalidUrl::Empty);
    }

    let mut current = rest.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        current = unwrap_nested(&current).to_string();
        if has_scheme(&current) {
            return validate(&current);
        }
        let decoded = match urlencoding::decode(&current) {
            Ok(decoded) => decoded.into_owned(),
            Err(err) => {
                return Err(InvalidUrl::Malformed {
                    url: current,
                    reason: err.to_string(),
                });
            }
        };
        if decoded == current {
            break;
        }
        current = decoded;
    }

    let current = unwrap_nested(&current);
    if has_scheme(current) {
        return validate(current);
    }
    Err(InvalidUrl::NotConverged)
}

/// Expands an attribute value into an absolute URL on `https://{base_host}`.
pub fn resolve(value: &str, base_host: &str) -> String {
    let value = value.trim();
    if is_absolute(value) {
        value.to_string()
    } else if let Some(rest) = value.strip_prefix("//") {
        format!("https://{rest}")
    } else if value.starts_with('/') {
        format!("https://{base_host}{value}")
    } else {
        let value = value.strip_prefix("./").unwrap_or(value);
        format!("https://{base_host}/{value}")
    }
}

/// Turns an upstream `Location` header into a proxy path.
pub fn rewrite_redirect(location: &str, current: &Url) -> String {
    let location = location.trim();
    if location.starts_with(PROXY_PREFIX) {
        return location.to_string();
    }
    match current.join(location) {
        Ok(absolute) => encode(absolute.as_str()),
        Err(_) => encode(&resolve(location, current.host_str().unwrap_or_default())),
    }
}

/// Appends the inbound query string to the decoded target.
pub fn merge_query(target: &mut Url, query: Option<&str>) {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return;
    };
    let merged = match target.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query.to_string(),
    };
    target.set_query(Some(&merged));
}

/// Origin of a URL without a trailing slash, e.g. `https://example.com:8443`.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

pub(crate) fn is_absolute(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// `scheme://` with a syntactically valid scheme.
fn has_scheme(value: &str) -> bool {
    let Some(idx) = value.find("://") else {
        return false;
    };
    let scheme = &value[..idx];
    scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Innermost `/proxy/<url>` target in `value`. A `/proxy/` segment that is
/// not followed by an http(s) URL belongs to the upstream path or query.
fn unwrap_nested(value: &str) -> &str {
    value
        .match_indices(PROXY_PREFIX)
        .map(|(idx, _)| &value[idx + PROXY_PREFIX.len()..])
        .filter(|inner| carries_target(inner))
        .last()
        .unwrap_or(value)
}

/// `value` starts with an http(s) scheme, possibly behind percent-encoding.
fn carries_target(value: &str) -> bool {
    let mut current = value.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        if is_absolute(&current) {
            return true;
        }
        match urlencoding::decode(&current) {
            Ok(decoded) if decoded != current => current = decoded.into_owned(),
            _ => return false,
        }
    }
    is_absolute(&current)
}

fn validate(candidate: &str) -> Result<Url, InvalidUrl> {
    let url = Url::parse(candidate).map_err(|err| InvalidUrl::Malformed {
        url: candidate.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(InvalidUrl::UnsupportedScheme(url.scheme().to_string()));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(InvalidUrl::MissingHost),
    }
}
