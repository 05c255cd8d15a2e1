use http::{
    HeaderMap, HeaderValue,
    header::{self, HeaderName},
};

/// Headers that stop the page from rendering inside a frame or pin it to
/// the upstream origin.
const SECURITY_HEADERS: &[&str] = &[
    "x-frame-options",
    "frame-options",
    "strict-transport-security",
];

/// Payload metadata that no longer describes the body once it was decoded
/// or rewritten.
const PAYLOAD_HEADERS: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "content-md5",
    "content-digest",
    "etag",
];

/// What happened to the body on its way through the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyState {
    /// Forwarded as a stream, bytes untouched.
    Streamed,
    /// Buffered but still carrying the upstream content-coding.
    Encoded { len: usize },
    /// Decoded and possibly rewritten; `len` is the new size.
    Decoded { len: usize },
}

/// Produces the header set sent to the browser for a proxied response.
pub fn rewrite_headers(headers: &HeaderMap, body: BodyState) -> HeaderMap {
    let mut out = headers.clone();
    strip_security_headers(&mut out);

    match body {
        BodyState::Streamed => {
            if out.contains_key(header::TRANSFER_ENCODING) {
                out.remove(header::CONTENT_LENGTH);
            }
        }
        BodyState::Encoded { len } => {
            out.remove(header::TRANSFER_ENCODING);
            out.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        BodyState::Decoded { len } => {
            for name in PAYLOAD_HEADERS {
                out.remove(*name);
            }
            out.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
    }

    let cookies: Vec<HeaderValue> = out
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| HeaderValue::from_str(&strip_cookie_domain(value)).ok())
        .collect();
    if !cookies.is_empty() {
        out.remove(header::SET_COOKIE);
        for cookie in cookies {
            out.append(header::SET_COOKIE, cookie);
        }
    }

    out.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    out
}

/// Removes framing and transport-security restrictions, including every
/// `content-security-policy*` variant.
pub fn strip_security_headers(headers: &mut HeaderMap) {
    let csp: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("content-security-policy"))
        .cloned()
        .collect();
    for name in csp {
        headers.remove(name);
    }
    for name in SECURITY_HEADERS {
        headers.remove(*name);
    }
}

/// Drops the `Domain` attribute so the cookie binds to the proxy host.
fn strip_cookie_domain(cookie: &str) -> String {
    cookie
        .split(';')
        .map(str::trim)
        .filter(|part| !part.to_ascii_lowercase().starts_with("domain="))
        .collect::<Vec<_>>()
        .join("; ")
}
