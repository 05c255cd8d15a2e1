use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use chrono::Utc;
use http::{
    HeaderMap, Method, Request, Response, StatusCode, Uri,
    header::{self, HeaderValue},
};
use hyper::{
    Body, Client, body,
    client::HttpConnector,
    server::conn::AddrStream,
    service::{make_service_fn, service_fn},
};
use hyper_rustls::HttpsConnectorBuilder;
use serde_json::{Value, json};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    ProxyError,
    cache::{self, AssetCache, CacheEntry, CacheKey},
    config::ProxyConfig,
    decompress::{decompress, encoding_tokens},
    disk::{self, DiskMirror, MirroredAsset},
    error::{DispatchError, classify_upstream_error},
    rewrite::{
        BodyState, RewriteContext, Rule, RuleSet, rewrite_css, rewrite_headers, rewrite_html,
    },
    url_codec::{self, PROXY_PREFIX},
};

type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

const STATIC_PREFIX: &str = "/static/";
const CACHE_STATUS_HEADER: &str = "x-proxy-cache";
const OUTBOUND_ACCEPT_ENCODING: &str = "gzip, deflate, br";
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Headers describing the hop between the browser and this proxy.
const FORWARDING_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-port",
    "x-real-ip",
    "forwarded",
    "via",
];

const USAGE_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>iframe proxy</title></head>
<body>
<h1>iframe proxy</h1>
<p>Load any page through <code>/proxy/&lt;encoded-url&gt;</code>, for example
<code>&lt;iframe src="/proxy/https%3A%2F%2Fexample.com%2F"&gt;</code>.</p>
<form onsubmit="location.href='/proxy/'+encodeURIComponent(this.url.value);return false">
<input name="url" type="url" placeholder="https://example.com/" size="60">
<button type="submit">Open</button>
</form>
</body>
</html>
"#;

pub struct ProxyHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

impl ProxyHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        let _ = self.task.await;
    }
}

struct AppState {
    client: HttpClient,
    config: ProxyConfig,
    cache: Option<Arc<AssetCache>>,
    mirror: Option<DiskMirror>,
}

pub async fn spawn_proxy(config: ProxyConfig) -> Result<ProxyHandle, ProxyError> {
    let listener = std::net::TcpListener::bind(config.bind_addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(CONNECT_TIMEOUT));
    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);
    let client: HttpClient = Client::builder().build(https);

    let cache = config
        .features
        .memory_cache
        .then(|| Arc::new(AssetCache::new(config.cache_ttl)));
    let sweeper = cache
        .as_ref()
        .filter(|_| !config.cache_sweep_interval.is_zero())
        .map(|cache| cache.spawn_sweeper(config.cache_sweep_interval));
    let mirror = config.static_dir.clone().map(DiskMirror::new);

    info!(
        addr = %local_addr,
        memory_cache = cache.is_some(),
        disk_mirror = ?config.static_dir,
        default_upstream = ?config.default_upstream.as_ref().map(Url::as_str),
        "iframe proxy listening"
    );

    let state = Arc::new(AppState {
        client,
        config,
        cache,
        mirror,
    });

    let make_svc = make_service_fn(move |_conn: &AddrStream| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(handle_request(state, req).await) }
            }))
        }
    });

    let server = hyper::Server::from_tcp(listener)?.serve(make_svc);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let graceful = server.with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = graceful.await {
            error!(%err, "proxy server error");
        }
        info!("iframe proxy stopped");
    });

    Ok(ProxyHandle {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task,
        sweeper,
    })
}

async fn handle_request(state: Arc<AppState>, req: Request<Body>) -> Response<Body> {
    if *req.method() == Method::OPTIONS && state.config.features.add_cors {
        return cors_response(StatusCode::NO_CONTENT);
    }

    let path = req.uri().path();
    if path == "/health" {
        return json_response(
            StatusCode::OK,
            json!({
                "status": "healthy",
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }
    if path == "/" && matches!(*req.method(), Method::GET | Method::HEAD) {
        return html_response(StatusCode::OK, USAGE_PAGE);
    }
    if let Some(rel) = path.strip_prefix(STATIC_PREFIX) {
        let rel = rel.to_string();
        return serve_static(&state, &rel).await;
    }
    if path.starts_with(PROXY_PREFIX) {
        let mut response = proxy_request(&state, req).await;
        if state.config.features.add_cors {
            add_cors_headers(response.headers_mut());
        }
        return response;
    }

    redirect_unprefixed(&state, &req)
}

async fn proxy_request(state: &AppState, req: Request<Body>) -> Response<Body> {
    let request_url = req.uri().to_string();
    let mut target = match url_codec::decode(req.uri().path()) {
        Ok(target) => target,
        Err(err) => {
            debug!(%err, path = req.uri().path(), "rejecting proxy path");
            return DispatchError::from(err).into_response(&request_url, None);
        }
    };
    url_codec::merge_query(&mut target, req.uri().query());
    target.set_fragment(None);
    debug!(method = %req.method(), target = %target, "proxying request");

    let accept_encoding = header_str(req.headers(), header::ACCEPT_ENCODING).map(str::to_string);
    let if_none_match = header_str(req.headers(), header::IF_NONE_MATCH).map(str::to_string);
    let is_static = cache::is_cacheable(req.method(), target.path());

    let Some(cache) = state.cache.as_ref().filter(|_| is_static) else {
        return match dispatch(state, req, &target, accept_encoding.as_deref(), is_static).await {
            Ok(transformed) => transformed.into_response(),
            Err(err) => err.into_response(&request_url, Some(target.as_str())),
        };
    };

    let key = CacheKey::new(
        req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
        accept_encoding.as_deref(),
    );
    if let Some(entry) = cache.get(&key) {
        debug!(%key, target = %target, "cache hit");
        return cached_response(entry, if_none_match.as_deref(), "HIT");
    }

    let _inflight = cache.lock_key(&key).await;
    if let Some(entry) = cache.get(&key) {
        debug!(%key, target = %target, "cache filled while waiting");
        return cached_response(entry, if_none_match.as_deref(), "HIT");
    }

    debug!(%key, target = %target, "cache miss");
    match dispatch(state, req, &target, accept_encoding.as_deref(), is_static).await {
        Ok(transformed) => match transformed.into_cache_entry(cache.ttl()) {
            Ok(entry) => {
                cache.put(key, entry.clone());
                cached_response(entry, None, "MISS")
            }
            Err(transformed) => transformed.into_response(),
        },
        Err(err) => err.into_response(&request_url, Some(target.as_str())),
    }
}

async fn dispatch(
    state: &AppState,
    req: Request<Body>,
    target: &Url,
    accept_encoding: Option<&str>,
    is_static: bool,
) -> Result<Transformed, DispatchError> {
    if is_static
        && let Some(mirror) = state.mirror.as_ref()
        && let Some(asset) = mirror.read(target).await
    {
        return Ok(serve_mirrored(target, asset));
    }

    let (parts, body) = req.into_parts();
    let body = body::to_bytes(body)
        .await
        .map_err(|err| DispatchError::Internal(format!("failed to read request body: {err}")))?;
    let headers = outbound_headers(&state.config, &parts.headers, &parts.method, target);
    let upstream = send_upstream(state, &parts.method, target, headers, body).await?;
    transform_response(state, target, upstream, accept_encoding, is_static).await
}

/// Builds the header set sent upstream: browser-like identity, upstream
/// `Host`/`Referer`/`Origin`, no validators and configured credentials.
fn outbound_headers(
    config: &ProxyConfig,
    inbound: &HeaderMap,
    method: &Method,
    target: &Url,
) -> HeaderMap {
    let mut headers = inbound.clone();
    for name in HOP_BY_HOP_HEADERS.iter().chain(FORWARDING_HEADERS) {
        headers.remove(*name);
    }
    headers.remove(header::IF_NONE_MATCH);
    headers.remove(header::IF_MODIFIED_SINCE);
    headers.remove(CACHE_STATUS_HEADER);

    let host = target.host_str().unwrap_or_default();
    let authority = match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&authority) {
        headers.insert(header::HOST, value);
    }
    if let Ok(value) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(header::USER_AGENT, value);
    }
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static(OUTBOUND_ACCEPT_ENCODING),
    );

    let origin = url_codec::origin_of(target);
    let referer = header_str(inbound, header::REFERER)
        .and_then(proxied_target)
        .map(|url| url.to_string())
        .unwrap_or_else(|| format!("{origin}/"));
    if let Ok(value) = HeaderValue::from_str(&referer) {
        headers.insert(header::REFERER, value);
    }
    if (inbound.contains_key(header::ORIGIN) || !matches!(*method, Method::GET | Method::HEAD))
        && let Ok(value) = HeaderValue::from_str(&origin)
    {
        headers.insert(header::ORIGIN, value);
    }

    for injection in config.auth.injections_for(host) {
        if let Some(token) = injection.bearer_token.as_deref()
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(header::AUTHORIZATION, value);
        }
        if let Some(cookie) = injection.cookie.as_deref() {
            let mut cookies: Vec<String> = headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(str::to_string)
                .collect();
            cookies.push(cookie.to_string());
            if let Ok(value) = HeaderValue::from_str(&cookies.join("; ")) {
                headers.insert(header::COOKIE, value);
            }
        }
    }

    headers
}

/// Sends the request, retrying connect-level failures with a fixed delay.
async fn send_upstream(
    state: &AppState,
    method: &Method,
    target: &Url,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, DispatchError> {
    let uri: Uri = target
        .as_str()
        .parse()
        .map_err(|err| DispatchError::Internal(format!("failed to build upstream uri: {err}")))?;

    let mut attempt = 0;
    loop {
        let mut request = Request::new(Body::from(body.clone()));
        *request.method_mut() = method.clone();
        *request.uri_mut() = uri.clone();
        *request.headers_mut() = headers.clone();

        match state.client.request(request).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_connect() && attempt < state.config.connect_retries => {
                attempt += 1;
                warn!(%err, attempt, target = %target, "upstream connect failed; retrying");
                tokio::time::sleep(state.config.retry_delay).await;
            }
            Err(err) => {
                warn!(%err, target = %target, "upstream request failed");
                return Err(classify_upstream_error(&err));
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BodyKind {
    Html,
    Css,
    Other,
}

impl BodyKind {
    fn of(content_type: &str) -> Self {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("text/html") || content_type.contains("application/xhtml") {
            BodyKind::Html
        } else if content_type.contains("text/css") {
            BodyKind::Css
        } else {
            BodyKind::Other
        }
    }
}

async fn transform_response(
    state: &AppState,
    target: &Url,
    upstream: Response<Body>,
    accept_encoding: Option<&str>,
    is_static: bool,
) -> Result<Transformed, DispatchError> {
    let (parts, body) = upstream.into_parts();
    let status = parts.status;
    let headers = parts.headers;

    if matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        let mut out = rewrite_headers(&headers, BodyState::Decoded { len: 0 });
        if let Some(location) = header_str(&headers, header::LOCATION) {
            let rewritten = url_codec::rewrite_redirect(location, target);
            debug!(%location, %rewritten, "rewriting redirect");
            if let Ok(value) = HeaderValue::from_str(&rewritten) {
                out.insert(header::LOCATION, value);
            }
        }
        return Ok(Transformed::full(status, out, Bytes::new()));
    }

    let content_type = header_str(&headers, header::CONTENT_TYPE)
        .unwrap_or_default()
        .to_string();
    let encoding = header_str(&headers, header::CONTENT_ENCODING).map(str::to_string);
    let config = &state.config;

    if config.features.auth_override
        && content_type.to_ascii_lowercase().contains("json")
        && config.auth.is_status_path(target.path())
    {
        debug!(path = target.path(), "replacing auth status response");
        let payload = Bytes::from(config.auth.status_payload.to_string());
        let mut out = rewrite_headers(&headers, BodyState::Decoded { len: payload.len() });
        out.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        return Ok(Transformed::full(StatusCode::OK, out, payload));
    }

    let kind = BodyKind::of(&content_type);
    if kind != BodyKind::Other {
        let raw = read_upstream_body(body).await?;
        let decoded = decompress(&raw, encoding.as_deref());
        if is_static && kind == BodyKind::Css {
            store_mirrored(state, target, status, &content_type, &decoded).await;
        }
        let rewritten = rewrite_body(config, target, kind, decoded);
        let out = rewrite_headers(&headers, BodyState::Decoded { len: rewritten.len() });
        return Ok(Transformed::full(status, out, Bytes::from(rewritten)));
    }

    let tokens = encoding_tokens(encoding.as_deref());
    let keep_encoding = tokens.is_empty() || client_accepts(accept_encoding, &tokens);

    if is_static {
        let raw = read_upstream_body(body).await?;
        let decoded = if tokens.is_empty() {
            raw.clone()
        } else {
            Bytes::from(decompress(&raw, encoding.as_deref()))
        };
        store_mirrored(state, target, status, &content_type, &decoded).await;
        return Ok(if keep_encoding {
            let out = rewrite_headers(&headers, BodyState::Encoded { len: raw.len() });
            Transformed::full(status, out, raw)
        } else {
            let out = rewrite_headers(&headers, BodyState::Decoded { len: decoded.len() });
            Transformed::full(status, out, decoded)
        });
    }

    if keep_encoding {
        let out = rewrite_headers(&headers, BodyState::Streamed);
        return Ok(Transformed {
            status,
            headers: out,
            body: TransformedBody::Stream(body),
        });
    }

    let raw = read_upstream_body(body).await?;
    let decoded = decompress(&raw, encoding.as_deref());
    let out = rewrite_headers(&headers, BodyState::Decoded { len: decoded.len() });
    Ok(Transformed::full(status, out, Bytes::from(decoded)))
}

fn rewrite_body(config: &ProxyConfig, target: &Url, kind: BodyKind, decoded: Vec<u8>) -> Vec<u8> {
    match kind {
        BodyKind::Html => {
            let rules = if config.features.inject_scripts {
                RuleSet::all()
            } else {
                RuleSet::all().without(Rule::InjectScripts)
            };
            let ctx = RewriteContext::new(target.clone()).with_rules(rules);
            rewrite_html(&decoded, &ctx)
        }
        BodyKind::Css => match String::from_utf8(decoded) {
            Ok(css) => rewrite_css(&css, target).into_bytes(),
            Err(err) => {
                warn!(target = %target, "stylesheet is not utf-8; passing through");
                err.into_bytes()
            }
        },
        BodyKind::Other => decoded,
    }
}

fn serve_mirrored(target: &Url, asset: MirroredAsset) -> Transformed {
    debug!(target = %target, "serving from disk mirror");
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&asset.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    let body = match BodyKind::of(&asset.content_type) {
        BodyKind::Css => Bytes::from(rewrite_css(&String::from_utf8_lossy(&asset.body), target)),
        _ => asset.body,
    };
    let out = rewrite_headers(&headers, BodyState::Decoded { len: body.len() });
    Transformed::full(StatusCode::OK, out, body)
}

async fn store_mirrored(
    state: &AppState,
    target: &Url,
    status: StatusCode,
    content_type: &str,
    body: &[u8],
) {
    let Some(mirror) = state.mirror.as_ref() else {
        return;
    };
    if !status.is_success() || body.is_empty() || BodyKind::of(content_type) == BodyKind::Html {
        return;
    }
    let content_type = if content_type.is_empty() {
        mirror
            .path_for(target)
            .map(|path| disk::guess_content_type(&path))
            .unwrap_or("application/octet-stream")
    } else {
        content_type
    };
    if let Err(err) = mirror.write(target, content_type, body).await {
        warn!(%err, target = %target, "failed to write disk mirror");
    }
}

async fn read_upstream_body(body: Body) -> Result<Bytes, DispatchError> {
    body::to_bytes(body)
        .await
        .map_err(|err| DispatchError::Internal(format!("failed to read upstream body: {err}")))
}

/// Whether the browser accepts every coding in `tokens`.
fn client_accepts(accept_encoding: Option<&str>, tokens: &[String]) -> bool {
    let accepted: Vec<String> = accept_encoding
        .unwrap_or_default()
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let coding = parts.next()?.trim().to_ascii_lowercase();
            let rejected = parts.any(|param| {
                let param = param.trim().replace(' ', "");
                param == "q=0" || param == "q=0.0" || param == "q=0.00" || param == "q=0.000"
            });
            (!coding.is_empty() && !rejected).then_some(coding)
        })
        .collect();
    tokens.iter().all(|token| {
        let token = match token.as_str() {
            "x-gzip" => "gzip",
            other => other,
        };
        accepted.iter().any(|coding| coding == token || coding == "*")
    })
}

/// Response produced by the transform stage, before it is cached or sent.
struct Transformed {
    status: StatusCode,
    headers: HeaderMap,
    body: TransformedBody,
}

enum TransformedBody {
    Full(Bytes),
    Stream(Body),
}

impl Transformed {
    fn full(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body: TransformedBody::Full(body),
        }
    }

    /// Converts buffered 2xx responses into a cache entry; anything else is
    /// handed back untouched.
    fn into_cache_entry(self, ttl: std::time::Duration) -> Result<CacheEntry, Self> {
        let Self {
            status,
            headers,
            body,
        } = self;
        match body {
            TransformedBody::Full(bytes) if status.is_success() => {
                Ok(CacheEntry::new(status, headers, bytes, ttl))
            }
            body => Err(Self {
                status,
                headers,
                body,
            }),
        }
    }

    fn into_response(self) -> Response<Body> {
        let body = match self.body {
            TransformedBody::Full(bytes) => Body::from(bytes),
            TransformedBody::Stream(body) => body,
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

fn cached_response(
    entry: CacheEntry,
    if_none_match: Option<&str>,
    cache_status: &'static str,
) -> Response<Body> {
    let marker = HeaderValue::from_static(cache_status);
    if let Some(if_none_match) = if_none_match
        && entry.matches(if_none_match)
    {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&entry.etag) {
            headers.insert(header::ETAG, value);
        }
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        headers.insert(CACHE_STATUS_HEADER, marker);
        return response;
    }

    let mut response = Response::new(Body::from(entry.body));
    *response.status_mut() = entry.status;
    *response.headers_mut() = entry.headers;
    response.headers_mut().insert(CACHE_STATUS_HEADER, marker);
    response
}

async fn serve_static(state: &AppState, rel: &str) -> Response<Body> {
    let Some(root) = state.config.static_dir.as_deref() else {
        return text_response(StatusCode::NOT_FOUND, "Static directory not configured");
    };
    let Some(path) = disk::static_path(root, rel) else {
        return text_response(StatusCode::BAD_REQUEST, "Invalid static path");
    };
    match disk::read_asset(&path).await {
        Some(asset) => {
            let mut response = Response::new(Body::from(asset.body));
            if let Ok(value) = HeaderValue::from_str(&asset.content_type) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            if state.config.features.add_cors {
                add_cors_headers(response.headers_mut());
            }
            response
        }
        None => text_response(StatusCode::NOT_FOUND, "Not found"),
    }
}

/// Sends un-prefixed requests (typically built by page scripts) back
/// through the proxy, using the proxied referer's origin or the configured
/// default upstream.
fn redirect_unprefixed(state: &AppState, req: &Request<Body>) -> Response<Body> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let base = header_str(req.headers(), header::REFERER)
        .and_then(proxied_target)
        .or_else(|| state.config.default_upstream.clone());
    let Some(base) = base else {
        return text_response(
            StatusCode::NOT_FOUND,
            "Not found; request /proxy/<encoded-url> instead",
        );
    };
    let Ok(destination) = base.join(path_and_query) else {
        return text_response(StatusCode::NOT_FOUND, "Not found");
    };

    let location = url_codec::encode(destination.as_str());
    let status = if matches!(*req.method(), Method::GET | Method::HEAD) {
        StatusCode::FOUND
    } else {
        StatusCode::TEMPORARY_REDIRECT
    };
    debug!(path = path_and_query, %location, "redirecting un-prefixed request");
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// Upstream URL of a proxied page, given the absolute URL the browser used.
fn proxied_target(value: &str) -> Option<Url> {
    let url = Url::parse(value).ok()?;
    let mut target = url_codec::decode(url.path()).ok()?;
    url_codec::merge_query(&mut target, url.query());
    Some(target)
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn add_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, PATCH, OPTIONS, HEAD"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-expose-headers",
        HeaderValue::from_static("*"),
    );
    headers.insert("access-control-max-age", HeaderValue::from_static("86400"));
}

fn cors_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    add_cors_headers(response.headers_mut());
    response
}

fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    content_response(status, "text/plain; charset=utf-8", body.to_string())
}

fn html_response(status: StatusCode, body: &str) -> Response<Body> {
    content_response(status, "text/html; charset=utf-8", body.to_string())
}

fn json_response(status: StatusCode, value: Value) -> Response<Body> {
    content_response(status, "application/json", value.to_string())
}

fn content_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
