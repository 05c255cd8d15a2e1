use std::{
    io::Write,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use flate2::{Compression, write::GzEncoder};
use hyper::{
    Body, HeaderMap, Request, Response, Server, StatusCode,
    service::{make_service_fn, service_fn},
};
use iframe_proxy::{AuthInjection, ProxyConfig, spawn_proxy, url_codec};
use reqwest::Method;
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle};

struct TestProxy {
    addr: SocketAddr,
    handle: Option<iframe_proxy::ProxyHandle>,
    client: reqwest::Client,
}

impl TestProxy {
    async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    async fn spawn_with(configure: impl FnOnce(&mut ProxyConfig)) -> Self {
        let mut config = ProxyConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            ..Default::default()
        };
        configure(&mut config);

        let handle = spawn_proxy(config).await.expect("failed to start proxy");

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(5))
            .build()
            .expect("client");

        Self {
            addr: handle.addr,
            handle: Some(handle),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
    ) -> reqwest::Response {
        let mut request = self.client.request(method, self.url(path));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.send().await.expect("request")
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.request(Method::GET, path, &[]).await
    }

    async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
    }
}

type Handler = Arc<dyn Fn(Request<Body>) -> Response<Body> + Send + Sync + 'static>;

struct TestHttpBackend {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestHttpBackend {
    async fn serve(handler: Handler) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .expect("bind backend");
        listener.set_nonblocking(true).expect("set nonblocking");
        let addr = listener.local_addr().expect("local addr");

        let make_svc = make_service_fn(move |_conn| {
            let handler = handler.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                    let handler = handler.clone();
                    async move { Ok::<_, hyper::Error>((handler)(req)) }
                }))
            }
        });

        let server = Server::from_tcp(listener)
            .expect("server from tcp")
            .serve(make_svc);
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let server = server.with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(err) = server.await {
                eprintln!("backend server error: {err}");
            }
        });

        Self {
            addr,
            shutdown: Some(tx),
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Proxy path for `path` on this backend.
    fn proxied(&self, path: &str) -> String {
        url_codec::encode(&self.url(path))
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

fn gzip(payload: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

fn unused_port() -> u16 {
    let listener =
        std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).expect("bind");
    listener.local_addr().expect("addr").port()
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn health_check() {
    let proxy = TestProxy::spawn().await;

    let response = proxy.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].as_str().is_some());

    proxy.shutdown().await;
}

#[tokio::test]
async fn root_serves_usage_page() {
    let proxy = TestProxy::spawn().await;

    let response = proxy.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "content-type").unwrap().starts_with("text/html"));
    let body = response.text().await.expect("body");
    assert!(body.contains("/proxy/"));

    proxy.shutdown().await;
}

#[tokio::test]
async fn html_is_rewritten_and_frame_headers_removed() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/html; charset=utf-8")
            .header("content-security-policy", "frame-ancestors 'none'")
            .header("x-frame-options", "DENY")
            .body(Body::from(
                r#"<html><head></head><body><a href="/x" target="_blank">x</a></body></html>"#,
            ))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn().await;

    let response = proxy.get(&backend.proxied("/page")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "content-security-policy").is_none());
    assert!(header(&response, "x-frame-options").is_none());
    assert_eq!(header(&response, "vary"), Some("Accept-Encoding"));

    let body = response.text().await.expect("body");
    let link = format!(r#"href="{}""#, backend.proxied("/x"));
    assert!(body.contains(&link), "link not rewritten: {body}");
    assert!(!body.contains(r#"target="_blank""#));
    assert!(body.contains("window.__proxySameWindow"));

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn inject_scripts_can_be_disabled() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .header("content-type", "text/html")
            .body(Body::from(
                r#"<html><head></head><body><a onclick="window.open('/y')">plain</a></body></html>"#,
            ))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn_with(|config| config.features.inject_scripts = false).await;

    let body = proxy
        .get(&backend.proxied("/"))
        .await
        .text()
        .await
        .expect("body");
    assert!(!body.contains("__proxySameWindow"));
    assert!(body.contains("window.open('/y')"));
    assert!(body.contains("plain"));

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn gzip_html_is_decoded_before_rewriting() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .header("content-type", "text/html")
            .header("content-encoding", "gzip")
            .body(Body::from(gzip(
                br#"<html><head></head><body><img src="logo.png"></body></html>"#,
            )))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn().await;

    let response = proxy.get(&backend.proxied("/docs/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "content-encoding").is_none());
    let declared: usize = header(&response, "content-length")
        .expect("content-length")
        .parse()
        .expect("numeric length");
    let body = response.text().await.expect("body");
    assert_eq!(declared, body.len());
    assert!(body.contains(&backend.proxied("/docs/logo.png")));

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn stylesheets_are_rewritten() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .header("content-type", "text/css")
            .body(Body::from("body{background:url(/img/bg.png)}"))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn().await;

    let body = proxy
        .get(&backend.proxied("/css/site.css"))
        .await
        .text()
        .await
        .expect("body");
    assert_eq!(
        body,
        format!("body{{background:url({})}}", backend.proxied("/img/bg.png"))
    );

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn redirects_stay_inside_the_proxy() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .status(StatusCode::FOUND)
            .header("location", "/login?next=%2F")
            .body(Body::from("moved"))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn().await;

    let response = proxy.get(&backend.proxied("/account")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header(&response, "location"),
        Some(backend.proxied("/login?next=%2F").as_str())
    );
    assert!(response.text().await.expect("body").is_empty());

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn invalid_target_returns_json_400() {
    let proxy = TestProxy::spawn().await;

    let response = proxy.get("/proxy/not-a-url").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["error"], "invalid_url");
    assert_eq!(body["details"]["requestUrl"], "/proxy/not-a-url");
    assert!(body["details"]["targetUrl"].is_null());
    assert!(body["message"].as_str().is_some());

    proxy.shutdown().await;
}

#[tokio::test]
async fn refused_connection_returns_json_503() {
    let port = unused_port();
    let proxy = TestProxy::spawn().await;

    let target = format!("http://127.0.0.1:{port}/");
    let response = proxy.get(&url_codec::encode(&target)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["error"], "upstream_unreachable");
    assert_eq!(body["details"]["targetUrl"], target.as_str());

    proxy.shutdown().await;
}

#[tokio::test]
async fn static_assets_are_cached_with_etags() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let backend = TestHttpBackend::serve(Arc::new(move |_req| {
        counter.fetch_add(1, Ordering::SeqCst);
        Response::builder()
            .header("content-type", "application/javascript")
            .body(Body::from("console.log('hi');"))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn().await;
    let path = backend.proxied("/js/app.js");

    let first = proxy.get(&path).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-proxy-cache"), Some("MISS"));
    let etag = header(&first, "etag").expect("etag").to_string();
    assert_eq!(first.text().await.expect("body"), "console.log('hi');");

    let second = proxy.get(&path).await;
    assert_eq!(header(&second, "x-proxy-cache"), Some("HIT"));
    assert_eq!(second.text().await.expect("body"), "console.log('hi');");

    let conditional = proxy
        .request(Method::GET, &path, &[("If-None-Match", etag.as_str())])
        .await;
    assert_eq!(conditional.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&conditional, "etag"), Some(etag.as_str()));

    assert_eq!(hits.load(Ordering::SeqCst), 1);

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn memory_cache_can_be_disabled() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let backend = TestHttpBackend::serve(Arc::new(move |_req| {
        counter.fetch_add(1, Ordering::SeqCst);
        Response::builder()
            .header("content-type", "image/png")
            .body(Body::from("png"))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn_with(|config| config.features.memory_cache = false).await;
    let path = backend.proxied("/a.png");

    for _ in 0..2 {
        let response = proxy.get(&path).await;
        assert!(header(&response, "x-proxy-cache").is_none());
        assert_eq!(response.bytes().await.expect("body").as_ref(), b"png");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn compressed_passthrough_follows_client_accept_encoding() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .header("content-type", "application/json")
            .header("content-encoding", "gzip")
            .body(Body::from(gzip(br#"{"ok":true}"#)))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn().await;
    let path = backend.proxied("/api/data");

    let plain = proxy.get(&path).await;
    assert!(header(&plain, "content-encoding").is_none());
    assert_eq!(plain.text().await.expect("body"), r#"{"ok":true}"#);

    let encoded = proxy
        .request(Method::GET, &path, &[("Accept-Encoding", "gzip")])
        .await;
    assert_eq!(header(&encoded, "content-encoding"), Some("gzip"));
    let raw = encoded.bytes().await.expect("body");
    assert_eq!(raw.as_ref(), gzip(br#"{"ok":true}"#).as_slice());

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn outbound_requests_are_spoofed_and_authenticated() {
    let captured: Arc<Mutex<Option<(String, HeaderMap)>>> = Arc::new(Mutex::new(None));
    let sink = captured.clone();
    let backend = TestHttpBackend::serve(Arc::new(move |req| {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        *sink.lock().unwrap() = Some((path, req.headers().clone()));
        Response::builder()
            .header("content-type", "text/plain")
            .body(Body::from("ok"))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn_with(|config| {
        config.auth.injections.push(AuthInjection {
            host: "127.0.0.1".into(),
            bearer_token: Some("token-123".into()),
            cookie: Some("session=abc".into()),
        });
    })
    .await;

    let path = format!("{}?q=rust", backend.proxied("/search"));
    let response = proxy
        .request(
            Method::GET,
            &path,
            &[
                ("User-Agent", "curl/8.0"),
                ("If-None-Match", "\"stale\""),
                ("If-Modified-Since", "Mon, 01 Jan 2024 00:00:00 GMT"),
                ("Cookie", "theme=dark"),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (seen_path, headers) = captured.lock().unwrap().take().expect("request captured");
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    assert_eq!(seen_path, "/search?q=rust");
    assert_eq!(get("host"), Some(backend.addr.to_string()));
    assert_eq!(
        get("user-agent").as_deref(),
        Some(iframe_proxy::config::DEFAULT_USER_AGENT)
    );
    assert_eq!(get("accept-encoding").as_deref(), Some("gzip, deflate, br"));
    assert_eq!(get("referer"), Some(backend.url("/")));
    assert_eq!(get("authorization").as_deref(), Some("Bearer token-123"));
    assert_eq!(get("cookie").as_deref(), Some("theme=dark; session=abc"));
    assert!(get("if-none-match").is_none());
    assert!(get("if-modified-since").is_none());
    assert!(get("origin").is_none());

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn auth_status_responses_are_overridden() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"error":"login required"}"#))
            .unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn_with(|config| config.features.auth_override = true).await;

    let response = proxy.get(&backend.proxied("/api/user/info")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["isLoggedIn"], true);

    let untouched = proxy.get(&backend.proxied("/api/other")).await;
    assert_eq!(untouched.status(), StatusCode::UNAUTHORIZED);

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn unprefixed_requests_redirect_by_referer() {
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder().body(Body::from("ok")).unwrap()
    }))
    .await;
    let proxy = TestProxy::spawn().await;

    let referer = proxy.url(&backend.proxied("/app/page"));
    let response = proxy
        .request(Method::GET, "/api/items?page=2", &[("Referer", referer.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header(&response, "location"),
        Some(backend.proxied("/api/items?page=2").as_str())
    );

    let post = proxy
        .request(Method::POST, "/api/items", &[("Referer", referer.as_str())])
        .await;
    assert_eq!(post.status(), StatusCode::TEMPORARY_REDIRECT);

    let orphan = proxy.get("/favicon.ico").await;
    assert_eq!(orphan.status(), StatusCode::NOT_FOUND);

    proxy.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn unprefixed_requests_fall_back_to_default_upstream() {
    let proxy = TestProxy::spawn_with(|config| {
        config.default_upstream = Some("https://example.com/".parse().unwrap());
    })
    .await;

    let response = proxy.get("/favicon.ico").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header(&response, "location"),
        Some("/proxy/https%3A%2F%2Fexample.com%2Ffavicon.ico")
    );

    proxy.shutdown().await;
}

#[tokio::test]
async fn cors_preflight_is_answered_locally() {
    let proxy = TestProxy::spawn_with(|config| config.features.add_cors = true).await;

    let response = proxy
        .request(Method::OPTIONS, "/proxy/https%3A%2F%2Fexample.com%2Fapi", &[])
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "access-control-allow-origin"), Some("*"));

    proxy.shutdown().await;
}

#[tokio::test]
async fn disk_mirror_serves_assets_after_upstream_is_gone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = TestHttpBackend::serve(Arc::new(|_req| {
        Response::builder()
            .header("content-type", "image/png")
            .body(Body::from(&b"\x89PNG-bytes"[..]))
            .unwrap()
    }))
    .await;
    let root = dir.path().to_path_buf();
    let proxy = TestProxy::spawn_with(move |config| {
        config.static_dir = Some(root);
        config.features.memory_cache = false;
    })
    .await;
    let path = backend.proxied("/img/logo.png");
    let host_dir = format!("127.0.0.1_{}", backend.addr.port());

    let first = proxy.get(&path).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.bytes().await.expect("body").as_ref(), b"\x89PNG-bytes");
    assert!(dir.path().join(&host_dir).join("img/logo.png").exists());

    backend.shutdown().await;

    let mirrored = proxy.get(&path).await;
    assert_eq!(mirrored.status(), StatusCode::OK);
    assert_eq!(header(&mirrored, "content-type"), Some("image/png"));
    assert_eq!(mirrored.bytes().await.expect("body").as_ref(), b"\x89PNG-bytes");

    let direct = proxy.get(&format!("/static/{host_dir}/img/logo.png")).await;
    assert_eq!(direct.status(), StatusCode::OK);
    assert_eq!(header(&direct, "content-type"), Some("image/png"));

    let traversal = proxy.get("/static/img/..%2f..%2fsecret").await;
    assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);

    let missing = proxy.get("/static/nothing/here.png").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    proxy.shutdown().await;
}
