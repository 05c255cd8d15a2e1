//! Optional on-disk mirror of fetched static assets.
//!
//! Files live under `<root>/<host>[_<port>]/<path>`, each with a
//! `<file>.meta.json` sidecar recording the content type. The same root is
//! served under `/static/`.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::cache::hex;

const SIDECAR_SUFFIX: &str = ".meta.json";
const INDEX_FILE: &str = "index";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
}

/// Asset read back from the mirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirroredAsset {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Clone, Debug)]
pub struct DiskMirror {
    root: PathBuf,
}

impl DiskMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mirror location for a target URL. `None` for URLs without a host.
    pub fn path_for(&self, url: &Url) -> Option<PathBuf> {
        let host = url.host_str()?;
        let host_dir = match url.port() {
            Some(port) => format!("{}_{port}", sanitize_segment(host)),
            None => sanitize_segment(host),
        };

        let mut path = self.root.join(host_dir);
        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| {
                segments
                    .map(|segment| {
                        let decoded = urlencoding::decode(segment)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| segment.to_string());
                        sanitize_segment(&decoded)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (file, dirs) = match segments.split_last() {
            Some((last, dirs)) if !last.is_empty() => (last.clone(), dirs),
            Some((_, dirs)) => (INDEX_FILE.to_string(), dirs),
            None => (INDEX_FILE.to_string(), &[][..]),
        };
        for dir in dirs.iter().filter(|dir| !dir.is_empty()) {
            path.push(dir);
        }

        let file = match url.query().filter(|query| !query.is_empty()) {
            Some(query) => with_query_suffix(&file, query),
            None => file,
        };
        path.push(file);
        Some(path)
    }

    pub async fn read(&self, url: &Url) -> Option<MirroredAsset> {
        let path = self.path_for(url)?;
        let asset = read_asset(&path).await?;
        debug!(path = %path.display(), "disk mirror hit");
        Some(asset)
    }

    /// Stores `body` for `url`. Both the file and its sidecar are written to
    /// a temporary name first and renamed into place.
    pub async fn write(&self, url: &Url, content_type: &str, body: &[u8]) -> io::Result<()> {
        let path = self.path_for(url).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "target url has no host")
        })?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let sidecar = serde_json::to_vec(&Sidecar {
            content_type: content_type.to_string(),
        })?;
        write_atomic(&sidecar_path(&path), &sidecar).await?;
        write_atomic(&path, body).await?;
        debug!(path = %path.display(), bytes = body.len(), "disk mirror stored");
        Ok(())
    }
}

/// Resolves a `/static/` request path inside `root`. Rejects any `..`
/// segment, before or after percent-decoding.
pub fn static_path(root: &Path, rel: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(rel).ok()?;
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return None,
            segment => {
                path.push(segment);
                pushed = true;
            }
        }
    }
    pushed.then_some(path)
}

/// Reads a mirrored file together with its sidecar; falls back to a guess
/// from the extension when the sidecar is missing.
pub async fn read_asset(path: &Path) -> Option<MirroredAsset> {
    let body = tokio::fs::read(path).await.ok()?;
    let content_type = match tokio::fs::read(sidecar_path(path)).await {
        Ok(raw) => serde_json::from_slice::<Sidecar>(&raw)
            .map(|sidecar| sidecar.content_type)
            .unwrap_or_else(|_| guess_content_type(path).to_string()),
        Err(_) => guess_content_type(path).to_string(),
    };
    Some(MirroredAsset {
        body: Bytes::from(body),
        content_type,
    })
}

pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut temp = OsString::from(path.as_os_str());
    temp.push(format!(
        ".tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let temp = PathBuf::from(temp);
    tokio::fs::write(&temp, contents).await?;
    if let Err(err) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(err);
    }
    Ok(())
}

fn sanitize_segment(segment: &str) -> String {
    match segment {
        "." | ".." => "_".to_string(),
        segment => segment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
    }
}

/// `app.js` + `v=2` becomes `app.<hash>.js`.
fn with_query_suffix(file: &str, query: &str) -> String {
    let digest = hex(&Sha256::digest(query.as_bytes()));
    let suffix = &digest[..16];
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{suffix}.{ext}"),
        _ => format!("{file}.{suffix}"),
    }
}
