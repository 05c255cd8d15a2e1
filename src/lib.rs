//! Reverse proxy that makes third-party pages embeddable in an iframe.
//!
//! Targets are addressed as `/proxy/<percent-encoded absolute url>`. Responses
//! are decompressed, their HTML and CSS rewritten so every link loops back
//! through the proxy, and frame-blocking headers removed. Static assets are
//! cached in memory and optionally mirrored to disk.

pub mod cache;
pub mod config;
pub mod decompress;
pub mod disk;
pub mod error;
pub mod proxy;
pub mod rewrite;
pub mod url_codec;

pub use config::{AuthConfig, AuthInjection, ConfigError, Features, ProxyConfig};
pub use error::DispatchError;
pub use proxy::{ProxyHandle, spawn_proxy};

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
}
