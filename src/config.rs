use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const DEFAULT_STATUS_PATHS: &[&str] = &["/api/user/info", "/api/auth/status", "/api/session"];

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid upstream url {0:?}")]
    InvalidUpstream(String),
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    /// Origin that un-prefixed requests without a proxied referer are sent to.
    pub default_upstream: Option<Url>,
    pub user_agent: String,
    pub cache_ttl: Duration,
    pub cache_sweep_interval: Duration,
    /// Root of the disk mirror and of `/static/`. Disabled when unset.
    pub static_dir: Option<PathBuf>,
    pub features: Features,
    pub auth: AuthConfig,
    /// Extra attempts after a connect-level failure.
    pub connect_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            default_upstream: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_ttl: Duration::from_secs(3600),
            cache_sweep_interval: Duration::from_secs(600),
            static_dir: None,
            features: Features::default(),
            auth: AuthConfig::default(),
            connect_retries: 0,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl ProxyConfig {
    /// Defaults overlaid with the JSON file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::default().merge_file(path)
    }

    pub fn merge_file(self, path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig =
            serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        self.apply(file)
    }

    pub fn apply(mut self, file: FileConfig) -> Result<Self, ConfigError> {
        if let Some(addr) = file.bind_addr {
            self.bind_addr = addr;
        }
        if let Some(upstream) = file.default_upstream {
            self.default_upstream = Some(parse_upstream(&upstream)?);
        }
        if let Some(user_agent) = file.user_agent {
            self.user_agent = user_agent;
        }
        if let Some(secs) = file.cache_ttl_secs {
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = file.cache_sweep_interval_secs {
            self.cache_sweep_interval = Duration::from_secs(secs);
        }
        if file.static_dir.is_some() {
            self.static_dir = file.static_dir;
        }
        if let Some(features) = file.features {
            self.features = features;
        }
        if let Some(auth) = file.auth {
            self.auth = auth;
        }
        if let Some(retries) = file.connect_retries {
            self.connect_retries = retries;
        }
        if let Some(ms) = file.retry_delay_ms {
            self.retry_delay = Duration::from_millis(ms);
        }
        Ok(self)
    }
}

/// On-disk JSON shape. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<SocketAddr>,
    pub default_upstream: Option<String>,
    pub user_agent: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_sweep_interval_secs: Option<u64>,
    pub static_dir: Option<PathBuf>,
    pub features: Option<Features>,
    pub auth: Option<AuthConfig>,
    pub connect_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Features {
    pub inject_scripts: bool,
    pub memory_cache: bool,
    pub add_cors: bool,
    pub auth_override: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            inject_scripts: true,
            memory_cache: true,
            add_cors: false,
            auth_override: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub injections: Vec<AuthInjection>,
    /// Target paths whose JSON responses are replaced when
    /// `features.auth_override` is on.
    pub status_paths: Vec<String>,
    pub status_payload: Value,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            injections: Vec::new(),
            status_paths: DEFAULT_STATUS_PATHS.iter().map(|p| p.to_string()).collect(),
            status_payload: json!({
                "success": true,
                "isLoggedIn": true,
                "authenticated": true,
                "user": {
                    "id": "proxy-user",
                    "name": "Proxy User",
                },
            }),
        }
    }
}

impl AuthConfig {
    pub fn injections_for<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a AuthInjection> {
        self.injections.iter().filter(move |inj| inj.matches(host))
    }

    pub fn is_status_path(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.status_paths
            .iter()
            .any(|candidate| candidate.trim_end_matches('/') == path)
    }
}

/// Credentials added to outbound requests for one host and its subdomains.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AuthInjection {
    pub host: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
}

impl AuthInjection {
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let want = self.host.trim_start_matches('.').to_ascii_lowercase();
        host == want
            || host
                .strip_suffix(&want)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// Accepts `https://host[:port]` or a bare host (https assumed).
pub fn parse_upstream(value: &str) -> Result<Url, ConfigError> {
    let trimmed = value.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    match Url::parse(&candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(url),
        _ => Err(ConfigError::InvalidUpstream(value.to_string())),
    }
}
