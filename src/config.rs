//! Channel configuration — WebSocket origin resolution and address derivation.
//!
//! Resolution order mirrors the rest of the stack's env handling:
//!
//! 1. `API_WS_ORIGIN` — an explicit `ws://` / `wss://` origin, used verbatim.
//! 2. `API_ORIGIN` (falling back to `API_BASE_URL`) — an HTTP origin,
//!    rewritten to its WebSocket equivalent (`http→ws`, `https→wss`).
//!
//! The per-project channel address is `<origin>/ws/projects/<projectId>/`.

use anyhow::{bail, Context, Result};
use url::Url;
use uuid::Uuid;

pub const ENV_WS_ORIGIN: &str = "API_WS_ORIGIN";
pub const ENV_HTTP_ORIGIN: &str = "API_ORIGIN";
pub const ENV_HTTP_BASE_URL: &str = "API_BASE_URL";

/// Validated channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    ws_origin: Url,
}

impl ChannelConfig {
    /// Build from an explicit WebSocket origin (`ws://` or `wss://`).
    pub fn new(ws_origin: &str) -> Result<Self> {
        let url = Url::parse(ws_origin.trim_end_matches('/'))
            .with_context(|| format!("Parsing WebSocket origin `{ws_origin}`"))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { ws_origin: url }),
            other => bail!("WebSocket origin `{ws_origin}` has scheme `{other}`, expected ws/wss"),
        }
    }

    /// Resolve from the process environment, honoring a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let ws = std::env::var(ENV_WS_ORIGIN).ok();
        let http = std::env::var(ENV_HTTP_ORIGIN)
            .or_else(|_| std::env::var(ENV_HTTP_BASE_URL))
            .ok();
        Self::resolve(ws.as_deref(), http.as_deref())
    }

    /// Resolve from explicit candidates: a direct WebSocket origin wins, an
    /// HTTP origin is rewritten to its WebSocket equivalent.
    pub fn resolve(ws_origin: Option<&str>, http_origin: Option<&str>) -> Result<Self> {
        if let Some(ws) = ws_origin.filter(|s| !s.is_empty()) {
            return Self::new(ws);
        }
        if let Some(http) = http_origin.filter(|s| !s.is_empty()) {
            return Self::new(&rewrite_http_origin(http));
        }
        bail!("No channel origin configured: set {ENV_WS_ORIGIN} or {ENV_HTTP_ORIGIN}");
    }

    pub fn ws_origin(&self) -> &Url {
        &self.ws_origin
    }

    /// Per-project channel address: `<origin>/ws/projects/<projectId>/`.
    pub fn issue_channel_url(&self, project_id: Uuid) -> Result<Url> {
        let base = self.ws_origin.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/ws/projects/{project_id}/"))
            .context("Deriving issue channel address")
    }
}

/// Rewrite an HTTP origin to its WebSocket equivalent, case-insensitively on
/// the scheme. Origins already using ws/wss pass through unchanged.
fn rewrite_http_origin(origin: &str) -> String {
    let lower = origin.to_ascii_lowercase();
    if lower.starts_with("https:") {
        format!("wss:{}", &origin["https:".len()..])
    } else if lower.starts_with("http:") {
        format!("ws:{}", &origin["http:".len()..])
    } else {
        origin.to_string()
    }
}
