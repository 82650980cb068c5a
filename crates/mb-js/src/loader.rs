//! Sources for remote analyzer scripts.

use mb_core::BridgeError;
use mb_core::BridgeResult;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Script bytes beyond this are refused before evaluation.
pub const MAX_SCRIPT_BYTES: usize = 4 * 1024 * 1024;

/// Fetches analyzer source text. Runs on the host before a worker starts.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, url: &Url) -> BridgeResult<String>;
}

impl<T: ScriptLoader + ?Sized> ScriptLoader for Arc<T> {
    fn load(&self, url: &Url) -> BridgeResult<String> {
        (**self).load(url)
    }
}

/// Loads scripts over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpScriptLoader {
    agent: ureq::Agent,
    max_bytes: usize,
}

impl HttpScriptLoader {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .user_agent(concat!("ma-player-bridge/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            max_bytes: MAX_SCRIPT_BYTES,
        }
    }
}

impl Default for HttpScriptLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ScriptLoader for HttpScriptLoader {
    fn load(&self, url: &Url) -> BridgeResult<String> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(BridgeError::new(
                "sandbox.url_scheme",
                format!("refusing to fetch analyzer over `{}`", url.scheme()),
            ));
        }

        let response = self.agent.get(url.as_str()).call().map_err(|error| {
            BridgeError::new(
                "sandbox.script_fetch_failed",
                format!("failed to fetch analyzer `{url}`: {error}"),
            )
        })?;

        let limit = u64::try_from(self.max_bytes).unwrap_or(u64::MAX);
        let mut body = Vec::new();
        response
            .into_reader()
            .take(limit.saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|error| {
                BridgeError::new(
                    "sandbox.script_fetch_failed",
                    format!("failed to read analyzer `{url}`: {error}"),
                )
            })?;
        if body.len() > self.max_bytes {
            return Err(BridgeError::new(
                "sandbox.script_too_large",
                format!("analyzer `{url}` exceeds {} bytes", self.max_bytes),
            ));
        }

        String::from_utf8(body).map_err(|_| {
            BridgeError::new(
                "sandbox.script_encoding_invalid",
                format!("analyzer `{url}` is not valid UTF-8"),
            )
        })
    }
}

/// In-memory scripts keyed by absolute URL, with an optional artificial delay.
#[derive(Debug, Clone, Default)]
pub struct StaticScriptLoader {
    scripts: BTreeMap<String, String>,
    delay: Option<Duration>,
}

impl StaticScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, url: &str, source: impl Into<String>) -> Self {
        self.scripts.insert(url.to_owned(), source.into());
        self
    }

    /// Sleeps before every load; stands in for a slow network.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl ScriptLoader for StaticScriptLoader {
    fn load(&self, url: &Url) -> BridgeResult<String> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        self.scripts.get(url.as_str()).cloned().ok_or_else(|| {
            BridgeError::new(
                "sandbox.script_fetch_failed",
                format!("no analyzer registered for `{url}`"),
            )
        })
    }
}
