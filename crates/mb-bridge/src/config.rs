//! Bridge options as the host passes them, and their normalized form.

use mb_core::BridgeError;
use mb_core::BridgeResult;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_HANDLER_NAME: &str = "maPlayerPlay";
pub const DEFAULT_ERROR_HANDLER_NAME: &str = "maPlayerBridgeError";
pub const DEFAULT_REMOTE_TIMEOUT_MS: f64 = 2000.0;
/// Pause between deciding to auto-play and dispatching, so the page settles.
pub const DEFAULT_AUTO_PLAY_DELAY_MS: u64 = 60;

/// Raw init options. Every field is optional and loosely typed; see
/// [`BridgeConfig::from_options`] for the normalization rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeOptions {
    pub handler_name: Option<String>,
    pub error_handler_name: Option<String>,
    pub remote_js_url: Option<String>,
    /// Number or numeric string.
    pub remote_timeout_ms: Option<Value>,
    /// Number or numeric string; zero dispatches immediately.
    pub auto_play_delay_ms: Option<Value>,
}

impl BridgeOptions {
    /// Reads options from an arbitrary JSON value. Anything other than an
    /// object yields the defaults.
    pub fn from_json(value: &Value) -> BridgeResult<Self> {
        if !value.is_object() {
            return Ok(Self::default());
        }

        serde_json::from_value(value.clone()).map_err(|error| {
            BridgeError::new(
                "config.options_invalid",
                format!("bridge options are malformed: {error}"),
            )
        })
    }
}

/// Normalized bridge configuration held by a [`crate::BridgeContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub handler_name: String,
    pub error_handler_name: String,
    pub remote_js_url: Option<String>,
    pub remote_timeout: Duration,
    pub auto_play_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_options(&BridgeOptions::default())
    }
}

impl BridgeConfig {
    /// Trims names and falls back to defaults for empty ones. The timeout
    /// must be finite and positive, otherwise 2000 ms. The auto-play delay
    /// must be finite and not negative, otherwise 60 ms.
    pub fn from_options(options: &BridgeOptions) -> Self {
        let remote_js_url = options
            .remote_js_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_owned);

        Self {
            handler_name: name_or(options.handler_name.as_deref(), DEFAULT_HANDLER_NAME),
            error_handler_name: name_or(
                options.error_handler_name.as_deref(),
                DEFAULT_ERROR_HANDLER_NAME,
            ),
            remote_js_url,
            remote_timeout: remote_timeout(options.remote_timeout_ms.as_ref()),
            auto_play_delay: auto_play_delay(options.auto_play_delay_ms.as_ref()),
        }
    }

    pub fn remote_timeout_ms(&self) -> u128 {
        self.remote_timeout.as_millis()
    }
}

fn name_or(raw: Option<&str>, fallback: &str) -> String {
    raw.map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
        .to_owned()
}

fn numeric_millis(raw: Option<&Value>) -> Option<f64> {
    match raw {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|millis| millis.is_finite())
}

fn remote_timeout(raw: Option<&Value>) -> Duration {
    let millis = numeric_millis(raw)
        .filter(|millis| *millis > 0.0)
        .unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS);

    Duration::try_from_secs_f64(millis / 1000.0)
        .unwrap_or_else(|_| Duration::from_millis(2000))
}

fn auto_play_delay(raw: Option<&Value>) -> Duration {
    numeric_millis(raw)
        .filter(|millis| *millis >= 0.0)
        .and_then(|millis| Duration::try_from_secs_f64(millis / 1000.0).ok())
        .unwrap_or(Duration::from_millis(DEFAULT_AUTO_PLAY_DELAY_MS))
}
