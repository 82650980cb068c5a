//! Page bridge: local extraction, optional remote refinement, host dispatch
//! and the click-to-autoplay continuation.

mod config;
mod host;
mod merge;

pub use config::BridgeConfig;
pub use config::BridgeOptions;
pub use config::DEFAULT_AUTO_PLAY_DELAY_MS;
pub use config::DEFAULT_ERROR_HANDLER_NAME;
pub use config::DEFAULT_HANDLER_NAME;
pub use config::DEFAULT_REMOTE_TIMEOUT_MS;
pub use host::HostBridge;
pub use host::HostCall;
pub use host::RecordingHost;
pub use merge::RemoteFields;
pub use merge::merge_payload;
pub use merge::sanitize_remote_result;

use mb_core::AutoContext;
use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::Clock;
use mb_core::ErrorReport;
use mb_core::ExtractedMetadata;
use mb_dom::ElementRef;
use mb_dom::PageDocument;
use mb_dom::attr_or_empty;
use mb_dom::closest;
use mb_dom::text_of;
use mb_extract::LocalExtractor;
use mb_extract::build_snapshot;
use mb_extract::capture_auto_context;
use mb_extract::should_mark_auto_for_click;
use mb_js::RemoteAnalyzer;
use mb_js::RemoteAnalyzerSandbox;
use mb_js::SandboxLaunch;
use mb_security::is_devtools_probe_source;
use mb_storage::AutoContinuationStore;
use mb_storage::SessionStorage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const PROBE_EXCERPT_CHARS: usize = 120;

/// Per-webview bridge state, owned by the host and passed to every operation.
#[derive(Debug, Clone, Default)]
pub struct BridgeContext {
    config: BridgeConfig,
    detail_click_hooked: bool,
    auto_played_for_url: Option<String>,
    reported_play_targets: BTreeMap<String, BTreeSet<usize>>,
}

impl BridgeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn detail_click_hooked(&self) -> bool {
        self.detail_click_hooked
    }

    /// Page URL the last auto-play fired for.
    pub fn auto_played_for_url(&self) -> Option<&str> {
        self.auto_played_for_url.as_deref()
    }
}

/// Share link the host should render a play control next to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayTarget {
    /// Position among the page's share links, in document order.
    pub ordinal: usize,
    pub share_url: String,
}

/// Auto-play decided on page load; run it with [`Bridge::run_auto_play`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAutoPlay {
    pub delay: Duration,
    pub page_url: String,
    pub share_ordinal: usize,
    pub share_url: String,
    pub context: Option<AutoContext>,
}

/// Inline script that looks like an inspector probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeFinding {
    pub script_ordinal: usize,
    pub excerpt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLoadReport {
    pub play_targets: Vec<PlayTarget>,
    pub probes: Vec<ProbeFinding>,
    pub pending_auto_play: Option<PendingAutoPlay>,
}

/// Stateless bridge services; all mutable state lives in [`BridgeContext`]
/// and session storage.
#[derive(Clone)]
pub struct Bridge {
    extractor: LocalExtractor,
    analyzer: Arc<dyn RemoteAnalyzer>,
    auto_store: AutoContinuationStore,
    host: Option<Arc<dyn HostBridge>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Bridge")
            .field("auto_store", &self.auto_store)
            .field("has_host", &self.host.is_some())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Bridge over `storage` with no host. Analyzers are fetched over HTTP and
    /// run by re-executing the current program in the sandbox role.
    pub fn new(storage: SessionStorage, clock: Arc<dyn Clock>) -> BridgeResult<Self> {
        let sandbox = RemoteAnalyzerSandbox::with_http_loader(
            Duration::from_secs(10),
            SandboxLaunch::current_exe()?,
        );
        Ok(Self {
            extractor: LocalExtractor::new()?,
            analyzer: Arc::new(sandbox),
            auto_store: AutoContinuationStore::new(storage, Arc::clone(&clock)),
            host: None,
            clock,
        })
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn RemoteAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostBridge>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn extractor(&self) -> &LocalExtractor {
        &self.extractor
    }

    pub fn auto_store(&self) -> &AutoContinuationStore {
        &self.auto_store
    }

    /// Applies `options` and installs the detail-click hook once per context.
    pub fn init(&self, ctx: &mut BridgeContext, options: &BridgeOptions) {
        ctx.config = BridgeConfig::from_options(options);
        if !ctx.detail_click_hooked {
            ctx.detail_click_hooked = true;
            tracing::debug!("installed detail click hook");
        }
        tracing::info!(
            handler = %ctx.config.handler_name,
            error_handler = %ctx.config.error_handler_name,
            remote = ctx.config.remote_js_url.as_deref().unwrap_or("-"),
            timeout_ms = ctx.config.remote_timeout_ms(),
            "bridge initialized"
        );
    }

    /// Runs the page-load checks; see [`PageLoadReport`].
    pub fn on_page_load(&self, ctx: &mut BridgeContext, page: &PageDocument) -> PageLoadReport {
        PageLoadReport {
            play_targets: self.ensure_play_targets(ctx, page),
            probes: self.audit_page(page),
            pending_auto_play: self.maybe_auto_play(ctx, page),
        }
    }

    /// Click handler. Arms auto-continuation when the clicked link looks like
    /// a detail link; returns whether it did.
    pub fn on_click(
        &self,
        ctx: &BridgeContext,
        page: &PageDocument,
        target: ElementRef<'_>,
    ) -> bool {
        if !ctx.detail_click_hooked {
            return false;
        }
        let Some(anchor) = closest(target, &self.extractor.selectors().link) else {
            return false;
        };
        if !should_mark_auto_for_click(&self.extractor, page, anchor) {
            return false;
        }

        let context = capture_auto_context(&self.extractor, page, anchor);
        match self.auto_store.arm(&page.origin(), &context) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(%error, "failed to persist auto-continuation");
                false
            }
        }
    }

    /// Consumes a fresh armed state and picks the first share link to play.
    pub fn maybe_auto_play(
        &self,
        ctx: &mut BridgeContext,
        page: &PageDocument,
    ) -> Option<PendingAutoPlay> {
        let origin = page.origin();
        match self.auto_store.is_armed(&origin) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(error) => {
                tracing::debug!(%error, "auto-continuation state unreadable");
                return None;
            }
        }
        if ctx.auto_played_for_url.as_deref() == Some(page.href()) {
            return None;
        }

        let context = self.auto_store.consume(&origin).unwrap_or_else(|error| {
            tracing::debug!(%error, "failed to consume auto-continuation");
            None
        });
        let first = self.extractor.share_anchors(page).into_iter().next()?;
        ctx.auto_played_for_url = Some(page.href().to_owned());

        Some(PendingAutoPlay {
            delay: ctx.config.auto_play_delay,
            page_url: page.href().to_owned(),
            share_ordinal: 0,
            share_url: page.resolve_url(attr_or_empty(first, "href")),
            context,
        })
    }

    /// Waits out the delay, then plays the pending share link.
    pub fn run_auto_play(
        &self,
        ctx: &BridgeContext,
        page: &PageDocument,
        pending: &PendingAutoPlay,
    ) -> BridgeResult<ExtractedMetadata> {
        self.clock.sleep(pending.delay);
        let anchors = self.extractor.share_anchors(page);
        let Some(anchor) = anchors.get(pending.share_ordinal).copied() else {
            return Err(BridgeError::new(
                "bridge.share_link_missing",
                format!("share link #{} is gone from {}", pending.share_ordinal, page.href()),
            ));
        };
        Ok(self.trigger_play(ctx, page, anchor, pending.context.as_ref()))
    }

    /// Share links not yet reported for this page URL.
    pub fn ensure_play_targets(
        &self,
        ctx: &mut BridgeContext,
        page: &PageDocument,
    ) -> Vec<PlayTarget> {
        let reported = ctx
            .reported_play_targets
            .entry(page.href().to_owned())
            .or_default();

        self.extractor
            .share_anchors(page)
            .into_iter()
            .enumerate()
            .filter(|(ordinal, _)| reported.insert(*ordinal))
            .map(|(ordinal, anchor)| PlayTarget {
                ordinal,
                share_url: page.resolve_url(attr_or_empty(anchor, "href")),
            })
            .collect()
    }

    /// Play control pressed for a reported target. No auto context applies.
    pub fn play(
        &self,
        ctx: &BridgeContext,
        page: &PageDocument,
        ordinal: usize,
    ) -> BridgeResult<ExtractedMetadata> {
        let known = ctx
            .reported_play_targets
            .get(page.href())
            .is_some_and(|reported| reported.contains(&ordinal));
        let anchors = self.extractor.share_anchors(page);
        match anchors.get(ordinal).copied() {
            Some(anchor) if known => Ok(self.trigger_play(ctx, page, anchor, None)),
            _ => Err(BridgeError::new(
                "bridge.play_target_unknown",
                format!("no play target #{ordinal} reported for {}", page.href()),
            )),
        }
    }

    /// Extracts, optionally refines remotely, and hands the payload to the
    /// host's play handler. Analyzer failures fall back to the local payload.
    pub fn trigger_play(
        &self,
        ctx: &BridgeContext,
        page: &PageDocument,
        anchor: ElementRef<'_>,
        auto_context: Option<&AutoContext>,
    ) -> ExtractedMetadata {
        let local = self
            .extractor
            .extract_local_payload(page, anchor, auto_context);

        let payload = match ctx.config.remote_js_url.as_deref() {
            Some(remote_js_url) => {
                let snapshot = build_snapshot(&self.extractor, page, anchor, &local, auto_context);
                let remote = self
                    .analyzer
                    .analyze(&snapshot, remote_js_url, page.href(), ctx.config.remote_timeout)
                    .and_then(|value| sanitize_remote_result(&value));
                match remote {
                    Ok(remote) => merge_payload(page, &local, Some(&remote)),
                    Err(error) => {
                        tracing::warn!(%error, url = remote_js_url, "remote analyzer failed");
                        self.report_error(ctx, page, &error.message);
                        local
                    }
                }
            }
            None => local,
        };

        tracing::info!(
            handler = %ctx.config.handler_name,
            share_url = %payload.share_url,
            title = %payload.title,
            "dispatching play payload"
        );
        self.call_handler(&ctx.config.handler_name, &payload);
        payload
    }

    /// Sends `{message, pageUrl, timestamp}` to the error handler.
    pub fn report_error(&self, ctx: &BridgeContext, page: &PageDocument, message: &str) {
        let message = if message.is_empty() { "bridge error" } else { message };
        let report = ErrorReport {
            message: message.to_owned(),
            page_url: page.href().to_owned(),
            timestamp: self.clock.now_millis(),
        };
        self.call_handler(&ctx.config.error_handler_name, &report);
    }

    /// Inline scripts matching the inspector-probe heuristic.
    pub fn audit_page(&self, page: &PageDocument) -> Vec<ProbeFinding> {
        let findings: Vec<ProbeFinding> = page
            .query_all(&self.extractor.selectors().inline_script)
            .into_iter()
            .enumerate()
            .filter_map(|(script_ordinal, script)| {
                let source = text_of(script);
                is_devtools_probe_source(&source).then(|| ProbeFinding {
                    script_ordinal,
                    excerpt: source.chars().take(PROBE_EXCERPT_CHARS).collect(),
                })
            })
            .collect();

        for finding in &findings {
            tracing::warn!(
                page = page.href(),
                script = finding.script_ordinal,
                "inline script probes for an attached inspector"
            );
        }
        findings
    }

    fn call_handler(&self, handler_name: &str, payload: &impl Serialize) {
        let Some(host) = self.host.as_ref() else {
            return;
        };
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::debug!(%error, handler = handler_name, "failed to encode host payload");
                return;
            }
        };
        if let Err(error) = host.call_handler(handler_name, payload) {
            tracing::debug!(%error, handler = handler_name, "host handler failed");
        }
    }
}

include!("tests.rs");
