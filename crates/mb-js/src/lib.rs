//! Remote analyzer sandbox: a networkless script context in a worker process
//! the host kills when the analyzer overstays its deadline.

mod bootstrap;
mod channel;
mod loader;
mod process;
mod worker;

pub use bootstrap::js_string_literal;
pub use bootstrap::render_bootstrap;
pub use channel::ChannelConfig;
pub use channel::ChannelRole;
pub use channel::FramedReader;
pub use channel::FramedWriter;
pub use channel::HARD_MAX_MESSAGE_BYTES;
pub use channel::SandboxMessage;
pub use channel::SessionStart;
pub use channel::decode_frame;
pub use channel::decode_message;
pub use channel::encode_frame;
pub use loader::HttpScriptLoader;
pub use loader::MAX_SCRIPT_BYTES;
pub use loader::ScriptLoader;
pub use loader::StaticScriptLoader;
pub use process::ROLE_FLAG;
pub use process::SANDBOX_ROLE;
pub use process::SandboxLaunch;
pub use process::sandbox_role_requested;
pub use worker::WORKER_STACK_BYTES;
pub use worker::serve_session;
pub use worker::serve_stdio;

use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::Clock;
use mb_core::PageSnapshot;
use mb_core::SystemClock;
use mb_security::SandboxPolicy;
use process::WorkerProcess;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use url::Url;
use uuid::Uuid;

/// Runtime hardening knobs for one sandbox context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    pub loop_iteration_limit: u64,
    pub max_message_bytes: usize,
    /// Job-queue/timer rounds the worker runs while waiting for `analyze` to settle.
    pub max_event_turns: usize,
    pub timers_per_turn: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 256,
            stack_size_limit: 10 * 1024,
            loop_iteration_limit: 1_000_000,
            max_message_bytes: HARD_MAX_MESSAGE_BYTES,
            max_event_turns: 64,
            timers_per_turn: 64,
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        ChannelConfig::new(ChannelRole::Host, self.max_message_bytes)?;

        if self.recursion_limit == 0 || self.stack_size_limit == 0 || self.loop_iteration_limit == 0 {
            return Err(BridgeError::new(
                "sandbox.config_invalid",
                "sandbox runtime limits must be greater than zero",
            ));
        }

        if self.max_event_turns == 0 || self.timers_per_turn == 0 {
            return Err(BridgeError::new(
                "sandbox.config_invalid",
                "sandbox event turns and timer budget must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Anything that can ask a remote analyzer about a page.
pub trait RemoteAnalyzer: Send + Sync {
    /// Raw, untrusted analyzer result for `snapshot`.
    fn analyze(
        &self,
        snapshot: &PageSnapshot,
        remote_js_url: &str,
        base_url: &str,
        timeout: Duration,
    ) -> BridgeResult<Value>;
}

/// Runs remote analyzers, one fresh worker process per call.
#[derive(Clone)]
pub struct RemoteAnalyzerSandbox {
    config: SandboxConfig,
    policy: SandboxPolicy,
    loader: Arc<dyn ScriptLoader>,
    launch: SandboxLaunch,
    live_workers: Arc<AtomicUsize>,
}

impl std::fmt::Debug for RemoteAnalyzerSandbox {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteAnalyzerSandbox")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("launch", &self.launch)
            .finish_non_exhaustive()
    }
}

impl RemoteAnalyzerSandbox {
    pub fn new(
        config: SandboxConfig,
        policy: SandboxPolicy,
        loader: Arc<dyn ScriptLoader>,
        launch: SandboxLaunch,
    ) -> Self {
        Self {
            config,
            policy,
            loader,
            launch,
            live_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Default limits and policy, fetching analyzers over HTTP.
    pub fn with_http_loader(fetch_timeout: Duration, launch: SandboxLaunch) -> Self {
        Self::new(
            SandboxConfig::default(),
            SandboxPolicy::default(),
            Arc::new(HttpScriptLoader::new(fetch_timeout)),
            launch,
        )
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Worker processes started by this sandbox (or its clones) and not yet reaped.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// First message of a session: the rendered bootstrap plus analyzer source.
    pub fn session_start(
        &self,
        token: &str,
        page_url: &str,
        script_url: &Url,
        source: String,
    ) -> SessionStart {
        SessionStart {
            token: token.to_owned(),
            script_url: script_url.to_string(),
            bootstrap: render_bootstrap(&self.policy, token, page_url),
            source,
            limits: self.config.clone(),
        }
    }

    /// Loads `remote_js_url` (resolved against `base_url`) into a fresh context
    /// and asks its `MaPlayerRemoteAnalyzer.analyze` about `snapshot`.
    ///
    /// `timeout` bounds the whole exchange, script fetch and readiness
    /// included. The worker is killed on every exit path. The returned value
    /// is untrusted and still needs sanitizing.
    pub fn run(
        &self,
        snapshot: &PageSnapshot,
        remote_js_url: &str,
        base_url: &str,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        self.config.validate()?;
        self.policy.validate()?;
        let script_url = self.policy.resolve_script_url(remote_js_url, base_url)?;

        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + Duration::from_secs(24 * 60 * 60));
        let source = self
            .loader
            .load(&script_url)
            .map_err(|error| BridgeError::new("sandbox.load_failed", error.message))?;
        if Instant::now() >= deadline {
            return Err(ready_timeout());
        }

        let token = new_session_token(SystemClock.now_millis());
        let start = self.session_start(&token, &snapshot.url, &script_url, source);
        tracing::debug!(script = %script_url, "opening analyzer sandbox");
        let mut worker = WorkerProcess::spawn(
            &self.launch,
            self.config.max_message_bytes,
            Arc::clone(&self.live_workers),
        )?;

        worker
            .send(&SandboxMessage::Start {
                session: Box::new(start),
            })
            .map_err(worker_failed)?;
        await_ready(&worker, deadline)?;
        worker
            .send(&SandboxMessage::RunAnalyze {
                token: token.clone(),
                snapshot: Box::new(snapshot.clone()),
            })
            .map_err(worker_failed)?;

        let reply = worker
            .recv_timeout(remaining(deadline))
            .map_err(|error| match error.code {
                "channel.timeout" => BridgeError::new(
                    "sandbox.timeout",
                    format!("remote analyzer timeout after {} ms", timeout.as_millis()),
                ),
                _ => worker_failed(error),
            })?;
        accept_reply(&token, reply)
    }
}

impl RemoteAnalyzer for RemoteAnalyzerSandbox {
    fn analyze(
        &self,
        snapshot: &PageSnapshot,
        remote_js_url: &str,
        base_url: &str,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        self.run(snapshot, remote_js_url, base_url, timeout)
    }
}

/// `ma-<millis>-<random>`; single use per sandbox session.
pub fn new_session_token(now_millis: u64) -> String {
    format!("ma-{now_millis}-{}", Uuid::new_v4().simple())
}

/// Checks the reply envelope and token, yielding the raw analyzer result.
pub fn accept_reply(expected_token: &str, message: SandboxMessage) -> BridgeResult<Value> {
    let (token, ok, result, error) = match message {
        SandboxMessage::RemoteResult {
            token,
            ok,
            result,
            error,
        } => (token, ok, result, error),
        other => {
            return Err(BridgeError::new(
                "sandbox.unexpected_message",
                format!("expected `remote-result`, got `{}`", other.kind()),
            ));
        }
    };

    let Some(token) = token else {
        return Err(BridgeError::new(
            "sandbox.token_missing",
            "remote analyzer reply carries no session token",
        ));
    };
    if token != expected_token {
        return Err(BridgeError::new(
            "sandbox.token_mismatch",
            "remote analyzer reply carries a foreign session token",
        ));
    }

    if ok {
        Ok(result)
    } else {
        Err(BridgeError::new(
            "sandbox.remote_failed",
            error.unwrap_or_else(|| "Remote analyzer failed.".to_owned()),
        ))
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn ready_timeout() -> BridgeError {
    BridgeError::new(
        "sandbox.ready_timeout",
        "sandbox did not signal readiness before the timeout",
    )
}

fn worker_failed(error: BridgeError) -> BridgeError {
    BridgeError::new(
        "sandbox.worker_failed",
        format!("sandbox worker failed: {error}"),
    )
}

fn await_ready(worker: &WorkerProcess, deadline: Instant) -> BridgeResult<()> {
    match worker.recv_timeout(remaining(deadline)) {
        Ok(SandboxMessage::Ready) => Ok(()),
        Ok(SandboxMessage::LoadFailed { error }) => {
            Err(BridgeError::new("sandbox.load_failed", error))
        }
        Ok(other) => Err(BridgeError::new(
            "sandbox.unexpected_message",
            format!("expected `ready`, got `{}`", other.kind()),
        )),
        Err(error) if error.code == "channel.timeout" => Err(ready_timeout()),
        Err(error) => Err(worker_failed(error)),
    }
}

include!("tests.rs");
