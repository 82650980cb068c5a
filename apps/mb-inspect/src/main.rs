//! Runs the page bridge against a saved HTML page and prints every host
//! callback as a JSON line.

mod charset;

use clap::Parser;
use mb_bridge::Bridge;
use mb_bridge::BridgeContext;
use mb_bridge::BridgeOptions;
use mb_bridge::HostBridge;
use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::SystemClock;
use mb_dom::PageDocument;
use mb_js::RemoteAnalyzerSandbox;
use mb_js::SandboxLaunch;
use mb_storage::SessionStorage;
use serde_json::Value;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mb-inspect")]
#[command(about = "Extract play metadata from a saved video page")]
#[command(version)]
struct Cli {
    /// Location the page was loaded from
    #[arg(long)]
    url: String,

    /// Saved page source
    #[arg(long)]
    html: PathBuf,

    /// `Content-Type` the page was served with
    #[arg(long, default_value = "text/html")]
    content_type: String,

    #[arg(long, default_value = "")]
    referrer: String,

    /// Share link to play, by position; every link when omitted
    #[arg(long)]
    anchor: Option<usize>,

    /// Remote analyzer script, absolute or relative to --url
    #[arg(long)]
    remote_js: Option<String>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pause before auto-play fires
    #[arg(long)]
    auto_play_delay_ms: Option<u64>,

    #[arg(long)]
    handler_name: Option<String>,

    #[arg(long)]
    error_handler_name: Option<String>,
}

/// Host that writes each callback to stdout.
struct StdoutHost;

impl HostBridge for StdoutHost {
    fn call_handler(&self, handler_name: &str, payload: Value) -> BridgeResult<()> {
        print_line(&json!({"handler": handler_name, "payload": payload}))
    }
}

fn print_line(value: &Value) -> BridgeResult<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{value}").map_err(|error| {
        BridgeError::new("inspect.stdout_failed", format!("failed to write output: {error}"))
    })
}

fn main() -> ExitCode {
    // Sandbox workers are this binary re-executed; they speak frames on
    // stdio and must not log to stdout.
    match mb_js::sandbox_role_requested(std::env::args().skip(1)) {
        Ok(true) => return serve_sandbox(),
        Ok(false) => {}
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "inspection failed");
            ExitCode::FAILURE
        }
    }
}

fn serve_sandbox() -> ExitCode {
    match mb_js::serve_stdio() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> BridgeResult<()> {
    let body = std::fs::read(&cli.html).map_err(|error| {
        BridgeError::new(
            "inspect.html_unreadable",
            format!("failed to read {}: {error}", cli.html.display()),
        )
    })?;
    let decoded = charset::decode_page(&body, &cli.content_type);
    tracing::debug!(charset = %decoded.charset, bytes = body.len(), "decoded page");

    let page = PageDocument::parse(&cli.url, &decoded.text)?
        .with_referrer(cli.referrer.clone())
        .with_charset(decoded.charset);

    let options = BridgeOptions {
        handler_name: cli.handler_name.clone(),
        error_handler_name: cli.error_handler_name.clone(),
        remote_js_url: cli.remote_js.clone(),
        remote_timeout_ms: cli.timeout_ms.map(Value::from),
        auto_play_delay_ms: cli.auto_play_delay_ms.map(Value::from),
    };
    let mut bridge = Bridge::new(SessionStorage::default(), Arc::new(SystemClock))?
        .with_host(Arc::new(StdoutHost));
    if let Some(timeout_ms) = cli.timeout_ms.filter(|millis| *millis > 0) {
        bridge = bridge.with_analyzer(Arc::new(RemoteAnalyzerSandbox::with_http_loader(
            Duration::from_millis(timeout_ms),
            SandboxLaunch::current_exe()?,
        )));
    }

    let mut ctx = BridgeContext::new();
    bridge.init(&mut ctx, &options);
    let report = bridge.on_page_load(&mut ctx, &page);
    for finding in &report.probes {
        print_line(&json!({"probe": finding}))?;
    }
    for target in &report.play_targets {
        print_line(&json!({"playTarget": target}))?;
    }

    let ordinals: Vec<usize> = match cli.anchor {
        Some(ordinal) => vec![ordinal],
        None => report.play_targets.iter().map(|target| target.ordinal).collect(),
    };
    if ordinals.is_empty() {
        tracing::info!(page = page.href(), "page has no share links");
    }
    for ordinal in ordinals {
        bridge.play(&ctx, &page, ordinal)?;
    }
    Ok(())
}
