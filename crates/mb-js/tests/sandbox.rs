//! Sandbox runs against real worker processes.
#![allow(unused_crate_dependencies)]

use mb_core::BridgeResult;
use mb_core::PageSnapshot;
use mb_js::RemoteAnalyzerSandbox;
use mb_js::SandboxConfig;
use mb_js::SandboxLaunch;
use mb_js::StaticScriptLoader;
use mb_security::SandboxPolicy;
use serde_json::Value;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

const PAGE_URL: &str = "https://films.test/voddetail/42.html";
const SCRIPT_URL: &str = "https://cdn.test/analyzer.js";

fn snapshot() -> PageSnapshot {
    PageSnapshot {
        url: PAGE_URL.to_owned(),
        title: "Arrival - Films".to_owned(),
        ready_state: "complete".to_owned(),
        ..PageSnapshot::default()
    }
}

fn worker_sandbox(source: &str) -> RemoteAnalyzerSandbox {
    sandbox_with(
        SandboxLaunch::new(PathBuf::from(env!("CARGO_BIN_EXE_mb-sandbox"))),
        source,
    )
}

fn sandbox_with(launch: SandboxLaunch, source: &str) -> RemoteAnalyzerSandbox {
    RemoteAnalyzerSandbox::new(
        SandboxConfig::default(),
        SandboxPolicy::default(),
        Arc::new(StaticScriptLoader::new().with_script(SCRIPT_URL, source)),
        launch,
    )
}

fn run(sandbox: &RemoteAnalyzerSandbox, timeout: Duration) -> BridgeResult<Value> {
    sandbox.run(&snapshot(), SCRIPT_URL, PAGE_URL, timeout)
}

fn error_code(result: BridgeResult<Value>) -> &'static str {
    assert!(result.is_err(), "expected an error, got {result:?}");
    match result {
        Err(error) => error.code,
        Ok(_) => unreachable!(),
    }
}

#[test]
fn analyzer_runs_in_a_worker_process() {
    let sandbox = worker_sandbox(
        r#"
        globalThis.MaPlayerRemoteAnalyzer = {
          analyze: function (snapshot) {
            return Promise.resolve({ title: snapshot.title.split(' - ')[0], pageUrl: location.href });
          }
        };
        "#,
    );
    assert_eq!(
        run(&sandbox, Duration::from_secs(10)),
        Ok(json!({"title": "Arrival", "pageUrl": PAGE_URL}))
    );
    assert_eq!(sandbox.live_workers(), 0);
}

#[test]
fn timed_out_worker_is_killed() {
    // Loop limits off, so only the deadline can stop the analyzer.
    let sandbox = RemoteAnalyzerSandbox::new(
        SandboxConfig {
            loop_iteration_limit: u64::MAX,
            ..SandboxConfig::default()
        },
        SandboxPolicy::default(),
        Arc::new(StaticScriptLoader::new().with_script(
            SCRIPT_URL,
            r#"
            globalThis.MaPlayerRemoteAnalyzer = {
              analyze: function () {
                var spins = 0;
                for (var outer = 0; outer < 999999; outer++) {
                  for (var inner = 0; inner < 999999; inner++) {
                    spins++;
                  }
                }
                while (true) {
                  spins++;
                }
              }
            };
            "#,
        )),
        SandboxLaunch::new(PathBuf::from(env!("CARGO_BIN_EXE_mb-sandbox"))),
    );

    let started = Instant::now();
    assert_eq!(error_code(run(&sandbox, Duration::from_millis(300))), "sandbox.timeout");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(sandbox.live_workers(), 0);
}

#[test]
fn load_errors_travel_back_from_the_worker() {
    let sandbox = worker_sandbox("throw new Error('boom');");
    assert_eq!(error_code(run(&sandbox, Duration::from_secs(10))), "sandbox.load_failed");
    assert_eq!(sandbox.live_workers(), 0);
}

#[cfg(unix)]
mod scripted_workers {
    use super::error_code;
    use super::run;
    use super::sandbox_with;
    use mb_js::HARD_MAX_MESSAGE_BYTES;
    use mb_js::SandboxLaunch;
    use mb_js::encode_frame;
    use serde_json::Value;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Worker that replays `replies` verbatim, then drains stdin.
    struct ReplayWorker {
        frames: PathBuf,
    }

    impl ReplayWorker {
        fn new(replies: &[Value]) -> Self {
            let mut stream = Vec::new();
            for reply in replies {
                let payload = reply.to_string();
                stream.extend(
                    encode_frame(payload.as_bytes(), HARD_MAX_MESSAGE_BYTES)
                        .unwrap_or_else(|_| unreachable!()),
                );
            }
            let frames = std::env::temp_dir()
                .join(format!("mb-replay-{}.bin", uuid::Uuid::new_v4().simple()));
            std::fs::write(&frames, stream).unwrap_or_else(|_| unreachable!());
            Self { frames }
        }

        fn launch(&self) -> SandboxLaunch {
            SandboxLaunch::new(PathBuf::from("/bin/sh")).with_args([
                "-c".to_owned(),
                r#"cat "$0"; exec cat > /dev/null"#.to_owned(),
                self.frames.display().to_string(),
            ])
        }
    }

    impl Drop for ReplayWorker {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.frames);
        }
    }

    #[test]
    fn replies_with_a_foreign_token_are_rejected() {
        let worker = ReplayWorker::new(&[
            json!({"type": "ready"}),
            json!({"type": "remote-result", "token": "ma-0-forged", "ok": true, "result": {"title": "Forged"}}),
        ]);
        let sandbox = sandbox_with(worker.launch(), "");
        assert_eq!(
            error_code(run(&sandbox, Duration::from_secs(10))),
            "sandbox.token_mismatch"
        );
        assert_eq!(sandbox.live_workers(), 0);
    }

    #[test]
    fn replies_without_a_token_are_rejected() {
        let worker = ReplayWorker::new(&[
            json!({"type": "ready"}),
            json!({"type": "remote-result", "ok": true, "result": {"title": "Anonymous"}}),
        ]);
        let sandbox = sandbox_with(worker.launch(), "");
        assert_eq!(
            error_code(run(&sandbox, Duration::from_secs(10))),
            "sandbox.token_missing"
        );
        assert_eq!(sandbox.live_workers(), 0);
    }

    #[test]
    fn silent_worker_hits_the_readiness_deadline() {
        let worker = ReplayWorker::new(&[]);
        let sandbox = sandbox_with(worker.launch(), "");
        assert_eq!(
            error_code(run(&sandbox, Duration::from_millis(200))),
            "sandbox.ready_timeout"
        );
        assert_eq!(sandbox.live_workers(), 0);
    }

    #[test]
    fn worker_exiting_early_is_reported() {
        let launch = SandboxLaunch::new(PathBuf::from("/bin/sh"))
            .with_args(["-c".to_owned(), "exit 0".to_owned()]);
        let sandbox = sandbox_with(launch, "");
        assert_eq!(
            error_code(run(&sandbox, Duration::from_secs(10))),
            "sandbox.worker_failed"
        );
        assert_eq!(sandbox.live_workers(), 0);
    }
}
