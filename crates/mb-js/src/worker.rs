//! Worker side of the sandbox: one analyzer session served over stdio.

use crate::channel::ChannelConfig;
use crate::channel::ChannelRole;
use crate::channel::FramedReader;
use crate::channel::FramedWriter;
use crate::channel::HARD_MAX_MESSAGE_BYTES;
use crate::channel::SandboxMessage;
use crate::channel::SessionStart;
use boa_engine::Context;
use boa_engine::JsResult;
use boa_engine::JsValue;
use boa_engine::NativeFunction;
use boa_engine::Source;
use boa_engine::js_string;
use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::PageSnapshot;
use mb_security::MutationTarget;
use mb_security::should_block_mutation;
use serde_json::json;
use std::io::Read;
use std::io::Write;

/// Stack for the thread that owns the script context.
pub const WORKER_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Entry point for a process started in the sandbox role.
pub fn serve_stdio() -> BridgeResult<()> {
    let worker = std::thread::Builder::new()
        .name("mb-sandbox".to_owned())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(|| serve_session(std::io::stdin().lock(), std::io::stdout().lock()))
        .map_err(|error| {
            BridgeError::new(
                "sandbox.spawn_failed",
                format!("failed to spawn sandbox thread: {error}"),
            )
        })?;

    worker
        .join()
        .map_err(|_| BridgeError::new("sandbox.worker_panicked", "sandbox thread panicked"))?
}

/// Reads a `start` message, evaluates the analyzer, answers one
/// `run-analyze`, then returns.
pub fn serve_session<R: Read, W: Write>(input: R, output: W) -> BridgeResult<()> {
    let config = ChannelConfig::new(ChannelRole::Worker, HARD_MAX_MESSAGE_BYTES)?;
    let mut reader = FramedReader::new(input, config.clone());
    let mut writer = FramedWriter::new(output, config);

    let session = match reader.recv()? {
        Some(SandboxMessage::Start { session }) => session,
        Some(other) => {
            return Err(BridgeError::new(
                "sandbox.unexpected_message",
                format!("expected `start`, got `{}`", other.kind()),
            ));
        }
        None => return Ok(()),
    };

    let mut context = match prepare_context(&session) {
        Ok(context) => context,
        Err(error) => {
            tracing::debug!(%error, "sandbox failed to load analyzer");
            return writer.send(&SandboxMessage::LoadFailed {
                error: error.message,
            });
        }
    };
    writer.send(&SandboxMessage::Ready)?;

    loop {
        match reader.recv()? {
            Some(SandboxMessage::RunAnalyze { token, snapshot }) => {
                if token != session.token {
                    tracing::warn!("sandbox ignored run-analyze with a foreign token");
                    continue;
                }
                let reply = run_analyze(&mut context, &session, &snapshot);
                drain_console(&mut context);
                if let Err(error) = writer.send_raw(reply.as_bytes()) {
                    return writer.send_raw(failure_reply(&session.token, &error.message).as_bytes());
                }
                return Ok(());
            }
            Some(SandboxMessage::Shutdown) | None => return Ok(()),
            Some(other) => {
                tracing::debug!(kind = other.kind(), "sandbox ignored message");
            }
        }
    }
}

fn prepare_context(session: &SessionStart) -> BridgeResult<Context> {
    let mut context = Context::default();
    let limits = &session.limits;
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);
    context
        .runtime_limits_mut()
        .set_stack_size_limit(limits.stack_size_limit);
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);

    context
        .register_global_callable(
            js_string!("__mb_should_block_mutation"),
            2,
            NativeFunction::from_fn_ptr(guard_mutation),
        )
        .map_err(|error| {
            BridgeError::new(
                "sandbox.bootstrap_failed",
                format!("failed to install mutation guard: {error}"),
            )
        })?;

    context
        .eval(Source::from_bytes(session.bootstrap.as_bytes()))
        .map_err(|error| {
            BridgeError::new(
                "sandbox.bootstrap_failed",
                format!("sandbox bootstrap failed: {error}"),
            )
        })?;

    context
        .eval(Source::from_bytes(session.source.as_bytes()))
        .map_err(|error| {
            BridgeError::new(
                "sandbox.remote_threw",
                format!("remote script `{}` threw: {error}", session.script_url),
            )
        })?;
    pump_events(&mut context, session);
    Ok(context)
}

/// `(target, callContext) -> bool` for the document shim's mutation methods.
fn guard_mutation(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let mut text = |index: usize| -> JsResult<String> {
        match args.get(index) {
            Some(value) if !value.is_undefined() => {
                Ok(value.to_string(context)?.to_std_string_escaped())
            }
            _ => Ok(String::new()),
        }
    };
    let target_name = text(0)?;
    let call_context = text(1)?;

    let target = match target_name.as_str() {
        "document" => MutationTarget::Document,
        "documentElement" => MutationTarget::DocumentElement,
        "body" => MutationTarget::Body,
        tag => MutationTarget::Element(tag),
    };
    Ok(JsValue::from(should_block_mutation(target, &call_context)))
}

fn run_analyze(context: &mut Context, session: &SessionStart, snapshot: &PageSnapshot) -> String {
    let encoded = match serde_json::to_string(snapshot) {
        Ok(encoded) => encoded,
        Err(error) => {
            return failure_reply(&session.token, &format!("snapshot encoding failed: {error}"));
        }
    };

    let call = format!("__mb_run_analyze({encoded});");
    if let Err(error) = context.eval(Source::from_bytes(call.as_bytes())) {
        return failure_reply(&session.token, &error.to_string());
    }

    let limits = &session.limits;
    for _ in 0..limits.max_event_turns {
        context.run_jobs();
        if let Some(reply) = take_reply(context) {
            return reply;
        }
        if flush_timers(context, limits.timers_per_turn) == 0 {
            context.run_jobs();
            return take_reply(context)
                .unwrap_or_else(|| failure_reply(&session.token, "Remote analyzer never settled."));
        }
    }

    take_reply(context).unwrap_or_else(|| {
        failure_reply(
            &session.token,
            &format!(
                "Remote analyzer did not settle within {} event turns.",
                limits.max_event_turns
            ),
        )
    })
}

/// Runs promise jobs and timers until the context goes idle or the budget runs out.
fn pump_events(context: &mut Context, session: &SessionStart) {
    for _ in 0..session.limits.max_event_turns {
        context.run_jobs();
        if flush_timers(context, session.limits.timers_per_turn) == 0 {
            break;
        }
    }
}

fn flush_timers(context: &mut Context, limit: usize) -> usize {
    let call = format!("__mb_flush_timers({limit});");
    context
        .eval(Source::from_bytes(call.as_bytes()))
        .ok()
        .and_then(|value| value.as_number())
        .map(|runs| if runs > 0.0 { runs as usize } else { 0 })
        .unwrap_or_default()
}

fn take_reply(context: &mut Context) -> Option<String> {
    let reply = eval_string(context, b"__mb_take_reply()")?;
    if reply.is_empty() { None } else { Some(reply) }
}

fn drain_console(context: &mut Context) {
    let Some(lines) = eval_string(context, b"__mb_take_console()") else {
        return;
    };
    for line in lines.lines().filter(|line| !line.is_empty()) {
        tracing::debug!(target: "mb_js::console", "{line}");
    }
}

fn eval_string(context: &mut Context, source: &[u8]) -> Option<String> {
    let value = context.eval(Source::from_bytes(source)).ok()?;
    let js_string = value.to_string(context).ok()?;
    Some(js_string.to_std_string_escaped())
}

fn failure_reply(token: &str, message: &str) -> String {
    json!({
        "type": "remote-result",
        "token": token,
        "ok": false,
        "error": message,
    })
    .to_string()
}
