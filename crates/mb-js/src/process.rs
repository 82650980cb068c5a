//! Sandbox worker processes: how to launch them and how the host talks to one.

use crate::channel::ChannelConfig;
use crate::channel::ChannelRole;
use crate::channel::FramedReader;
use crate::channel::FramedWriter;
use crate::channel::SandboxMessage;
use mb_core::BridgeError;
use mb_core::BridgeResult;
use std::path::PathBuf;
use std::process::Child;
use std::process::ChildStdin;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

/// Flag that switches a program into a worker role.
pub const ROLE_FLAG: &str = "--mb-role";
pub const SANDBOX_ROLE: &str = "sandbox";

/// How to start a sandbox worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLaunch {
    pub executable: PathBuf,
    pub inherit_stderr: bool,
    pub extra_args: Vec<String>,
}

impl SandboxLaunch {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            inherit_stderr: false,
            extra_args: Vec::new(),
        }
    }

    /// Re-executes the running program; it must hand the sandbox role to
    /// [`crate::serve_stdio`].
    pub fn current_exe() -> BridgeResult<Self> {
        let executable = std::env::current_exe().map_err(|error| {
            BridgeError::new(
                "sandbox.executable_missing",
                format!("cannot locate the running executable: {error}"),
            )
        })?;
        Ok(Self::new(executable))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_inherited_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }
}

/// Whether `args` (without the program name) ask for the sandbox role.
pub fn sandbox_role_requested<I, S>(args: I) -> BridgeResult<bool>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg.as_ref() != ROLE_FLAG {
            continue;
        }

        let Some(role) = args.next() else {
            return Err(BridgeError::new(
                "sandbox.role_invalid",
                format!("missing role name after {ROLE_FLAG}"),
            ));
        };
        if role.as_ref() != SANDBOX_ROLE {
            return Err(BridgeError::new(
                "sandbox.role_invalid",
                format!("unsupported process role `{}` (expected: {SANDBOX_ROLE})", role.as_ref()),
            ));
        }
        return Ok(true);
    }

    Ok(false)
}

fn worker_command_args(extra_args: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(extra_args.len() + 2);
    args.extend(extra_args.iter().cloned());
    args.push(ROLE_FLAG.to_owned());
    args.push(SANDBOX_ROLE.to_owned());
    args
}

/// Host half of a live worker. Dropping it kills and reaps the process, so no
/// exit path leaves an analyzer running.
pub(crate) struct WorkerProcess {
    child: Child,
    writer: FramedWriter<ChildStdin>,
    replies: mpsc::Receiver<BridgeResult<SandboxMessage>>,
    live: Arc<AtomicUsize>,
}

impl WorkerProcess {
    pub(crate) fn spawn(
        launch: &SandboxLaunch,
        max_message_bytes: usize,
        live: Arc<AtomicUsize>,
    ) -> BridgeResult<Self> {
        if launch.executable.as_os_str().is_empty() {
            return Err(BridgeError::new(
                "sandbox.executable_missing",
                "sandbox executable path is empty",
            ));
        }
        let config = ChannelConfig::new(ChannelRole::Host, max_message_bytes)?;

        let mut command = Command::new(&launch.executable);
        command
            .args(worker_command_args(&launch.extra_args))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if launch.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|error| {
            BridgeError::new(
                "sandbox.spawn_failed",
                format!(
                    "failed to spawn sandbox worker from `{}`: {error}",
                    launch.executable.display()
                ),
            )
        })?;
        live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pid = child.id(), "spawned sandbox worker");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (tx, replies) = mpsc::channel();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            reap(&mut child, &live);
            return Err(BridgeError::new(
                "sandbox.spawn_failed",
                "sandbox worker started without piped stdio",
            ));
        };

        let process = Self {
            child,
            writer: FramedWriter::new(stdin, config.clone()),
            replies,
            live,
        };

        // Ends on its own once the worker's stdout closes.
        std::thread::Builder::new()
            .name("mb-sandbox-io".to_owned())
            .spawn(move || {
                let mut reader = FramedReader::new(stdout, config);
                loop {
                    let next = match reader.recv() {
                        Ok(Some(message)) => Ok(message),
                        Ok(None) => return,
                        Err(error) => Err(error),
                    };
                    let failed = next.is_err();
                    if tx.send(next).is_err() || failed {
                        return;
                    }
                }
            })
            .map_err(|error| {
                BridgeError::new(
                    "sandbox.spawn_failed",
                    format!("failed to spawn sandbox reader: {error}"),
                )
            })?;

        Ok(process)
    }

    pub(crate) fn send(&mut self, message: &SandboxMessage) -> BridgeResult<()> {
        self.writer.send(message)
    }

    pub(crate) fn recv_timeout(&self, timeout: Duration) -> BridgeResult<SandboxMessage> {
        match self.replies.recv_timeout(timeout) {
            Ok(message) => message,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(BridgeError::new(
                "channel.timeout",
                format!("worker sent nothing within {} ms", timeout.as_millis()),
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(BridgeError::new(
                "channel.closed",
                "sandbox worker closed its output",
            )),
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        reap(&mut self.child, &self.live);
    }
}

fn reap(child: &mut Child, live: &AtomicUsize) {
    let pid = child.id();
    // Already-exited workers make kill fail; wait still reaps them.
    let _ = child.kill();
    match child.wait() {
        Ok(status) => tracing::debug!(pid, %status, "sandbox worker reaped"),
        Err(error) => tracing::debug!(pid, %error, "failed to reap sandbox worker"),
    }
    live.fetch_sub(1, Ordering::SeqCst);
}
