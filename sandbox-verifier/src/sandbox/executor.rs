/// Execution of a staged sample under the emulation runtime
///
/// The runtime (`wine64` by default) is an opaque subprocess. The harness
/// controls its working directory and the environment variables it sees, and
/// enforces the wall-clock timeout itself: the sample is never trusted to exit.
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ExecutionSettings;
use crate::models::{ExecutionOutcome, ExecutionResult};
use crate::sandbox::Sandbox;

type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// Launches samples inside a sandbox
pub struct SampleExecutor {
    settings: ExecutionSettings,
}

impl SampleExecutor {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Environment overrides for one invocation. Applied to the child only;
    /// the harness's own environment is never modified.
    pub fn environment_for(&self, sandbox_root: &Path) -> HashMap<String, OsString> {
        self.settings
            .home_env_vars
            .iter()
            .map(|name| (name.clone(), sandbox_root.as_os_str().to_os_string()))
            .collect()
    }

    /// Build the runtime command line for a staged sample
    pub fn build_command(&self, sandbox_root: &Path, staged_sample: &Path) -> Command {
        let mut cmd = Command::new(&self.settings.runtime_program);
        cmd.args(&self.settings.runtime_args)
            .arg(staged_sample)
            .current_dir(sandbox_root)
            .envs(self.environment_for(sandbox_root))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down everything the runtime spawned.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Run the staged sample to completion or until the timeout fires.
    ///
    /// Never fails: launch errors and timeouts are reported through
    /// [`ExecutionOutcome`] so that inspection can still run.
    pub async fn execute(&self, sandbox: &Sandbox, staged_sample: &Path) -> ExecutionResult {
        let started = Instant::now();
        let mut cmd = self.build_command(sandbox.root(), staged_sample);

        debug!("Executing sample: {:?}", cmd.as_std());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    runtime = %self.settings.runtime_program.display(),
                    error = %e,
                    "Failed to launch emulation runtime"
                );
                return ExecutionResult::launch_failed(format!(
                    "failed to launch {}: {}",
                    self.settings.runtime_program.display(),
                    e
                ));
            }
        };

        // `Child::id` is gone once the child is reaped; the group outlives it.
        let pid = child.id();
        let cap = self.settings.max_output_bytes;
        let stdout = spawn_drain(child.stdout.take(), cap);
        let stderr = spawn_drain(child.stderr.take(), cap);

        let (outcome, exit_code) = match timeout(self.settings.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(exit_code = ?status.code(), "Sample exited");
                kill_group(pid);
                (ExecutionOutcome::Completed, status.code())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to wait on sample process");
                terminate(&mut child, pid).await;
                (ExecutionOutcome::WaitFailed(e.to_string()), None)
            }
            Err(_) => {
                warn!("Sample timed out after {:?}, terminating", self.settings.timeout);
                terminate(&mut child, pid).await;
                (ExecutionOutcome::TimedOut, None)
            }
        };

        let grace = self.settings.output_drain_grace;
        let stdout = collect_output(stdout, grace).await;
        let stderr = collect_output(stderr, grace).await;

        ExecutionResult {
            timed_out: outcome == ExecutionOutcome::TimedOut,
            outcome,
            exit_code,
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Kill the sample's process group, then the child itself, and reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child already gone");
    }
}

/// SIGKILL whatever is left in the group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "Killed leftover processes in sample group"),
        Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "killpg failed"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Read a pipe to EOF, keeping at most `cap` bytes.
fn spawn_drain<R>(pipe: Option<R>, cap: usize) -> Option<(OutputBuffer, JoinHandle<()>)>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut pipe = pipe?;
    let buffer: OutputBuffer = Arc::new(Mutex::new(Vec::new()));
    let sink = buffer.clone();

    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        let room = cap.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        }
    });

    Some((buffer, handle))
}

/// Wait a bounded time for a drain task, then return whatever it captured.
///
/// Grandchildren of the runtime can keep a pipe open after the child exits.
async fn collect_output(
    drain: Option<(OutputBuffer, JoinHandle<()>)>,
    grace: std::time::Duration,
) -> String {
    let Some((buffer, mut handle)) = drain else {
        return String::new();
    };

    if timeout(grace, &mut handle).await.is_err() {
        debug!("Output pipe still open after {:?}, abandoning it", grace);
        handle.abort();
    }

    let bytes = match buffer.lock() {
        Ok(buf) => buf.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}
