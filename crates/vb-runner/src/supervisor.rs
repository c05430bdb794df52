//! Supervised child processes.
//!
//! A [`Supervisor`] owns exactly one child at a time. Each line the child
//! writes is echoed, prefixed with the supervisor id, to the matching sink
//! of its [`OutputSinks`]: our own stdout/stderr by default.
//! When the child exits it is started again with the same arguments, after a
//! backoff delay, until [`Supervisor::stop`] is called.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{SupervisorError, SupervisorResult};

// ── Restart policy ──────────────────────────────────────────────

/// Delay between a child exiting and its restart.
///
/// The delay starts at `initial_backoff` and doubles per crash up to
/// `max_backoff`. A child that stayed up for `stable_after` resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            stable_after: Duration::from_secs(10),
        }
    }
}

impl RestartPolicy {
    /// Restart without any delay.
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            stable_after: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct Backoff {
    policy: RestartPolicy,
    next: Duration,
}

impl Backoff {
    fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            next: policy.initial_backoff,
        }
    }

    /// Delay before restarting a child that ran for `uptime`.
    fn delay(&mut self, uptime: Duration) -> Duration {
        if uptime >= self.policy.stable_after {
            self.next = self.policy.initial_backoff;
        }
        let delay = self.next.min(self.policy.max_backoff);
        self.next = delay.saturating_mul(2).min(self.policy.max_backoff);
        delay
    }
}

// ── Output ──────────────────────────────────────────────────────

/// Receives one prefixed output line of a child.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Destinations for a child's stdout and stderr lines.
#[derive(Clone)]
pub struct OutputSinks {
    pub stdout: LineSink,
    pub stderr: LineSink,
}

impl Default for OutputSinks {
    fn default() -> Self {
        Self {
            stdout: Arc::new(|line: &str| println!("{line}")),
            stderr: Arc::new(|line: &str| eprintln!("{line}")),
        }
    }
}

fn prefixed(id: &str, line: &str) -> String {
    format!("{id}: {line}")
}

// ── Supervisor ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Spawn {
    executable: PathBuf,
    args: Vec<String>,
}

impl Spawn {
    fn spawn(&self, id: &str) -> SupervisorResult<Child> {
        Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Spawn {
                id: id.to_string(),
                reason: format!("{}: {e}", self.executable.display()),
            })
    }
}

struct Shared {
    id: String,
    restart: AtomicBool,
    running: AtomicBool,
    restarts: AtomicU32,
    stop: Notify,
    output: OutputSinks,
}

/// Handle to one supervised child process.
pub struct Supervisor {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Launch `executable` with `args` and keep it running.
    ///
    /// Fails only if the first launch fails. Must be called from within a
    /// tokio runtime.
    pub fn start(
        id: &str,
        executable: impl AsRef<Path>,
        args: &[String],
        policy: RestartPolicy,
    ) -> SupervisorResult<Self> {
        Self::start_with_output(id, executable, args, policy, OutputSinks::default())
    }

    /// Like [`Supervisor::start`], with child output sent to `output`.
    pub fn start_with_output(
        id: &str,
        executable: impl AsRef<Path>,
        args: &[String],
        policy: RestartPolicy,
        output: OutputSinks,
    ) -> SupervisorResult<Self> {
        let command = Spawn {
            executable: executable.as_ref().to_path_buf(),
            args: args.to_vec(),
        };
        let child = command.spawn(id)?;
        tracing::info!(id, executable = %command.executable.display(), ?args, "process started");

        let shared = Arc::new(Shared {
            id: id.to_string(),
            restart: AtomicBool::new(true),
            running: AtomicBool::new(true),
            restarts: AtomicU32::new(0),
            stop: Notify::new(),
            output,
        });
        let task = tokio::spawn(supervise(Arc::clone(&shared), command, child, policy));

        Ok(Self {
            shared,
            task: Some(task),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Whether a child is alive right now.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of restarts so far.
    pub fn restart_count(&self) -> u32 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    /// Kill the child and disable further restarts for good.
    ///
    /// Returns [`SupervisorError::NotRunning`] if no child was alive, for
    /// example while waiting out a restart delay. Restarts are disabled
    /// either way.
    pub fn stop(&self) -> SupervisorResult<()> {
        self.shared.restart.store(false, Ordering::SeqCst);
        self.shared.stop.notify_one();
        if !self.is_running() {
            return Err(SupervisorError::NotRunning(self.shared.id.clone()));
        }
        Ok(())
    }

    /// Wait until the supervision task has finished. Returns immediately
    /// when called a second time.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.shared.restart.swap(false, Ordering::SeqCst) {
            self.shared.stop.notify_one();
        }
    }
}

async fn supervise(shared: Arc<Shared>, command: Spawn, mut child: Child, policy: RestartPolicy) {
    let id = shared.id.as_str();
    let mut backoff = Backoff::new(policy);

    loop {
        let started = Instant::now();
        tee_output(id, &mut child, &shared.output);

        let status = tokio::select! {
            status = child.wait() => status,
            () = shared.stop.notified() => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(id, error = %e, "can't kill process");
                }
                child.wait().await
            }
        };
        shared.running.store(false, Ordering::SeqCst);

        match status {
            Ok(status) if status.success() => tracing::info!(id, "process exited"),
            Ok(status) => tracing::warn!(id, %status, "process terminated"),
            Err(e) => tracing::warn!(id, error = %e, "failed to wait for process"),
        }
        if !shared.restart.load(Ordering::SeqCst) {
            break;
        }

        let delay = backoff.delay(started.elapsed());
        if !delay.is_zero() {
            tracing::debug!(id, delay_ms = delay.as_millis() as u64, "delaying restart");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shared.stop.notified() => {}
            }
            if !shared.restart.load(Ordering::SeqCst) {
                break;
            }
        }

        tracing::info!(id, "restarting process");
        match command.spawn(id) {
            Ok(next) => {
                child = next;
                shared.restarts.fetch_add(1, Ordering::SeqCst);
                shared.running.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::error!(id, error = %e, "can't restart process");
                break;
            }
        }
    }
    tracing::debug!(id, "supervision ended");
}

/// Echo the child's output streams line by line until they close.
fn tee_output(id: &str, child: &mut Child, output: &OutputSinks) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(id.to_string(), stdout, Arc::clone(&output.stdout)));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(id.to_string(), stderr, Arc::clone(&output.stderr)));
    }
}

async fn forward_lines<R>(id: String, stream: R, sink: LineSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink(&prefixed(&id, &line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // ── Backoff ──

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = RestartPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            stable_after: Duration::from_secs(10),
        };
        let mut backoff = Backoff::new(policy);
        let short = Duration::from_millis(5);
        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.delay(short).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn backoff_resets_after_stable_uptime() {
        let mut backoff = Backoff::new(RestartPolicy::default());
        let short = Duration::from_millis(5);
        backoff.delay(short);
        backoff.delay(short);
        assert_eq!(backoff.delay(short), Duration::from_secs(1));
        assert_eq!(
            backoff.delay(Duration::from_secs(10)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn immediate_policy_never_waits() {
        let mut backoff = Backoff::new(RestartPolicy::immediate());
        for _ in 0..3 {
            assert!(backoff.delay(Duration::ZERO).is_zero());
        }
    }

    #[test]
    fn lines_prefixed_with_id() {
        assert_eq!(prefixed("vcan-dev", "connected"), "vcan-dev: connected");
        assert_eq!(prefixed("vcan-dev", ""), "vcan-dev: ");
    }

    // ── Processes ──

    fn collector() -> (LineSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let sink: LineSink = Arc::new(move |line: &str| {
            sink_lines.lock().unwrap().push(line.to_string());
        });
        (sink, lines)
    }

    #[tokio::test]
    async fn output_teed_to_matching_sink() {
        let (stdout, out_lines) = collector();
        let (stderr, err_lines) = collector();
        let mut sup = Supervisor::start_with_output(
            "vcan-dev",
            "sh",
            &sh("echo out; echo err >&2; sleep 30"),
            RestartPolicy::immediate(),
            OutputSinks { stdout, stderr },
        )
        .unwrap();
        eventually("both lines", || {
            !out_lines.lock().unwrap().is_empty() && !err_lines.lock().unwrap().is_empty()
        })
        .await;

        sup.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), sup.join())
            .await
            .expect("child not killed");
        assert_eq!(*out_lines.lock().unwrap(), vec!["vcan-dev: out".to_string()]);
        assert_eq!(*err_lines.lock().unwrap(), vec!["vcan-dev: err".to_string()]);
    }

    #[tokio::test]
    async fn spawn_failure_reported() {
        let result = Supervisor::start(
            "missing",
            "/nonexistent/vb-gateway",
            &[],
            RestartPolicy::immediate(),
        );
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
    }

    #[tokio::test]
    async fn stop_kills_running_child() {
        let mut sup = Supervisor::start("sleeper", "sh", &sh("sleep 30"), RestartPolicy::immediate())
            .unwrap();
        assert!(sup.is_running());
        assert_eq!(sup.id(), "sleeper");

        sup.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), sup.join())
            .await
            .expect("child not killed");
        assert!(!sup.is_running());
        assert_eq!(sup.restart_count(), 0);
        assert!(matches!(sup.stop(), Err(SupervisorError::NotRunning(_))));
    }

    #[tokio::test]
    async fn exited_child_restarted() {
        let mut sup = Supervisor::start(
            "flaky",
            "sh",
            &sh("echo hello; sleep 0.05"),
            RestartPolicy::immediate(),
        )
        .unwrap();
        eventually("two restarts", || sup.restart_count() >= 2).await;

        let _ = sup.stop();
        tokio::time::timeout(Duration::from_secs(5), sup.join())
            .await
            .expect("supervision did not end");
        let count = sup.restart_count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sup.restart_count(), count);
    }

    #[tokio::test]
    async fn stop_during_backoff_cancels_restart() {
        let policy = RestartPolicy {
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
            stable_after: Duration::from_secs(60),
        };
        let mut sup = Supervisor::start("quick", "true", &[], policy).unwrap();
        eventually("child exit", || !sup.is_running()).await;

        assert!(matches!(sup.stop(), Err(SupervisorError::NotRunning(_))));
        tokio::time::timeout(Duration::from_secs(5), sup.join())
            .await
            .expect("backoff not cancelled");
        assert_eq!(sup.restart_count(), 0);
    }
}
