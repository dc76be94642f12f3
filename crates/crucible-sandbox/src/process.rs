//! Runner that hands the program image to an external command.
//!
//! The command is a template; `{image}` expands to the path of a temporary
//! image file, `{memory_bytes}` and `{cpu_millis}` to the session limits.
//! Isolation and in-process limit enforcement are the command's business
//! (for example a container or `crucible exec-image` under `systemd-run`).
//! The manager still enforces limits from the samples read out of `/proc`.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crucible_core::ResourceLimits;
use crucible_pipeline::Program;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::runner::{ExitStatus, IsolatedRunner, RunnerExit, RunnerHandle, RunnerOutput, RunnerSample};

pub const IMAGE_PLACEHOLDER: &str = "{image}";

/// Kernel clock ticks per second for `/proc/<pid>/stat` CPU fields.
const CLOCK_TICKS: u64 = 100;

/// Launches each program as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: Vec<String>,
}

impl ProcessRunner {
    pub fn new(command: Vec<String>) -> std::result::Result<Self, RunnerError> {
        match command.first() {
            None => return Err(RunnerError::InvalidCommand("empty command".into())),
            Some(exe) if exe.trim().is_empty() => {
                return Err(RunnerError::InvalidCommand("empty executable".into()));
            }
            Some(_) => {}
        }
        if !command.iter().any(|arg| arg.contains(IMAGE_PLACEHOLDER)) {
            return Err(RunnerError::InvalidCommand(format!(
                "command must reference {IMAGE_PLACEHOLDER}"
            )));
        }
        Ok(Self { command })
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn expand(&self, image: &Path, limits: &ResourceLimits) -> Vec<String> {
        let image = image.display().to_string();
        self.command
            .iter()
            .map(|arg| {
                arg.replace(IMAGE_PLACEHOLDER, &image)
                    .replace("{memory_bytes}", &limits.memory_bytes.to_string())
                    .replace("{cpu_millis}", &limits.cpu_millis.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl IsolatedRunner for ProcessRunner {
    async fn launch(
        &self,
        program: Arc<Program>,
        limits: ResourceLimits,
    ) -> std::result::Result<Box<dyn RunnerHandle>, RunnerError> {
        let image = program.to_image()?;
        let mut file = tempfile::Builder::new()
            .prefix("crucible-")
            .suffix(".image.json")
            .tempfile()?;
        file.write_all(image.as_bytes())?;
        file.flush()?;
        let image_path = file.into_temp_path();

        let argv = self.expand(&image_path, &limits);
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The child leads its own group so signals reach everything it forks.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn()?;
        let pid = child.id();
        debug!(artifact = %program.digest, ?pid, command = ?argv, "runner process spawned");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, out_tx.clone(), RunnerOutput::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, out_tx, RunnerOutput::Stderr);
        }

        let sampler = Arc::new(ProcSampler::new(pid));
        let stop_requested = Arc::new(AtomicBool::new(false));
        let (kill_tx, mut kill_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = watch::channel(None);

        let waiter_sampler = Arc::clone(&sampler);
        let requested = Arc::clone(&stop_requested);
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => status,
                _ = async { let _ = kill_rx.wait_for(|kill| *kill).await; } => {
                    if let Some(pid) = pid {
                        signal_group(pid, "KILL").await;
                    }
                    if let Err(err) = child.start_kill() {
                        warn!(error = %err, "failed to kill runner process");
                    }
                    child.wait().await
                }
            };
            // Nothing the command forked may outlive it.
            if let Some(pid) = pid {
                signal_group(pid, "KILL").await;
            }
            let status = match waited {
                Ok(status) => exit_status(status, requested.load(Ordering::Acquire)),
                Err(err) => ExitStatus::Fault {
                    message: format!("failed to wait for runner process: {err}"),
                },
            };
            if let Err(err) = image_path.close() {
                warn!(error = %err, "failed to remove program image");
            }
            let _ = exit_tx.send(Some(RunnerExit {
                status,
                sample: waiter_sampler.last(),
            }));
        });

        Ok(Box::new(ProcessHandle {
            pid,
            sampler,
            stop_requested,
            output: Some(out_rx),
            kill: kill_tx,
            exit: exit_rx,
        }))
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<RunnerOutput>, wrap: fn(String) -> RunnerOutput)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    });
}

/// Send `signal` to the process group led by `pid`. `false` when nothing
/// in the group received it.
async fn signal_group(pid: u32, signal: &str) -> bool {
    let delivered = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match delivered {
        Ok(status) => status.success(),
        Err(err) => {
            warn!(pid, signal, error = %err, "failed to signal runner process group");
            false
        }
    }
}

fn exit_status(status: std::process::ExitStatus, stop_requested: bool) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Exited { code };
    }
    if stop_requested {
        return ExitStatus::Killed;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus::Exited { code: 128 + signal };
        }
    }
    ExitStatus::Fault {
        message: format!("runner process ended without an exit code ({status})"),
    }
}

struct ProcessHandle {
    pid: Option<u32>,
    sampler: Arc<ProcSampler>,
    stop_requested: Arc<AtomicBool>,
    output: Option<mpsc::UnboundedReceiver<RunnerOutput>>,
    kill: watch::Sender<bool>,
    exit: watch::Receiver<Option<RunnerExit>>,
}

impl ProcessHandle {
    fn exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

#[async_trait]
impl RunnerHandle for ProcessHandle {
    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<RunnerOutput>> {
        self.output.take()
    }

    fn sample(&self) -> RunnerSample {
        if self.exited() {
            self.sampler.last()
        } else {
            self.sampler.refresh()
        }
    }

    async fn terminate(&self) {
        self.stop_requested.store(true, Ordering::Release);
        let Some(pid) = self.pid.filter(|_| !self.exited()) else {
            return;
        };
        if !signal_group(pid, "TERM").await {
            debug!(pid, "terminate signal not delivered");
        }
    }

    async fn kill(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.kill.send_replace(true);
    }

    async fn wait(&self) -> RunnerExit {
        let mut exit = self.exit.clone();
        let finished = exit.wait_for(Option::is_some).await.map(|seen| seen.clone());
        match finished {
            Ok(Some(result)) => result,
            _ => RunnerExit {
                status: ExitStatus::Fault {
                    message: "runner waiter ended without a status".into(),
                },
                sample: self.sampler.last(),
            },
        }
    }
}

/// Resource readings from `/proc`, keeping the last good values.
#[derive(Debug)]
struct ProcSampler {
    pid: Option<u32>,
    cpu_millis: AtomicU64,
    memory_bytes: AtomicU64,
    peak_memory_bytes: AtomicU64,
}

impl ProcSampler {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            cpu_millis: AtomicU64::new(0),
            memory_bytes: AtomicU64::new(0),
            peak_memory_bytes: AtomicU64::new(0),
        }
    }

    fn refresh(&self) -> RunnerSample {
        if let Some(pid) = self.pid {
            if let Some(ticks) = std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| parse_cpu_ticks(&stat))
            {
                self.cpu_millis.store(ticks * 1000 / CLOCK_TICKS, Ordering::Relaxed);
            }
            if let Some(kb) = std::fs::read_to_string(format!("/proc/{pid}/status"))
                .ok()
                .and_then(|status| parse_rss_kb(&status))
            {
                let bytes = kb * 1024;
                self.memory_bytes.store(bytes, Ordering::Relaxed);
                self.peak_memory_bytes.fetch_max(bytes, Ordering::Relaxed);
            }
        }
        self.last()
    }

    fn last(&self) -> RunnerSample {
        RunnerSample {
            cpu_millis: self.cpu_millis.load(Ordering::Relaxed),
            memory_bytes: self.memory_bytes.load(Ordering::Relaxed),
            peak_memory_bytes: self.peak_memory_bytes.load(Ordering::Relaxed),
        }
    }
}

/// User plus system time from `/proc/<pid>/stat`, in clock ticks.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    // The command name may contain spaces; fields resume after its ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// `VmRSS` from `/proc/<pid>/status`, in kB.
fn parse_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_pipeline::CodeFunction;
    use crucible_pipeline::Op;

    fn tiny() -> Arc<Program> {
        let main = CodeFunction {
            name: "main".into(),
            params: 0,
            locals: 0,
            code: vec![Op::Const(0), Op::Ret],
        };
        Arc::new(Program::new(vec![main], vec![], vec![], Some(0)).unwrap())
    }

    fn shell(script: &str) -> ProcessRunner {
        ProcessRunner::new(vec!["sh".into(), "-c".into(), script.into()]).unwrap()
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<RunnerOutput>) -> Vec<RunnerOutput> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_command_validation() {
        assert!(ProcessRunner::new(vec![]).is_err());
        assert!(ProcessRunner::new(vec!["run".into()]).is_err());
        assert!(ProcessRunner::new(vec!["run".into(), "--image={image}".into()]).is_ok());
    }

    #[test]
    fn test_template_expansion() {
        let runner = ProcessRunner::new(vec![
            "run".into(),
            "{image}".into(),
            "--mem={memory_bytes}".into(),
            "--cpu={cpu_millis}".into(),
        ])
        .unwrap();
        let argv = runner.expand(Path::new("/tmp/p.json"), &ResourceLimits::new(10, 20, 30));
        assert_eq!(argv, vec!["run", "/tmp/p.json", "--mem=20", "--cpu=10"]);
    }

    #[test]
    fn test_parse_proc_fields() {
        let stat = "4242 (my prog) S 1 4242 4242 0 -1 4194304 100 0 0 0 25 5 0 0 20 0 1 0 100 1000 50";
        assert_eq!(parse_cpu_ticks(stat), Some(30));
        let status = "Name:\tsh\nVmPeak:\t  9000 kB\nVmRSS:\t  1234 kB\n";
        assert_eq!(parse_rss_kb(status), Some(1234));
        assert_eq!(parse_rss_kb("Name: x\n"), None);
    }

    #[tokio::test]
    async fn test_process_output_and_exit_code() {
        let runner = shell("test -s {image} && echo image-ok; echo warn >&2; exit 3");
        let mut handle = runner.launch(tiny(), ResourceLimits::default()).await.unwrap();
        let output = handle.events().unwrap();
        let exit = handle.wait().await;
        assert_eq!(exit.status, ExitStatus::Exited { code: 3 });
        let lines = drain(output).await;
        assert!(lines.contains(&RunnerOutput::Stdout("image-ok".into())));
        assert!(lines.contains(&RunnerOutput::Stderr("warn".into())));
    }

    #[tokio::test]
    async fn test_kill_reports_killed() {
        let runner = shell("sleep 30 # {image}");
        let handle = runner.launch(tiny(), ResourceLimits::default()).await.unwrap();
        handle.kill().await;
        let exit = handle.wait().await;
        assert_eq!(exit.status, ExitStatus::Killed);
    }

    /// Wait up to a second for `pid` to disappear or turn into a zombie.
    #[cfg(target_os = "linux")]
    async fn gone(pid: u32) -> bool {
        for _ in 0..50 {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Err(_) => return true,
                Ok(stat) if stat.rfind(')').and_then(|i| stat[i + 1..].split_whitespace().next()) == Some("Z") => {
                    return true;
                }
                Ok(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }
        false
    }

    #[cfg(target_os = "linux")]
    async fn background_pid(dir: &Path) -> u32 {
        let file = dir.join("pid");
        for _ in 0..100 {
            if let Some(pid) = std::fs::read_to_string(&file).ok().and_then(|s| s.trim().parse().ok()) {
                return pid;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("background pid never written");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_kill_reaches_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("sleep 37 & echo $! > {}/pid; wait # {{image}}", dir.path().display());
        let handle = shell(&script).launch(tiny(), ResourceLimits::default()).await.unwrap();
        let sleeper = background_pid(dir.path()).await;

        handle.kill().await;
        assert_eq!(handle.wait().await.status, ExitStatus::Killed);
        assert!(gone(sleeper).await, "forked child {sleeper} survived kill");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_terminate_reaches_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("sleep 37 & echo $! > {}/pid; wait # {{image}}", dir.path().display());
        let handle = shell(&script).launch(tiny(), ResourceLimits::default()).await.unwrap();
        let sleeper = background_pid(dir.path()).await;

        handle.terminate().await;
        assert_eq!(handle.wait().await.status, ExitStatus::Killed);
        assert!(gone(sleeper).await, "forked child {sleeper} survived terminate");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_exit_reaps_leftover_children() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("sleep 37 & echo $! > {}/pid; exit 0 # {{image}}", dir.path().display());
        let handle = shell(&script).launch(tiny(), ResourceLimits::default()).await.unwrap();
        let sleeper = background_pid(dir.path()).await;

        assert_eq!(handle.wait().await.status, ExitStatus::Exited { code: 0 });
        assert!(gone(sleeper).await, "forked child {sleeper} outlived its parent");
    }
}
