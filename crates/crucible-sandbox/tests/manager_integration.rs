//! Integration tests: compiled programs through the execution manager.

#[cfg(target_os = "linux")]
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crucible_core::{ExecutionConfig, FailureReason, LimitedResource, ResourceLimits, SessionState, SourceUnit};
use crucible_pipeline::{Artifact, Pipeline, Program};
use crucible_sandbox::{
    EventKind, ExecError, ExecutionManager, IsolatedRunner, ProcessRunner, RunnerError, RunnerHandle, VmRunner,
};
use futures::StreamExt;

fn compile(text: &str) -> Arc<Program> {
    let run = Pipeline::new().run(&SourceUnit::new("run.c", text));
    match run.artifact().and_then(Artifact::as_executable) {
        Some(program) => Arc::clone(program),
        None => panic!("compile failed: {:?}", run.diagnostics().collect::<Vec<_>>()),
    }
}

fn manager() -> ExecutionManager {
    ExecutionManager::with_vm(ExecutionConfig {
        sample_interval_ms: 50,
        stop_grace_ms: 200,
        ..ExecutionConfig::default()
    })
}

const SPIN: &str = "int main() { while (1) { } return 0; }";

fn stdout_lines(events: &[crucible_sandbox::ExecEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Stdout { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Test: an infinite loop hits the wall clock and ends TimedOut promptly
#[tokio::test]
async fn test_wall_clock_timeout() {
    let manager = manager();
    let limits = ResourceLimits::new(60_000, 1 << 20, 1_000);
    let begun = Instant::now();
    let handle = manager.start(compile(SPIN), Some(limits)).await.unwrap();
    let session = handle.wait().await;
    let took = begun.elapsed();

    assert_eq!(session.state, SessionState::TimedOut);
    assert_eq!(session.exit_code, None);
    assert!(session.usage.elapsed_ms >= 1_000);
    assert!(took >= Duration::from_millis(1_000));
    assert!(took < Duration::from_millis(1_200), "timed out late: {took:?}");
    assert!(manager.running().is_empty());
}

/// Test: normal completion records output, exit code and state events in order
#[tokio::test]
async fn test_completed_session_events() {
    let manager = manager();
    let program = compile("#include <stdio.h>\nint main() { printf(\"hello %d\\n\", 42); puts(\"bye\"); return 0; }");
    let handle = manager.start(program, None).await.unwrap();
    let session = handle.wait().await;
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.exit_code, Some(0));
    assert!(session.finished_at.is_some());

    let events = handle.events();
    assert_eq!(stdout_lines(&events), vec!["hello 42", "bye"]);
    let states: Vec<_> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::StateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![SessionState::Running, SessionState::Completed]);
    assert!(events.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
}

/// Test: a subscriber attaching after the session ended still sees everything
#[tokio::test]
async fn test_late_subscriber_replays() {
    let manager = manager();
    let program = compile("#include <stdio.h>\nint main() { int i; for (i = 0; i < 3; i++) printf(\"%d\\n\", i); return 0; }");
    let handle = manager.start(program, None).await.unwrap();
    handle.wait().await;

    let replayed: Vec<_> = manager.subscribe(handle.id()).unwrap().collect().await;
    assert_eq!(replayed.first().map(|e| e.seq), Some(0));
    assert_eq!(stdout_lines(&replayed), vec!["0", "1", "2"]);
    assert_eq!(replayed, handle.events());
}

/// Test: stopping twice is idempotent and keeps the natural outcome
#[tokio::test]
async fn test_stop_after_completion_is_noop() {
    let manager = manager();
    let handle = manager.start(compile("int main() { return 0; }"), None).await.unwrap();
    handle.wait().await;
    let first = manager.stop(handle.id()).await.unwrap();
    let second = manager.stop(handle.id()).await.unwrap();
    assert_eq!(first.state, SessionState::Completed);
    assert_eq!(first, second);
}

/// Test: stop cancels a running session and frees the artifact slot
#[tokio::test]
async fn test_stop_cancels_running_session() {
    let manager = manager();
    let program = compile(SPIN);
    let limits = ResourceLimits::new(60_000, 1 << 20, 60_000);
    let handle = manager.start(Arc::clone(&program), Some(limits)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let session = manager.stop(handle.id()).await.unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    assert!(manager.running().is_empty());

    let again = manager.start(program, Some(limits)).await.unwrap();
    manager.stop(again.id()).await.unwrap();
}

/// Test: a second start of the same artifact conflicts while the first runs
#[tokio::test]
async fn test_same_artifact_conflicts() {
    let manager = manager();
    let program = compile(SPIN);
    let limits = ResourceLimits::new(60_000, 1 << 20, 60_000);
    let first = manager.start(Arc::clone(&program), Some(limits)).await.unwrap();

    match manager.start(Arc::clone(&program), Some(limits)).await {
        Err(ExecError::SessionConflict { artifact, session }) => {
            assert_eq!(artifact, program.digest);
            assert_eq!(session, first.id());
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    manager.stop(first.id()).await.unwrap();
}

/// Test: capacity bounds concurrent sessions across artifacts
#[tokio::test]
async fn test_capacity_exceeded() {
    let manager = ExecutionManager::with_vm(ExecutionConfig {
        max_sessions: 1,
        ..ExecutionConfig::default()
    });
    let limits = ResourceLimits::new(60_000, 1 << 20, 60_000);
    let first = manager.start(compile(SPIN), Some(limits)).await.unwrap();
    let other = compile("int main() { int x = 1; while (x) { } return 0; }");
    let err = manager.start(other, Some(limits)).await.unwrap_err();
    assert!(matches!(err, ExecError::CapacityExceeded { limit: 1 }));
    manager.stop(first.id()).await.unwrap();
}

/// Test: runaway allocation fails with the memory limit
#[tokio::test]
async fn test_memory_limit_fails_session() {
    let manager = manager();
    let program = compile("#include <stdlib.h>\nint main() { while (1) { malloc(1024); } return 0; }");
    let limits = ResourceLimits::new(10_000, 256 * 1024, 10_000);
    let session = manager.start(program, Some(limits)).await.unwrap().wait().await;
    assert_eq!(session.state, SessionState::Failed);
    assert_eq!(
        session.failure,
        Some(FailureReason::ResourceLimitExceeded {
            resource: LimitedResource::Memory
        })
    );
    assert!(session.usage.peak_memory_bytes <= 256 * 1024);
}

/// Test: a CPU budget below the wall clock fails the session on CPU
#[tokio::test]
async fn test_cpu_limit_fails_session() {
    let manager = manager();
    let limits = ResourceLimits::new(100, 1 << 20, 10_000);
    let session = manager.start(compile(SPIN), Some(limits)).await.unwrap().wait().await;
    assert_eq!(session.state, SessionState::Failed);
    assert_eq!(
        session.failure,
        Some(FailureReason::ResourceLimitExceeded {
            resource: LimitedResource::Cpu
        })
    );
}

/// Test: non-zero exits and traps report the exit code
#[tokio::test]
async fn test_nonzero_exit_and_trap() {
    let manager = manager();
    let session = manager
        .start(compile("int main() { return 3; }"), None)
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(session.failure, Some(FailureReason::NonZeroExit { code: 3 }));
    assert_eq!(session.exit_code, Some(3));

    let session = manager
        .start(compile("int main() { int z = 0; return 1 / z; }"), None)
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(session.exit_code, Some(136));
}

/// Test: programs without main are rejected before a session exists
#[tokio::test]
async fn test_missing_entry_point() {
    let manager = manager();
    let program = compile("int helper(int x) { return x; }");
    let err = manager.start(program, None).await.unwrap_err();
    assert!(matches!(err, ExecError::NoEntryPoint));
    assert!(manager.sessions().is_empty());
}

/// Test: a process runner streams output and reports its exit code
#[cfg(unix)]
#[tokio::test]
async fn test_process_runner_session() {
    let runner = ProcessRunner::new(vec![
        "sh".into(),
        "-c".into(),
        "test -s {image} && echo ran; exit 5".into(),
    ])
    .unwrap();
    let manager = ExecutionManager::new(Arc::new(runner), ExecutionConfig::default());
    let handle = manager.start(compile("int main() { return 0; }"), None).await.unwrap();
    let session = handle.wait().await;
    assert_eq!(session.failure, Some(FailureReason::NonZeroExit { code: 5 }));
    assert_eq!(stdout_lines(&handle.events()), vec!["ran"]);
}

/// Test: statics larger than the memory limit fail the session without allocating them
#[tokio::test]
async fn test_oversized_statics_fail_on_memory() {
    let manager = manager();
    let program = compile("char big[1500000000];\nint main() { return 0; }");
    let limits = ResourceLimits::new(10_000, 1 << 20, 10_000);
    let session = manager.start(program, Some(limits)).await.unwrap().wait().await;
    assert_eq!(session.state, SessionState::Failed);
    assert_eq!(
        session.failure,
        Some(FailureReason::ResourceLimitExceeded {
            resource: LimitedResource::Memory
        })
    );
    assert!(session.usage.peak_memory_bytes <= 1 << 20);
}

/// Runner whose first launch never finishes.
struct StallFirstLaunch {
    stalled: AtomicBool,
    vm: VmRunner,
}

#[async_trait]
impl IsolatedRunner for StallFirstLaunch {
    async fn launch(
        &self,
        program: Arc<Program>,
        limits: ResourceLimits,
    ) -> Result<Box<dyn RunnerHandle>, RunnerError> {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        self.vm.launch(program, limits).await
    }
}

/// Test: dropping start mid-launch frees the slot and fails the pending session
#[tokio::test]
async fn test_cancelled_start_releases_slot() {
    let runner = StallFirstLaunch {
        stalled: AtomicBool::new(false),
        vm: VmRunner::new(),
    };
    let manager = ExecutionManager::new(Arc::new(runner), ExecutionConfig::default());
    let program = compile("int main() { return 0; }");

    let cancelled = tokio::time::timeout(Duration::from_millis(50), manager.start(Arc::clone(&program), None)).await;
    assert!(cancelled.is_err());
    assert!(manager.running().is_empty());
    let sessions = manager.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::Failed);
    assert!(matches!(sessions[0].failure, Some(FailureReason::RunnerFault { .. })));

    tokio::time::timeout(Duration::from_secs(1), manager.stop_all())
        .await
        .expect("stop_all hung on a cancelled start");
    let session = manager.start(program, None).await.unwrap().wait().await;
    assert_eq!(session.state, SessionState::Completed);
}

#[cfg(target_os = "linux")]
fn forking_runner(dir: &Path) -> ProcessRunner {
    let script = format!("sleep 37 & echo $! > {}/pid; wait # {{image}}", dir.display());
    ProcessRunner::new(vec!["sh".into(), "-c".into(), script]).unwrap()
}

#[cfg(target_os = "linux")]
async fn background_pid(dir: &Path) -> u32 {
    let file = dir.join("pid");
    for _ in 0..100 {
        if let Some(pid) = std::fs::read_to_string(&file).ok().and_then(|s| s.trim().parse().ok()) {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("background pid never written");
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
            Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    false
}

/// Test: a process session that times out takes its forked children with it
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_process_runner_timeout_kills_children() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ExecutionManager::new(
        Arc::new(forking_runner(dir.path())),
        ExecutionConfig {
            sample_interval_ms: 50,
            stop_grace_ms: 200,
            ..ExecutionConfig::default()
        },
    );
    let limits = ResourceLimits::new(60_000, 1 << 30, 500);
    let handle = manager.start(compile("int main() { return 0; }"), Some(limits)).await.unwrap();
    let sleeper = background_pid(dir.path()).await;

    let session = handle.wait().await;
    assert_eq!(session.state, SessionState::TimedOut);
    assert!(manager.running().is_empty());
    assert!(gone(sleeper).await, "forked child {sleeper} survived the timeout");
}

/// Test: stopping a process session takes its forked children with it
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_process_runner_stop_kills_children() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ExecutionManager::new(
        Arc::new(forking_runner(dir.path())),
        ExecutionConfig {
            sample_interval_ms: 50,
            stop_grace_ms: 200,
            ..ExecutionConfig::default()
        },
    );
    let limits = ResourceLimits::new(60_000, 1 << 30, 60_000);
    let handle = manager.start(compile("int main() { return 0; }"), Some(limits)).await.unwrap();
    let sleeper = background_pid(dir.path()).await;

    let session = manager.stop(handle.id()).await.unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    assert!(gone(sleeper).await, "forked child {sleeper} survived stop");
}
