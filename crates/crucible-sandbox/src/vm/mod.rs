//! In-process runner backed by the bytecode interpreter.
//!
//! Each launch gets a dedicated blocking thread. Isolation comes from the
//! interpreter itself: programs can only touch their own address space and
//! reach the outside world through the library builtins.

pub mod machine;

use std::sync::Arc;

use async_trait::async_trait;
use crucible_core::ResourceLimits;
use crucible_pipeline::Program;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::RunnerError;
use crate::runner::{ExitStatus, IsolatedRunner, RunnerExit, RunnerHandle, RunnerOutput, RunnerSample};

pub use machine::{run_program, Control, Machine, OutputSink};

/// Runs programs on the bytecode interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmRunner;

impl VmRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IsolatedRunner for VmRunner {
    async fn launch(
        &self,
        program: Arc<Program>,
        limits: ResourceLimits,
    ) -> std::result::Result<Box<dyn RunnerHandle>, RunnerError> {
        let control = Arc::new(Control::default());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let thread_control = Arc::clone(&control);
        tokio::task::spawn_blocking(move || {
            let mut sink = LineSink::new(out_tx);
            let status = Machine::new(&program, limits, Arc::clone(&thread_control)).run(&mut sink);
            debug!(artifact = %program.digest, ?status, "interpreter finished");
            // Output closes before the exit is visible.
            sink.finish();
            let _ = exit_tx.send(Some(RunnerExit {
                status,
                sample: thread_control.sample(),
            }));
        });

        Ok(Box::new(VmHandle {
            control,
            output: Some(out_rx),
            exit: exit_rx,
        }))
    }
}

struct VmHandle {
    control: Arc<Control>,
    output: Option<mpsc::UnboundedReceiver<RunnerOutput>>,
    exit: watch::Receiver<Option<RunnerExit>>,
}

#[async_trait]
impl RunnerHandle for VmHandle {
    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<RunnerOutput>> {
        self.output.take()
    }

    fn sample(&self) -> RunnerSample {
        self.control.sample()
    }

    async fn terminate(&self) {
        self.control.request_stop();
    }

    async fn kill(&self) {
        self.control.request_stop();
    }

    async fn wait(&self) -> RunnerExit {
        let mut exit = self.exit.clone();
        let finished = exit.wait_for(Option::is_some).await.map(|seen| seen.clone());
        match finished {
            Ok(Some(result)) => result,
            _ => RunnerExit {
                status: ExitStatus::Fault {
                    message: "interpreter thread ended without a status".into(),
                },
                sample: self.control.sample(),
            },
        }
    }
}

/// Line-buffered output forwarding. Each complete line becomes one
/// [`RunnerOutput`] without its trailing newline.
struct LineSink {
    tx: mpsc::UnboundedSender<RunnerOutput>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LineSink {
    fn new(tx: mpsc::UnboundedSender<RunnerOutput>) -> Self {
        Self {
            tx,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn forward(tx: &mpsc::UnboundedSender<RunnerOutput>, buffer: &mut Vec<u8>, stderr: bool, flush: bool) {
        while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=end).collect();
            Self::send(tx, &line[..end], stderr);
        }
        if flush && !buffer.is_empty() {
            let rest = std::mem::take(buffer);
            Self::send(tx, &rest, stderr);
        }
    }

    fn send(tx: &mpsc::UnboundedSender<RunnerOutput>, bytes: &[u8], stderr: bool) {
        let text = String::from_utf8_lossy(bytes).into_owned();
        let item = if stderr {
            RunnerOutput::Stderr(text)
        } else {
            RunnerOutput::Stdout(text)
        };
        // The receiver may already be gone; output is then discarded.
        let _ = tx.send(item);
    }

    fn finish(mut self) {
        Self::forward(&self.tx, &mut self.stdout, false, true);
        Self::forward(&self.tx, &mut self.stderr, true, true);
    }
}

impl OutputSink for LineSink {
    fn stdout(&mut self, bytes: &[u8]) {
        self.stdout.extend_from_slice(bytes);
        Self::forward(&self.tx, &mut self.stdout, false, false);
    }

    fn stderr(&mut self, bytes: &[u8]) {
        self.stderr.extend_from_slice(bytes);
        Self::forward(&self.tx, &mut self.stderr, true, false);
    }
}
