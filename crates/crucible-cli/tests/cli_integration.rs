//! Integration tests: the `crucible` binary end to end.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crucible_core::SourceUnit;
use crucible_pipeline::{Artifact, Pipeline};
use tempfile::TempDir;

fn crucible(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crucible"))
        .args(args)
        .env_remove("CRUCIBLE_CONFIG")
        .env_remove("CRUCIBLE_RUNNER_COMMAND")
        .env("RUST_LOG", "error")
        .output()
        .expect("failed to spawn crucible")
}

fn write_source(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Test: compile reports diagnostics with location and code and fails on errors
#[test]
fn test_compile_reports_diagnostics() {
    let dir = TempDir::new().unwrap();
    let file = write_source(&dir, "bad.c", "int main() {\n  return 0\n}\n");

    let output = crucible(&["compile", arg(&file)]);
    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.contains("[E0002]"), "missing parse error: {text}");
    assert!(text.contains("compilation failed at parse"), "{text}");
}

/// Test: --json compile output is a machine-readable report
#[test]
fn test_compile_json_report() {
    let dir = TempDir::new().unwrap();
    let file = write_source(&dir, "ok.c", "int main() { return 0; }\n");

    let output = crucible(&["--json", "compile", arg(&file)]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["succeeded"], true);
    assert_eq!(report["revision"], 1);
    assert!(report["failed_stage"].is_null());
    assert!(report["stages"].as_array().is_some_and(|s| !s.is_empty()));
}

/// Test: fix --write patches a missing include so the file compiles cleanly
#[test]
fn test_fix_write_repairs_file() {
    let dir = TempDir::new().unwrap();
    let file = write_source(&dir, "leak.c", "int main(){int*p=malloc(20);return 0;}");

    let output = crucible(&["fix", "--write", arg(&file)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let patched = std::fs::read_to_string(&file).unwrap();
    assert!(patched.contains("#include <stdlib.h>"), "{patched}");

    let output = crucible(&["compile", arg(&file)]);
    assert!(output.status.success());
    assert!(!stdout(&output).contains("W0201"));
}

/// Test: run streams program output and propagates a non-zero exit code
#[test]
fn test_run_streams_output_and_exit_code() {
    let dir = TempDir::new().unwrap();
    let file = write_source(
        &dir,
        "hello.c",
        "#include <stdio.h>\nint main() { printf(\"hi %d\\n\", 7); return 3; }\n",
    );

    let output = crucible(&["run", arg(&file)]);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout(&output), "hi 7\n");
}

/// Test: run enforces the wall-clock override
#[test]
fn test_run_wall_clock_override() {
    let dir = TempDir::new().unwrap();
    let file = write_source(&dir, "spin.c", "int main() { while (1) { } return 0; }\n");

    let output = crucible(&["run", "--wall-ms", "300", arg(&file)]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("timed_out"), "{stderr}");
}

/// Test: exec-image runs a serialized program on the interpreter
#[test]
fn test_exec_image() {
    let dir = TempDir::new().unwrap();
    let run = Pipeline::new().run(&SourceUnit::new(
        "img.c",
        "#include <stdio.h>\nint main() { puts(\"from image\"); return 4; }\n",
    ));
    let program = run.artifact().and_then(Artifact::as_executable).unwrap();
    let image = dir.path().join("prog.image.json");
    std::fs::write(&image, program.to_image().unwrap()).unwrap();

    let output = crucible(&["exec-image", arg(&image)]);
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(stdout(&output), "from image\n");
}

/// Test: the process runner can drive exec-image as an external sandbox
#[cfg(unix)]
#[test]
fn test_run_through_process_runner() {
    let dir = TempDir::new().unwrap();
    let file = write_source(&dir, "ext.c", "#include <stdio.h>\nint main() { puts(\"outside\"); return 0; }\n");
    let runner = format!("{} exec-image {{image}}", env!("CARGO_BIN_EXE_crucible"));

    let output = crucible(&["run", "--runner-command", &runner, arg(&file)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout(&output), "outside\n");
}
