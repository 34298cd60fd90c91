use anyhow::Result;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Failures a user can hit without a container engine: each one must exit
/// non-zero with a single `error:` line and, where there is an obvious fix,
/// a `hint:` line.

fn ralph(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_ralph"))
        .args(args)
        .current_dir(dir)
        .env("RALPH_DOCKER", "ralph-test-no-such-engine")
        .env_remove("RUST_LOG")
        .output()?)
}

fn init_project(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir.join(".ralph"))?;
    fs::write(dir.join(".ralph/config.yml"), "mode: prompt\nagent: claude\n")?;
    Ok(())
}

#[test]
fn test_start_outside_project_fails_with_hint() -> Result<()> {
    let temp = TempDir::new()?;
    let output = ralph(temp.path(), &["start", "42"])?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: no Ralph project found"), "{stderr}");
    assert!(stderr.contains("hint: run `ralph init`"), "{stderr}");
    Ok(())
}

#[test]
fn test_bare_number_outside_github_mode() -> Result<()> {
    let temp = TempDir::new()?;
    init_project(temp.path())?;
    let output = ralph(temp.path(), &["start", "42"])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bare issue numbers only work in github mode"), "{stderr}");
    assert!(stderr.contains("hint: use `ralph start --issue N`"), "{stderr}");
    Ok(())
}

#[test]
fn test_selector_missing_value() -> Result<()> {
    let temp = TempDir::new()?;
    init_project(temp.path())?;
    let output = ralph(temp.path(), &["start", "--prompt"])?;

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--prompt"), "{stderr}");
    Ok(())
}

#[test]
fn test_global_flag_after_task_is_not_a_task_token() -> Result<()> {
    let temp = TempDir::new()?;
    init_project(temp.path())?;
    let output = ralph(temp.path(), &["start", "42", "-v"])?;

    // Fails on the bare number (prompt mode), not on `-v`.
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bare issue numbers only work in github mode"), "{stderr}");
    assert!(!stderr.contains("unexpected argument"), "{stderr}");
    assert!(stderr.contains("Using project"), "{stderr}");
    Ok(())
}

#[test]
fn test_worker_command_without_task() -> Result<()> {
    let temp = TempDir::new()?;
    let output = ralph(temp.path(), &["status"])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: no task given"), "{stderr}");
    Ok(())
}

#[test]
fn test_missing_engine_is_reported() -> Result<()> {
    let temp = TempDir::new()?;
    init_project(temp.path())?;
    let output = ralph(temp.path(), &["list"])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("container engine unavailable"), "{stderr}");
    assert!(stderr.contains("hint: is the Docker daemon running?"), "{stderr}");
    assert!(output.stdout.is_empty());
    Ok(())
}

#[test]
fn test_project_flag_points_elsewhere() -> Result<()> {
    let temp = TempDir::new()?;
    let project = temp.path().join("demo");
    init_project(&project)?;
    let elsewhere = temp.path().join("elsewhere");
    fs::create_dir_all(&elsewhere)?;

    // -C finds the project, so the failure is the missing engine, not discovery.
    let output = ralph(&elsewhere, &["-C", "../demo", "clean"])?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("no Ralph project found"), "{stderr}");
    assert!(stderr.contains("container engine unavailable"), "{stderr}");
    Ok(())
}

#[test]
fn test_help_lists_commands() -> Result<()> {
    let temp = TempDir::new()?;
    let output = ralph(temp.path(), &["--help"])?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in [
        "start", "restart", "stop", "list", "status", "logs", "attach", "shell", "watch", "clean",
        "build",
    ] {
        assert!(stdout.contains(command), "missing {command}");
    }
    Ok(())
}
