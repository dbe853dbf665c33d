//! Spawning platform tools.
//!
//! Read probes and mutations go through different entry points so the
//! log can tell them apart: probes never appear in the emitted script.

use gatepass_bundle::Command as ToolCommand;
use gatepass_common::{Error, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

/// Captured output of a completed invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a read-only probe; nonzero exit is an error.
pub fn run_read(program: &str, args: &[&str]) -> Result<String> {
    debug!(command = %format!("{program} {}", args.join(" ")), "probe");
    let output = spawn(program, args, None)?;
    if !output.success() {
        warn!(
            command = %format!("{program} {}", args.join(" ")),
            exit_code = ?output.exit_code,
            stderr = %output.stderr,
            "nonzero exit from probe"
        );
        return Err(Error::ToolInvocation {
            program: program.to_string(),
            status: status_string(output.exit_code),
            stderr: output.stderr,
        });
    }
    Ok(output.stdout)
}

/// Run a read-only probe whose exit code carries the answer
/// (`codesign --verify` style); nonzero exit is not an error.
pub fn run_probe(program: &str, args: &[&str]) -> Result<ToolOutput> {
    debug!(command = %format!("{program} {}", args.join(" ")), "probe");
    spawn(program, args, None)
}

/// Run a mutating command described by a [`ToolCommand`] value.
pub fn run_command(cmd: &ToolCommand) -> Result<()> {
    info!(command = %cmd.rendered(), "exec");
    let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
    let output = spawn(&cmd.program, &args, cmd.cwd.clone())?;
    if !output.success() {
        warn!(
            command = %cmd.rendered(),
            exit_code = ?output.exit_code,
            stderr = %output.stderr,
            "nonzero exit from command"
        );
        return Err(Error::ToolInvocation {
            program: cmd.program.clone(),
            status: status_string(output.exit_code),
            stderr: output.stderr,
        });
    }
    Ok(())
}

/// Fail fast when a required platform tool is absent.
pub fn ensure_tools(programs: &[&str]) -> Result<()> {
    for program in programs {
        which::which(program).map_err(|_| Error::ToolNotFound(program.to_string()))?;
    }
    Ok(())
}

fn spawn(program: &str, args: &[&str], cwd: Option<PathBuf>) -> Result<ToolOutput> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let output = command.output().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ToolNotFound(program.to_string()),
        _ => Error::Io(e),
    })?;
    Ok(ToolOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn status_string(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_read_captures_stdout() {
        let out = run_read("echo", &["hello"]).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_read_nonzero_exit_is_error() {
        let err = run_read("false", &[]).unwrap_err();
        assert!(matches!(err, Error::ToolInvocation { .. }));
    }

    #[test]
    fn test_run_probe_nonzero_exit_is_not_error() {
        let out = run_probe("false", &[]).unwrap();
        assert!(!out.success());
    }

    #[test]
    fn test_missing_program_reported() {
        let err = run_read("gatepass-no-such-tool", &[]).unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }

    #[test]
    fn test_run_command_honors_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = gatepass_bundle::Command::new(
            "touch",
            vec!["marker".to_string()],
        )
        .with_cwd(dir.path());
        run_command(&cmd).unwrap();
        assert!(dir.path().join("marker").exists());
    }
}
