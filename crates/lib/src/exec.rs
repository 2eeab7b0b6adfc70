//! External process execution.
//!
//! Every external tool the build drives (`git`, `hg`, `patch`, `make`, the
//! configure script, the `-V` probe) goes through here.
//! Commands always receive their working directory explicitly; the process-wide
//! current directory is never changed.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors raised while running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The program could not be found on `PATH` (or at the given path).
  #[error("command not found: {program}")]
  NotFound { program: String },

  /// The program ran and exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}{}", log_hint(.log))]
  Failed {
    cmd: String,
    code: Option<i32>,
    log: Option<PathBuf>,
  },

  /// Spawning or collecting output failed.
  #[error("failed to run {cmd}: {source}")]
  Io {
    cmd: String,
    #[source]
    source: std::io::Error,
  },
}

fn log_hint(log: &Option<PathBuf>) -> String {
  match log {
    Some(path) => format!(" (see {})", path.display()),
    None => String::new(),
  }
}

/// Where the output of a command goes.
#[derive(Debug, Clone, Copy)]
pub enum Output<'a> {
  /// Stream straight to the terminal (verbose mode).
  Inherit,
  /// Capture, and on failure write stdout and stderr to this file.
  LogOnFailure(&'a Path),
}

impl<'a> Output<'a> {
  /// Inherit when verbose, otherwise log to `log` on failure.
  pub fn for_verbosity(verbose: bool, log: &'a Path) -> Self {
    if verbose { Output::Inherit } else { Output::LogOnFailure(log) }
  }
}

/// Run `program args...` inside `cwd`.
pub async fn run_command(program: &str, args: &[&str], cwd: &Path, output: Output<'_>) -> Result<(), ExecError> {
  let cmd_line = display_command(program, args);
  debug!(cmd = %cmd_line, cwd = %cwd.display(), "spawning process");

  let mut command = Command::new(program);
  command
    .args(args)
    .current_dir(cwd)
    .stdin(Stdio::null())
    .kill_on_drop(true);

  match output {
    Output::Inherit => {
      let status = command.status().await.map_err(|e| spawn_error(program, &cmd_line, e))?;
      if !status.success() {
        return Err(ExecError::Failed {
          cmd: cmd_line,
          code: status.code(),
          log: None,
        });
      }
    }
    Output::LogOnFailure(log) => {
      let out = command.output().await.map_err(|e| spawn_error(program, &cmd_line, e))?;
      if !out.status.success() {
        let mut contents = out.stdout;
        contents.extend_from_slice(&out.stderr);
        let log = cwd.join(log);
        tokio::fs::write(&log, contents).await.map_err(|e| ExecError::Io {
          cmd: cmd_line.clone(),
          source: e,
        })?;
        return Err(ExecError::Failed {
          cmd: cmd_line,
          code: out.status.code(),
          log: Some(log),
        });
      }
    }
  }

  Ok(())
}

/// Run a shell snippet with `/bin/sh -c` inside `cwd`.
pub async fn run_shell(script: &str, cwd: &Path, output: Output<'_>) -> Result<(), ExecError> {
  let (shell, args) = get_shell();
  let mut full_args: Vec<&str> = args.to_vec();
  full_args.push(script);
  run_command(shell, &full_args, cwd, output).await
}

/// Run a command and return stdout followed by stderr as one string.
///
/// Used by probes that only care about what a tool prints, so the exit status
/// still matters: a non-zero exit is an error.
pub async fn capture_combined(program: &str, args: &[&str]) -> Result<String, ExecError> {
  let cmd_line = display_command(program, args);
  let out = Command::new(program)
    .args(args)
    .stdin(Stdio::null())
    .kill_on_drop(true)
    .output()
    .await
    .map_err(|e| spawn_error(program, &cmd_line, e))?;

  if !out.status.success() {
    return Err(ExecError::Failed {
      cmd: cmd_line,
      code: out.status.code(),
      log: None,
    });
  }

  let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
  combined.push_str(&String::from_utf8_lossy(&out.stderr));
  Ok(combined)
}

fn spawn_error(program: &str, cmd_line: &str, e: std::io::Error) -> ExecError {
  if e.kind() == std::io::ErrorKind::NotFound {
    ExecError::NotFound {
      program: program.to_string(),
    }
  } else {
    ExecError::Io {
      cmd: cmd_line.to_string(),
      source: e,
    }
  }
}

fn display_command(program: &str, args: &[&str]) -> String {
  let mut line = program.to_string();
  for arg in args {
    line.push(' ');
    line.push_str(arg);
  }
  line
}

/// Shell used for provisioning hooks, patching, and the configure script.
///
/// Always `/bin/sh`, never `$SHELL`: interactive shells may source profiles
/// that change the environment underneath the build.
fn get_shell() -> (&'static str, [&'static str; 1]) {
  ("/bin/sh", ["-c"])
}
