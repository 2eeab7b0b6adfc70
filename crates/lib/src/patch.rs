//! Patch lifecycle around configure and build.
//!
//! A patch moves through `Unapplied -> Applied -> Reverted`. It is applied once
//! before configure and reverted exactly once afterwards, whether the guarded
//! work succeeded, failed, or was cut short by an interrupt.

use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::exec::{self, ExecError, Output};

const PATCH_LOG: &str = "nginx-patch.log";

#[derive(Debug, Error)]
pub enum PatchError {
  #[error("failed to apply patch '{}': {source}", .patch.display())]
  Apply {
    patch: PathBuf,
    #[source]
    source: ExecError,
  },

  #[error("failed to revert patch '{}': {source}", .patch.display())]
  Revert {
    patch: PathBuf,
    #[source]
    source: ExecError,
  },

  #[error("interrupted")]
  Interrupted,
}

/// Runs `patch` (or `patch -R`) for one patch file.
///
/// A relative `patch` path is taken from `root_dir`.
pub trait PatchExecutor {
  fn patch(
    &self,
    patch: &Path,
    option: &str,
    root_dir: &Path,
    reverse: bool,
  ) -> impl Future<Output = Result<(), ExecError>> + Send;
}

/// Patches the server sources with the system `patch` tool.
#[derive(Debug, Clone)]
pub struct ShellPatcher {
  /// Directory `patch` runs in.
  pub source_dir: PathBuf,
  pub verbose: bool,
}

impl ShellPatcher {
  pub fn new(source_dir: impl Into<PathBuf>, verbose: bool) -> Self {
    Self {
      source_dir: source_dir.into(),
      verbose,
    }
  }
}

impl PatchExecutor for ShellPatcher {
  async fn patch(&self, patch: &Path, option: &str, root_dir: &Path, reverse: bool) -> Result<(), ExecError> {
    let path = root_dir.join(patch);
    let script = patch_command(&path, option, reverse);
    exec::run_shell(
      &script,
      &self.source_dir,
      Output::for_verbosity(self.verbose, Path::new(PATCH_LOG)),
    )
    .await
  }
}

fn patch_command(path: &Path, option: &str, reverse: bool) -> String {
  let mut parts = vec!["patch"];
  if reverse {
    parts.push("-R");
  }
  if !option.trim().is_empty() {
    parts.push(option.trim());
  }
  format!("{} < {}", parts.join(" "), path.display())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
  Unapplied,
  Applied,
  Reverted,
}

/// One patch file and where it is in its lifecycle.
#[derive(Debug)]
pub struct PatchSession<E> {
  patch: Option<PathBuf>,
  option: String,
  root_dir: PathBuf,
  executor: E,
  state: PatchState,
}

impl<E: PatchExecutor> PatchSession<E> {
  pub fn new(patch: Option<PathBuf>, option: impl Into<String>, root_dir: impl Into<PathBuf>, executor: E) -> Self {
    Self {
      patch,
      option: option.into(),
      root_dir: root_dir.into(),
      executor,
      state: PatchState::Unapplied,
    }
  }

  /// Build a session from every `--patch` given; only the first one is used.
  pub fn from_paths(
    paths: &[PathBuf],
    option: impl Into<String>,
    root_dir: impl Into<PathBuf>,
    executor: E,
  ) -> Self {
    if paths.len() > 1 {
      warn!(
        patch = %paths[0].display(),
        ignored = paths.len() - 1,
        "multiple patches given, only the first one is applied"
      );
    }
    Self::new(paths.first().cloned(), option, root_dir, executor)
  }

  pub fn state(&self) -> PatchState {
    self.state
  }

  pub fn patch(&self) -> Option<&Path> {
    self.patch.as_deref()
  }

  /// Apply the patch. No-op without a patch file or when already applied.
  pub async fn apply(&mut self) -> Result<(), PatchError> {
    let Some(patch) = &self.patch else {
      return Ok(());
    };
    if self.state != PatchState::Unapplied {
      return Ok(());
    }

    info!(patch = %patch.display(), "applying patch");
    self
      .executor
      .patch(patch, &self.option, &self.root_dir, false)
      .await
      .map_err(|e| PatchError::Apply {
        patch: patch.clone(),
        source: e,
      })?;
    self.state = PatchState::Applied;
    Ok(())
  }

  /// Revert the patch if it is applied. A failed revert is not retried.
  pub async fn revert(&mut self) -> Result<(), PatchError> {
    let Some(patch) = &self.patch else {
      return Ok(());
    };
    if self.state != PatchState::Applied {
      return Ok(());
    }

    self.state = PatchState::Reverted;
    info!(patch = %patch.display(), "reverting patch");
    self
      .executor
      .patch(patch, &self.option, &self.root_dir, true)
      .await
      .map_err(|e| PatchError::Revert {
        patch: patch.clone(),
        source: e,
      })
  }

  /// Run `work` with the patch applied, reverting once it finishes.
  ///
  /// If `shutdown` resolves first, `work` is dropped, the patch is reverted
  /// on a best-effort basis, and [`PatchError::Interrupted`] is returned.
  /// Otherwise the work's own result is returned after the revert; revert
  /// failures are only logged.
  pub async fn guard<T, Err>(
    &mut self,
    work: impl Future<Output = Result<T, Err>>,
    shutdown: impl Future<Output = ()>,
  ) -> Result<Result<T, Err>, PatchError> {
    let outcome = tokio::select! {
      result = work => Some(result),
      () = shutdown => None,
    };

    match outcome {
      Some(result) => {
        if let Err(e) = self.revert().await {
          warn!(error = %e, "failed to revert patch");
        }
        Ok(result)
      }
      None => {
        warn!("interrupt received");
        if let Err(e) = self.revert().await {
          error!(error = %e, "failed to revert patch");
        }
        Err(PatchError::Interrupted)
      }
    }
  }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn interrupt_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for interrupt");
    std::future::pending::<()>().await;
  }
}
