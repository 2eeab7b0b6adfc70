//! Configure script generation and the configure/make steps that consume it.

pub mod generate;
pub mod options;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{BUILD_LOG, CONFIGURE_LOG, CONFIGURE_SCRIPT};
use crate::exec::{self, ExecError, Output};

pub use generate::{GeneratedScript, ScriptInputs, quote_token, synthesize};
pub use options::ConfigureOptions;

#[derive(Debug, Error)]
pub enum ConfigureError {
  #[error("failed to read configure script '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write configure script '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to configure nginx: {0}")]
  Configure(#[source] ExecError),

  #[error("failed to build nginx: {0}")]
  Build(#[source] ExecError),
}

/// Read a user-provided base script. An empty path means "no base script".
pub fn load_base_script(path: &Path) -> Result<String, ConfigureError> {
  if path.as_os_str().is_empty() {
    return Ok(String::new());
  }

  let text = std::fs::read_to_string(path).map_err(|e| ConfigureError::Read {
    path: path.to_path_buf(),
    source: e,
  })?;
  Ok(normalize_base_script(&text))
}

/// Strip trailing whitespace and a dangling line continuation.
///
/// Scripts are usually written as `./configure \` blocks; the last line's
/// backslash would otherwise swallow the first generated token.
pub fn normalize_base_script(text: &str) -> String {
  let mut script = text.trim_end();
  while let Some(stripped) = script.strip_suffix('\\') {
    script = stripped.trim_end();
  }
  script.to_string()
}

/// Write the script into `source_dir` as an executable file. Returns its path.
pub fn write_script(script: &GeneratedScript, source_dir: &Path) -> Result<PathBuf, ConfigureError> {
  let path = source_dir.join(CONFIGURE_SCRIPT);
  let write_err = |e: std::io::Error| ConfigureError::Write {
    path: path.clone(),
    source: e,
  };

  std::fs::write(&path, script.render()).map_err(write_err)?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).map_err(write_err)?;
  }

  debug!(path = %path.display(), "wrote configure script");
  Ok(path)
}

/// Run the generated configure script inside `source_dir`.
pub async fn run_configure(source_dir: &Path, verbose: bool) -> Result<(), ConfigureError> {
  info!(dir = %source_dir.display(), "configuring nginx");
  let script = format!("./{CONFIGURE_SCRIPT}");
  exec::run_command(
    "sh",
    &[script.as_str()],
    source_dir,
    Output::for_verbosity(verbose, Path::new(CONFIGURE_LOG)),
  )
  .await
  .map_err(ConfigureError::Configure)
}

/// Run `make -j<jobs>` inside `source_dir`.
pub async fn run_build(source_dir: &Path, jobs: u32, verbose: bool) -> Result<(), ConfigureError> {
  info!(dir = %source_dir.display(), jobs, "building nginx");
  let jobs = format!("-j{jobs}");
  exec::run_command(
    "make",
    &[jobs.as_str()],
    source_dir,
    Output::for_verbosity(verbose, Path::new(BUILD_LOG)),
  )
  .await
  .map_err(ConfigureError::Build)
}
