//! Third-party modules.
//!
//! Modules are declared in a TOML module list, one table per module keyed by
//! the module name:
//!
//! ```toml
//! [ngx_devel_kit]
//! form = "git"
//! url = "https://github.com/vision5/ngx_devel_kit"
//! rev = "v0.3.3"
//!
//! [echo-nginx-module]
//! form = "local"
//! url = "/src/echo-nginx-module"
//! dynamic = true
//! ```
//!
//! Declaration order is preserved and drives both provisioning and the order
//! of `--add-module` flags in the generated configure script.

pub mod registry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::exec::ExecError;

pub use registry::{fetch_module, provide};

/// Errors that can occur while loading, fetching, or provisioning modules.
#[derive(Debug, Error)]
pub enum ModuleError {
  /// The module list could not be read.
  #[error("failed to read module list '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The module list is not valid TOML.
  #[error("failed to parse module list '{}': {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  /// A module entry has missing or mistyped fields.
  #[error("invalid entry for module '{name}': {source}")]
  InvalidEntry {
    name: String,
    #[source]
    source: toml::de::Error,
  },

  /// The source form is not one of git, hg, local.
  #[error("form={form} is not supported (module '{name}')")]
  Unsupported { name: String, form: String },

  /// A local module's path does not exist.
  #[error("local module path {} (for module '{name}') not found", .path.display())]
  NotFound { name: String, path: PathBuf },

  /// Cloning failed.
  #[error("failed to download module '{name}' from {url}: {source}")]
  Clone {
    name: String,
    url: String,
    #[source]
    source: ExecError,
  },

  /// Checking out the requested revision failed.
  #[error("failed to switch revision for module '{name}' (form: {form}, rev: {rev}): {source}")]
  Checkout {
    name: String,
    form: ModuleForm,
    rev: String,
    #[source]
    source: ExecError,
  },

  /// The provisioning shell command failed.
  #[error("failed to execute shprov for module '{name}' (shprov: {command}): {source}")]
  Provision {
    name: String,
    command: String,
    #[source]
    source: ExecError,
  },
}

/// Where a module's source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleForm {
  Git,
  Hg,
  Local,
}

impl ModuleForm {
  pub fn as_str(self) -> &'static str {
    match self {
      ModuleForm::Git => "git",
      ModuleForm::Hg => "hg",
      ModuleForm::Local => "local",
    }
  }
}

impl fmt::Display for ModuleForm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModuleForm {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "git" => Ok(ModuleForm::Git),
      "hg" => Ok(ModuleForm::Hg),
      "local" => Ok(ModuleForm::Local),
      other => Err(other.to_string()),
    }
  }
}

/// One entry of the module list as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleRecord {
  pub form: String,
  pub url: String,
  #[serde(default)]
  pub rev: Option<String>,
  #[serde(default)]
  pub dynamic: bool,
  #[serde(default)]
  pub shprov: Option<String>,
  #[serde(default)]
  pub shprov_dir: Option<String>,
}

/// A third-party module ready to be fetched and provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirdPartyModule {
  pub name: String,
  pub form: ModuleForm,
  /// Clone URL, or the filesystem path for [`ModuleForm::Local`].
  pub url: String,
  pub rev: Option<String>,
  pub dynamic: bool,
  /// Shell command run after fetching.
  pub shprov: Option<String>,
  /// Subdirectory of the module the shell command runs in.
  pub shprov_dir: Option<String>,
}

impl ThirdPartyModule {
  pub fn from_record(name: impl Into<String>, record: ModuleRecord) -> Result<Self, ModuleError> {
    let name = name.into();
    let form = record
      .form
      .parse::<ModuleForm>()
      .map_err(|form| ModuleError::Unsupported { name: name.clone(), form })?;

    Ok(Self {
      name,
      form,
      url: record.url,
      rev: record.rev.filter(|r| !r.is_empty()),
      dynamic: record.dynamic,
      shprov: record.shprov.filter(|s| !s.trim().is_empty()),
      shprov_dir: record.shprov_dir.filter(|d| !d.is_empty()),
    })
  }

  /// Directory holding the module's source.
  ///
  /// Cloned modules live next to the server sources in `work_dir`; local
  /// modules stay where they are (relative paths are taken from `work_dir`).
  pub fn source_dir(&self, work_dir: &Path) -> PathBuf {
    match self.form {
      ModuleForm::Local => work_dir.join(&self.url),
      ModuleForm::Git | ModuleForm::Hg => work_dir.join(&self.name),
    }
  }

  /// Path passed to `--add-module`, relative to the server source directory.
  pub fn configure_path(&self) -> String {
    match self.form {
      ModuleForm::Local => self.url.clone(),
      ModuleForm::Git | ModuleForm::Hg => format!("../{}", self.name),
    }
  }
}

/// Parse a module list from TOML text.
pub fn parse_modules(text: &str, path: &Path) -> Result<Vec<ThirdPartyModule>, ModuleError> {
  let table: toml::Table = toml::from_str(text).map_err(|e| ModuleError::Parse {
    path: path.to_path_buf(),
    source: e,
  })?;

  table
    .into_iter()
    .map(|(name, value)| {
      let record: ModuleRecord = value.try_into().map_err(|e| ModuleError::InvalidEntry {
        name: name.clone(),
        source: e,
      })?;
      ThirdPartyModule::from_record(name, record)
    })
    .collect()
}

/// Load the module list at `path`. An empty path means "no modules".
pub fn load_modules(path: &Path) -> Result<Vec<ThirdPartyModule>, ModuleError> {
  if path.as_os_str().is_empty() {
    return Ok(Vec::new());
  }

  let text = std::fs::read_to_string(path).map_err(|e| ModuleError::Read {
    path: path.to_path_buf(),
    source: e,
  })?;
  parse_modules(&text, path)
}
