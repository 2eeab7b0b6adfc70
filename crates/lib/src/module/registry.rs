//! Module fetch and post-fetch provisioning.

use std::path::Path;

use tracing::info;

use super::{ModuleError, ModuleForm, ThirdPartyModule};
use crate::exec::{self, Output};

/// Make the module's source available under `work_dir`.
///
/// Skips modules whose directory already exists. git and hg modules are
/// cloned into `work_dir`; local modules are only checked for existence.
pub async fn fetch_module(module: &ThirdPartyModule, work_dir: &Path, verbose: bool) -> Result<(), ModuleError> {
  if work_dir.join(&module.name).exists() {
    info!(module = %module.name, "module already exists, skipping download");
    return Ok(());
  }

  match module.form {
    ModuleForm::Local => {
      let path = module.source_dir(work_dir);
      if !path.exists() {
        return Err(ModuleError::NotFound {
          name: module.name.clone(),
          path,
        });
      }
      info!(module = %module.name, path = %path.display(), "using local module");
    }
    ModuleForm::Git | ModuleForm::Hg => {
      match &module.rev {
        Some(rev) => info!(module = %module.name, rev = %rev, url = %module.url, "downloading module"),
        None => info!(module = %module.name, url = %module.url, "downloading module"),
      }

      let mut args = vec!["clone"];
      if module.form == ModuleForm::Git {
        args.push("--recursive");
      }
      args.push(module.url.as_str());

      let log = format!("{}.log", module.name);
      exec::run_command(
        module.form.as_str(),
        &args,
        work_dir,
        Output::for_verbosity(verbose, Path::new(&log)),
      )
      .await
      .map_err(|e| ModuleError::Clone {
        name: module.name.clone(),
        url: module.url.clone(),
        source: e,
      })?;

      info!(module = %module.name, "downloaded module");
    }
  }

  Ok(())
}

/// Prepare a fetched module: check out its revision, then run its shell hook.
///
/// Both steps are optional and run inside the module's directory (the hook in
/// `shprov_dir` when given). Directories are passed to the child processes, so
/// the caller's working directory is untouched whichever way this returns.
pub async fn provide(module: &ThirdPartyModule, work_dir: &Path, verbose: bool) -> Result<(), ModuleError> {
  let module_dir = module.source_dir(work_dir);
  let log = format!("{}.log", module.name);
  let output = Output::for_verbosity(verbose, Path::new(&log));

  if let Some(rev) = &module.rev {
    info!(module = %module.name, rev = %rev, "switching revision");
    switch_rev(module, rev, &module_dir, output).await?;
  }

  if let Some(command) = &module.shprov {
    let dir = match &module.shprov_dir {
      Some(sub) => module_dir.join(sub),
      None => module_dir,
    };
    info!(module = %module.name, dir = %dir.display(), "running shprov");
    exec::run_shell(command, &dir, output)
      .await
      .map_err(|e| ModuleError::Provision {
        name: module.name.clone(),
        command: command.clone(),
        source: e,
      })?;
  }

  Ok(())
}

async fn switch_rev(module: &ThirdPartyModule, rev: &str, dir: &Path, output: Output<'_>) -> Result<(), ModuleError> {
  let program = match module.form {
    ModuleForm::Git => "git",
    ModuleForm::Hg => "hg",
    ModuleForm::Local => {
      return Err(ModuleError::Unsupported {
        name: module.name.clone(),
        form: module.form.to_string(),
      });
    }
  };

  exec::run_command(program, &["checkout", rev], dir, output)
    .await
    .map_err(|e| ModuleError::Checkout {
      name: module.name.clone(),
      form: module.form,
      rev: rev.to_string(),
      source: e,
    })
}
