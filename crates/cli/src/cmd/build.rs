//! Implementation of the default `ngxbuild` run: fetch, configure, and build.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::debug;

use ngxbuild_lib::component::{ComponentDescriptor, ComponentKind};
use ngxbuild_lib::configure::{self, ConfigureOptions};
use ngxbuild_lib::consts;
use ngxbuild_lib::module;
use ngxbuild_lib::patch;
use ngxbuild_lib::pipeline::{self, BuildPlan, BuildReport, RunOptions};

use crate::output::{format_elapsed, print_command, print_info, print_stat, print_success, print_warning};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Working directory; sources are fetched into <DIR>/<distribution>/<version>
  #[arg(short = 'd', long = "work-dir", value_name = "DIR", required_unless_present = "versions")]
  pub work_dir: Option<PathBuf>,

  /// nginx version
  #[arg(short = 'v', long = "nginx-version", value_name = "VERSION", default_value = consts::NGINX_VERSION)]
  pub nginx_version: String,

  /// Base configure script
  #[arg(short = 'c', long = "configure", value_name = "FILE")]
  pub configure: Option<PathBuf>,

  /// Third-party module list (TOML)
  #[arg(short = 'm', long = "modules", value_name = "FILE")]
  pub modules: Option<PathBuf>,

  /// Build OpenResty instead of nginx
  #[arg(long, conflicts_with = "freenginx")]
  pub openresty: bool,

  #[arg(long, value_name = "VERSION", default_value = consts::OPENRESTY_VERSION)]
  pub openresty_version: String,

  /// Build freenginx instead of nginx
  #[arg(long)]
  pub freenginx: bool,

  #[arg(long, value_name = "VERSION", default_value = consts::FREENGINX_VERSION)]
  pub freenginx_version: String,

  /// Link PCRE2 statically
  #[arg(long)]
  pub pcre: bool,

  #[arg(long, value_name = "VERSION", default_value = consts::PCRE_VERSION)]
  pub pcre_version: String,

  /// Link OpenSSL statically
  #[arg(long, conflicts_with = "libressl")]
  pub openssl: bool,

  #[arg(long, value_name = "VERSION", default_value = consts::OPENSSL_VERSION)]
  pub openssl_version: String,

  /// Link LibreSSL statically
  #[arg(long)]
  pub libressl: bool,

  #[arg(long, value_name = "VERSION", default_value = consts::LIBRESSL_VERSION)]
  pub libressl_version: String,

  /// Link zlib statically
  #[arg(long)]
  pub zlib: bool,

  #[arg(long, value_name = "VERSION", default_value = consts::ZLIB_VERSION)]
  pub zlib_version: String,

  /// Parallel jobs for make (and for OpenResty's configure)
  #[arg(short = 'j', long, value_name = "N", default_value_t = default_jobs())]
  pub jobs: u32,

  /// Patch applied to the server sources; only the first is used
  #[arg(long = "patch", value_name = "FILE")]
  pub patches: Vec<PathBuf>,

  /// Option passed to patch
  #[arg(long, value_name = "OPT", default_value = "", allow_hyphen_values = true)]
  pub patch_opt: String,

  /// Module source directory, added with --add-module
  #[arg(long = "add-module", value_name = "PATH")]
  pub add_modules: Vec<String>,

  /// Module source directory, added with --add-dynamic-module
  #[arg(long = "add-dynamic-module", value_name = "PATH")]
  pub add_dynamic_modules: Vec<String>,

  /// Configure option with a value, e.g. --opt prefix=/opt/nginx
  #[arg(long = "opt", value_name = "NAME=VALUE", value_parser = parse_key_value, allow_hyphen_values = true)]
  pub opts: Vec<(String, String)>,

  /// Configure flag without a value, e.g. --flag with-debug
  #[arg(long = "flag", value_name = "NAME", allow_hyphen_values = true)]
  pub flags: Vec<String>,

  /// Stop after configure
  #[arg(long)]
  pub configure_only: bool,

  /// Do nothing if the installed nginx already matches the requested versions
  #[arg(long)]
  pub idempotent: bool,

  /// Remove the working directory first
  #[arg(long)]
  pub clear: bool,

  /// Stream command output and enable debug logging
  #[arg(long)]
  pub verbose: bool,

  /// Extra arguments passed to configure as-is
  #[arg(last = true, value_name = "CONFIGURE_ARGS")]
  pub configure_args: Vec<String>,
}

fn default_jobs() -> u32 {
  std::thread::available_parallelism().map_or(1, |n| n.get() as u32)
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((name, value)) if !name.is_empty() => Ok((option_name(name), value.to_string())),
    _ => Err(format!("expected NAME=VALUE, got '{s}'")),
  }
}

/// Configure options are spelled `--name`; accept them with or without dashes.
fn option_name(name: &str) -> String {
  if name.starts_with('-') {
    name.to_string()
  } else {
    format!("--{name}")
  }
}

/// Execute a build.
///
/// Prints the install hint on success. With `--idempotent`, returns early when
/// the installed binary already matches every requested version.
pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let start = Instant::now();
  print_info(&format!("{} {}", consts::APP_NAME, env!("CARGO_PKG_VERSION")));

  let plan = build_plan(&args)?;
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  if args.idempotent {
    match rt.block_on(plan.is_installed()) {
      Ok(true) => {
        print_success("Installed nginx is same.");
        return Ok(());
      }
      Ok(false) => {}
      Err(e) => print_warning(&e.to_string()),
    }
  }

  let Some(work_parent) = args.work_dir.clone() else {
    bail!("set working directory with -d");
  };
  let root_dir = std::env::current_dir().context("Failed to determine current directory")?;
  let options = RunOptions {
    work_parent,
    root_dir: dunce::canonicalize(&root_dir).unwrap_or(root_dir),
    jobs: args.jobs.max(1),
    verbose: args.verbose,
    configure_only: args.configure_only,
    clear: args.clear,
  };
  debug!(?options, "run options");

  pipeline::clear_umask();
  let report = rt
    .block_on(pipeline::run(&plan, &options, patch::interrupt_signal()))
    .with_context(|| format!("Failed to build {}", plan.main))?;

  print_success("Complete building nginx!");
  if plan.main.kind != ComponentKind::OpenResty && !report.configure_only {
    match rt.block_on(pipeline::built_configuration(&report.source_dir)) {
      Ok(configuration) => {
        println!();
        print!("{configuration}");
      }
      Err(e) => print_warning(&e.to_string()),
    }
  }
  print_install_hint(&report);
  print_stat("Duration", &format_elapsed(start.elapsed()));

  Ok(())
}

fn build_plan(args: &BuildArgs) -> Result<BuildPlan> {
  let main = if args.openresty {
    ComponentDescriptor::new(ComponentKind::OpenResty, &args.openresty_version, false)
  } else if args.freenginx {
    ComponentDescriptor::new(ComponentKind::Freenginx, &args.freenginx_version, false)
  } else {
    ComponentDescriptor::new(ComponentKind::Nginx, &args.nginx_version, false)
  };

  let mut plan = BuildPlan::new(main);

  let libraries = [
    (args.pcre, ComponentKind::Pcre, &args.pcre_version),
    (args.openssl, ComponentKind::OpenSsl, &args.openssl_version),
    (args.libressl, ComponentKind::LibreSsl, &args.libressl_version),
    (args.zlib, ComponentKind::Zlib, &args.zlib_version),
  ];
  plan.dependencies = libraries
    .into_iter()
    .filter(|(enabled, _, _)| *enabled)
    .map(|(_, kind, version)| ComponentDescriptor::new(kind, version, true))
    .collect();

  if let Some(path) = &args.modules {
    plan.modules = module::load_modules(path).context("Failed to load module list")?;
  }
  if let Some(path) = &args.configure {
    plan.base_script = configure::load_base_script(path).context("Failed to load configure script")?;
  }

  plan.options = configure_options(args);
  plan.passthrough = args.configure_args.clone();
  plan.patches = args.patches.clone();
  plan.patch_option = args.patch_opt.clone();

  plan.validate()?;
  Ok(plan)
}

fn configure_options(args: &BuildArgs) -> ConfigureOptions {
  let mut options = ConfigureOptions::new();
  options.add_module_paths(false, &args.add_modules);
  options.add_module_paths(true, &args.add_dynamic_modules);
  for (name, value) in &args.opts {
    options.set_value(name.as_str(), value.as_str());
  }
  for flag in &args.flags {
    options.set_flag(option_name(flag), true);
  }
  options
}

fn print_install_hint(report: &BuildReport) {
  println!();
  print_info("Enter the following command for install nginx.");
  println!();
  print_command(&format!("cd {}", report.source_dir.display()));
  if report.configure_only {
    print_command("make");
  }
  print_command("sudo make install");
}
