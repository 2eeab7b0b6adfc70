mod cmd;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, cmd_build, cmd_versions};
use output::print_error;

/// Fetch, configure, and build nginx (or OpenResty/freenginx) with static libraries and third-party modules
#[derive(Parser, Debug)]
#[command(name = "ngxbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Print the default version of every component and exit
  #[arg(long)]
  versions: bool,

  #[command(flatten)]
  build: BuildArgs,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.build.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .without_time()
    .init();

  let result = if cli.versions {
    cmd_versions();
    Ok(())
  } else {
    cmd_build(cli.build)
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
