//! End-to-end build orchestration.
//!
//! A run goes through these phases in order:
//! 1. Prepare the work directory (`<parent>/<distribution>/<version>`).
//! 2. Fetch the server sources, every static dependency, and every module
//!    concurrently. The first failure aborts the rest.
//! 3. Provision modules one at a time, in module-list order.
//! 4. Synthesize `nginx-configure` into the server source tree.
//! 5. Apply the patch, then configure and build with the patch guarded.

use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::component::{self, ComponentDescriptor, ComponentError, ComponentKind};
use crate::configure::{self, ConfigureError, ConfigureOptions, ScriptInputs};
use crate::exec::{self, ExecError};
use crate::fetch::{self, FetchError};
use crate::module::{self, ModuleError, ThirdPartyModule};
use crate::patch::{PatchError, PatchSession, ShellPatcher};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("select one between '--{0}' and '--{1}'")]
  Conflict(ComponentKind, ComponentKind),

  #[error("{0} is not a library and cannot be linked statically")]
  NotALibrary(ComponentKind),

  #[error("failed to prepare working directory '{}': {source}", .path.display())]
  WorkDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{0}")]
  HttpClient(#[source] FetchError),

  #[error("failed to fetch {component}: {source}")]
  Component {
    component: String,
    #[source]
    source: FetchError,
  },

  #[error(transparent)]
  Module(#[from] ModuleError),

  #[error(transparent)]
  Configure(#[from] ConfigureError),

  #[error(transparent)]
  Patch(#[from] PatchError),

  #[error("fetch task failed: {0}")]
  Task(#[source] tokio::task::JoinError),
}

/// What to build.
#[derive(Debug, Clone)]
pub struct BuildPlan {
  /// The server: nginx, OpenResty, or freenginx.
  pub main: ComponentDescriptor,
  /// Statically linked libraries, in configure order.
  pub dependencies: Vec<ComponentDescriptor>,
  pub modules: Vec<ThirdPartyModule>,
  /// Normalized user configure script, possibly empty.
  pub base_script: String,
  pub options: ConfigureOptions,
  pub passthrough: Vec<String>,
  /// Patch files; only the first is applied.
  pub patches: Vec<PathBuf>,
  pub patch_option: String,
}

impl BuildPlan {
  pub fn new(main: ComponentDescriptor) -> Self {
    Self {
      main,
      dependencies: Vec::new(),
      modules: Vec::new(),
      base_script: String::new(),
      options: ConfigureOptions::new(),
      passthrough: Vec::new(),
      patches: Vec::new(),
      patch_option: String::new(),
    }
  }

  /// Reject plans the build cannot satisfy.
  pub fn validate(&self) -> Result<(), PipelineError> {
    if let Some(dep) = self.dependencies.iter().find(|d| d.kind.is_server()) {
      return Err(PipelineError::NotALibrary(dep.kind));
    }
    let crypto: Vec<_> = self.dependencies.iter().filter(|d| d.kind.is_crypto()).collect();
    if let [first, second, ..] = crypto.as_slice() {
      return Err(PipelineError::Conflict(first.kind, second.kind));
    }
    Ok(())
  }

  /// Everything compared against the installed binary for idempotent builds.
  pub fn components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
    std::iter::once(&self.main).chain(&self.dependencies)
  }

  /// Whether the installed server already matches this plan.
  pub async fn is_installed(&self) -> Result<bool, ComponentError> {
    let components: Vec<_> = self.components().cloned().collect();
    component::is_same_version(&components).await
  }
}

/// How to run a plan.
#[derive(Debug, Clone)]
pub struct RunOptions {
  /// Parent of all work directories (`-d`).
  pub work_parent: PathBuf,
  /// Directory relative patch and module paths are resolved against.
  pub root_dir: PathBuf,
  pub jobs: u32,
  pub verbose: bool,
  pub configure_only: bool,
  /// Remove the work directory before starting.
  pub clear: bool,
}

/// Where a finished run left things.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
  pub work_dir: PathBuf,
  /// Server source tree, where `make install` is run.
  pub source_dir: PathBuf,
  pub configure_only: bool,
}

/// Directory a plan's sources are fetched into.
pub fn work_dir(parent: &Path, main: &ComponentDescriptor) -> PathBuf {
  parent.join(main.kind.as_str()).join(&main.version)
}

/// Run the whole build. `shutdown` interrupts configure and build.
pub async fn run(
  plan: &BuildPlan,
  options: &RunOptions,
  shutdown: impl Future<Output = ()>,
) -> Result<BuildReport, PipelineError> {
  plan.validate()?;

  let work_dir = prepare_work_dir(&options.work_parent, &plan.main, options.clear)?;
  let source_dir = work_dir.join(plan.main.source_path());

  if !plan.patches.is_empty() && source_dir.exists() {
    info!(path = %source_dir.display(), "removing previously patched sources");
    std::fs::remove_dir_all(&source_dir).map_err(|e| PipelineError::WorkDir {
      path: source_dir.clone(),
      source: e,
    })?;
  }

  prepare_sources(plan, &work_dir, options.verbose).await?;

  for m in &plan.modules {
    module::provide(m, &work_dir, options.verbose).await?;
  }

  info!(path = %source_dir.display(), "generating configure script");
  for dep in &plan.dependencies {
    if dep.is_included_with_option(&plan.base_script) {
      warn!("{}", dep.library_option_warning());
    }
  }

  let parallel_jobs = (plan.main.kind == ComponentKind::OpenResty).then_some(options.jobs);
  let script = configure::synthesize(&ScriptInputs {
    base_script: &plan.base_script,
    modules: &plan.modules,
    dependencies: &plan.dependencies,
    options: &plan.options,
    root_dir: &options.root_dir,
    parallel_jobs,
    passthrough: &plan.passthrough,
  });
  debug!(script = %script, "configure script");
  configure::write_script(&script, &source_dir)?;

  let patcher = ShellPatcher::new(&source_dir, options.verbose);
  let mut session = PatchSession::from_paths(
    &plan.patches,
    plan.patch_option.as_str(),
    &options.root_dir,
    patcher,
  );
  session.apply().await?;

  let work = async {
    configure::run_configure(&source_dir, options.verbose).await?;
    if !options.configure_only {
      configure::run_build(&source_dir, options.jobs, options.verbose).await?;
    }
    Ok::<_, ConfigureError>(())
  };
  session.guard(work, shutdown).await??;

  Ok(BuildReport {
    work_dir,
    source_dir,
    configure_only: options.configure_only,
  })
}

fn prepare_work_dir(parent: &Path, main: &ComponentDescriptor, clear: bool) -> Result<PathBuf, PipelineError> {
  let dir = work_dir(parent, main);
  let io_err = |path: &Path, e| PipelineError::WorkDir {
    path: path.to_path_buf(),
    source: e,
  };

  if clear && dir.exists() {
    info!(path = %dir.display(), "clearing working directory");
    std::fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
  }
  std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

  Ok(dunce::canonicalize(&dir).unwrap_or(dir))
}

/// Fetch every component and module concurrently.
///
/// Returns the first error; the remaining tasks are aborted.
async fn prepare_sources(plan: &BuildPlan, work_dir: &Path, verbose: bool) -> Result<(), PipelineError> {
  let client = fetch::http_client().map_err(PipelineError::HttpClient)?;
  let mut tasks = JoinSet::new();

  for descriptor in plan.components() {
    let descriptor = descriptor.clone();
    let work_dir = work_dir.to_path_buf();
    let client = client.clone();
    tasks.spawn(async move {
      fetch::fetch_and_extract(&descriptor, &work_dir, &client)
        .await
        .map(|_| ())
        .map_err(|e| PipelineError::Component {
          component: descriptor.to_string(),
          source: e,
        })
    });
  }

  for m in &plan.modules {
    let m = m.clone();
    let work_dir = work_dir.to_path_buf();
    tasks.spawn(async move { module::fetch_module(&m, &work_dir, verbose).await.map_err(PipelineError::from) });
  }

  while let Some(joined) = tasks.join_next().await {
    if let Err(e) = joined.map_err(PipelineError::Task).and_then(|result| result) {
      tasks.abort_all();
      return Err(e);
    }
  }

  Ok(())
}

/// `nginx -V` output of the freshly built binary.
pub async fn built_configuration(source_dir: &Path) -> Result<String, ExecError> {
  let bin = source_dir.join("objs").join("nginx");
  exec::capture_combined(&bin.to_string_lossy(), &["-V"]).await
}

/// Clear the process umask so installed files get the modes the build asks for.
#[cfg(unix)]
pub fn clear_umask() {
  let previous = rustix::process::umask(rustix::fs::Mode::empty());
  debug!(previous = previous.bits(), "cleared umask");
}

#[cfg(not(unix))]
pub fn clear_umask() {}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::configure::options::ADD_MODULE;
  use crate::consts::CONFIGURE_SCRIPT;
  use crate::module::ModuleForm;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use tempfile::TempDir;

  /// A configure that records its arguments and emits a Makefile.
  const FAKE_CONFIGURE: &str = "#!/bin/sh\n\
echo \"$@\" > configured\n\
printf 'all:\\n\\ttouch built\\n' > Makefile\n";

  fn tarball(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, body) in files {
      let mut header = tar::Header::new_gnu();
      header.set_size(body.len() as u64);
      header.set_mode(0o755);
      header.set_cksum();
      builder
        .append_data(&mut header, format!("{root}/{name}"), body.as_bytes())
        .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
  }

  fn run_options(temp_dir: &TempDir) -> RunOptions {
    RunOptions {
      work_parent: temp_dir.path().join("work"),
      root_dir: temp_dir.path().to_path_buf(),
      jobs: 2,
      verbose: false,
      configure_only: false,
      clear: false,
    }
  }

  fn local_module(name: &str, path: &Path) -> ThirdPartyModule {
    ThirdPartyModule {
      name: name.to_string(),
      form: ModuleForm::Local,
      url: path.display().to_string(),
      rev: None,
      dynamic: false,
      shprov: Some("touch provisioned".to_string()),
      shprov_dir: None,
    }
  }

  #[test]
  fn work_dir_per_distribution() {
    let parent = Path::new("/tmp/ngx");
    let nginx = ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false);
    let openresty = ComponentDescriptor::new(ComponentKind::OpenResty, "1.21.4.1", false);
    assert_eq!(work_dir(parent, &nginx), PathBuf::from("/tmp/ngx/nginx/1.25.0"));
    assert_eq!(work_dir(parent, &openresty), PathBuf::from("/tmp/ngx/openresty/1.21.4.1"));
  }

  #[test]
  fn two_crypto_libraries_conflict() {
    let mut plan = BuildPlan::new(ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false));
    plan.dependencies = vec![
      ComponentDescriptor::new(ComponentKind::OpenSsl, "3.0.8", true),
      ComponentDescriptor::new(ComponentKind::LibreSsl, "3.7.2", true),
    ];

    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PipelineError::Conflict(ComponentKind::OpenSsl, ComponentKind::LibreSsl)));
    assert_eq!(err.to_string(), "select one between '--openssl' and '--libressl'");
  }

  #[test]
  fn server_cannot_be_a_dependency() {
    let mut plan = BuildPlan::new(ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false));
    plan.dependencies = vec![ComponentDescriptor::new(ComponentKind::Freenginx, "1.27.4", true)];

    assert!(matches!(
      plan.validate(),
      Err(PipelineError::NotALibrary(ComponentKind::Freenginx))
    ));
  }

  #[test]
  fn clear_removes_previous_work_dir() {
    let temp_dir = TempDir::new().unwrap();
    let nginx = ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false);
    let stale = work_dir(temp_dir.path(), &nginx).join("stale");
    std::fs::create_dir_all(&stale).unwrap();

    prepare_work_dir(temp_dir.path(), &nginx, false).unwrap();
    assert!(stale.exists());

    let dir = prepare_work_dir(temp_dir.path(), &nginx, true).unwrap();
    assert!(dir.is_dir());
    assert!(!stale.exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn full_build() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let nginx_mock = server
      .mock("GET", "/nginx-1.25.0.tar.gz")
      .with_body(tarball("nginx-1.25.0", &[("configure", FAKE_CONFIGURE)]))
      .expect(1)
      .create_async()
      .await;
    let zlib_mock = server
      .mock("GET", "/zlib-1.3.1.tar.gz")
      .with_body(tarball("zlib-1.3.1", &[("configure", "#!/bin/sh\n")]))
      .expect(1)
      .create_async()
      .await;

    let echo_dir = temp_dir.path().join("echo-nginx-module");
    std::fs::create_dir(&echo_dir).unwrap();

    let mut plan = BuildPlan::new(
      ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false).with_download_prefix(server.url()),
    );
    plan.dependencies = vec![ComponentDescriptor::new(ComponentKind::Zlib, "1.3.1", true).with_download_prefix(server.url())];
    plan.modules = vec![local_module("echo", &echo_dir)];
    plan.options.set_value(ADD_MODULE, "vendored/extra");
    plan.passthrough = vec!["--with-stream".to_string()];

    let options = run_options(&temp_dir);
    let report = run(&plan, &options, std::future::pending()).await.unwrap();

    let source_dir = &report.source_dir;
    assert!(source_dir.ends_with("nginx/1.25.0/nginx-1.25.0"));
    assert!(report.work_dir.join("zlib-1.3.1/configure").is_file());
    assert!(echo_dir.join("provisioned").exists());
    assert!(source_dir.join("built").exists());

    let script = std::fs::read_to_string(source_dir.join(CONFIGURE_SCRIPT)).unwrap();
    assert!(script.starts_with("#!/bin/sh\n\n./configure \\\n"));

    let configured = std::fs::read_to_string(source_dir.join("configured")).unwrap();
    let extra = temp_dir.path().join("vendored/extra");
    assert_eq!(
      configured.trim(),
      format!(
        "--with-zlib=../zlib-1.3.1 --add-module={} --add-module={} --with-stream",
        echo_dir.display(),
        extra.display()
      )
    );

    nginx_mock.assert_async().await;
    zlib_mock.assert_async().await;
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn configure_only_skips_make() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("GET", "/nginx-1.25.0.tar.gz")
      .with_body(tarball("nginx-1.25.0", &[("configure", FAKE_CONFIGURE)]))
      .create_async()
      .await;

    let plan = BuildPlan::new(
      ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false).with_download_prefix(server.url()),
    );
    let options = RunOptions {
      configure_only: true,
      ..run_options(&temp_dir)
    };
    let report = run(&plan, &options, std::future::pending()).await.unwrap();

    assert!(report.configure_only);
    assert!(report.source_dir.join("Makefile").exists());
    assert!(!report.source_dir.join("built").exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn openresty_passes_jobs_to_configure() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("GET", "/openresty-1.21.4.1.tar.gz")
      .with_body(tarball("openresty-1.21.4.1", &[("configure", FAKE_CONFIGURE)]))
      .create_async()
      .await;

    let plan = BuildPlan::new(
      ComponentDescriptor::new(ComponentKind::OpenResty, "1.21.4.1", false).with_download_prefix(server.url()),
    );
    let options = RunOptions {
      configure_only: true,
      jobs: 4,
      ..run_options(&temp_dir)
    };
    let report = run(&plan, &options, std::future::pending()).await.unwrap();

    let configured = std::fs::read_to_string(report.source_dir.join("configured")).unwrap();
    assert_eq!(configured.trim(), "-j4");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn modules_provisioned_in_list_order_after_all_fetches() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("GET", "/nginx-1.25.0.tar.gz")
      .with_body(tarball("nginx-1.25.0", &[("configure", FAKE_CONFIGURE)]))
      .create_async()
      .await;

    let upstream = temp_dir.path().join("upstream");
    for name in ["alpha", "beta"] {
      let repo = upstream.join(name);
      std::fs::create_dir_all(&repo).unwrap();
      let status = std::process::Command::new("git")
        .args(["init", "-q"])
        .current_dir(&repo)
        .status()
        .unwrap();
      assert!(status.success());
      let status = std::process::Command::new("git")
        .args(["-c", "user.name=t", "-c", "user.email=t@example.org"])
        .args(["commit", "-q", "--allow-empty", "-m", "init"])
        .current_dir(&repo)
        .status()
        .unwrap();
      assert!(status.success());
    }

    let order = temp_dir.path().join("order.txt");
    let git_module = |name: &str, other: &str| ThirdPartyModule {
      name: name.to_string(),
      form: ModuleForm::Git,
      url: upstream.join(name).display().to_string(),
      rev: None,
      dynamic: false,
      shprov: Some(format!(
        "test -d ../{other} && test -f ../nginx-1.25.0/configure && echo {name} >> {}",
        order.display()
      )),
      shprov_dir: None,
    };

    let mut plan = BuildPlan::new(
      ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false).with_download_prefix(server.url()),
    );
    plan.modules = vec![git_module("beta", "alpha"), git_module("alpha", "beta")];
    let options = RunOptions {
      configure_only: true,
      ..run_options(&temp_dir)
    };
    let report = run(&plan, &options, std::future::pending()).await.unwrap();

    assert_eq!(std::fs::read_to_string(&order).unwrap(), "beta\nalpha\n");
    let configured = std::fs::read_to_string(report.source_dir.join("configured")).unwrap();
    assert_eq!(configured.trim(), "--add-module=../beta --add-module=../alpha");
  }

  #[tokio::test]
  async fn first_fetch_failure_fails_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _nginx = server
      .mock("GET", "/nginx-1.25.0.tar.gz")
      .with_body(tarball("nginx-1.25.0", &[("configure", FAKE_CONFIGURE)]))
      .create_async()
      .await;
    let _pcre = server
      .mock("GET", "/pcre2-10.42/pcre2-10.42.tar.gz")
      .with_status(404)
      .create_async()
      .await;

    let mut plan = BuildPlan::new(
      ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false).with_download_prefix(server.url()),
    );
    plan.dependencies = vec![ComponentDescriptor::new(ComponentKind::Pcre, "10.42", true).with_download_prefix(server.url())];

    let err = run(&plan, &run_options(&temp_dir), std::future::pending())
      .await
      .unwrap_err();

    match err {
      PipelineError::Component { component, source } => {
        assert_eq!(component, "pcre2-10.42");
        assert!(matches!(source, FetchError::Status { .. }));
      }
      other => panic!("expected Component error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn missing_local_module_fails_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let nginx = ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false).with_download_prefix("http://127.0.0.1:1");
    let source_dir = work_dir(&temp_dir.path().join("work"), &nginx).join(nginx.source_path());
    std::fs::create_dir_all(&source_dir).unwrap();

    let mut plan = BuildPlan::new(nginx);
    plan.modules = vec![local_module("ghost", Path::new("/nonexistent/ngxbuild/ghost"))];

    let err = run(&plan, &run_options(&temp_dir), std::future::pending())
      .await
      .unwrap_err();

    assert!(matches!(err, PipelineError::Module(ModuleError::NotFound { .. })));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn interrupt_during_configure() {
    let temp_dir = TempDir::new().unwrap();
    let nginx = ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false).with_download_prefix("http://127.0.0.1:1");
    let source_dir = work_dir(&temp_dir.path().join("work"), &nginx).join(nginx.source_path());
    std::fs::create_dir_all(&source_dir).unwrap();
    {
      use std::os::unix::fs::PermissionsExt;
      let configure = source_dir.join("configure");
      std::fs::write(&configure, "#!/bin/sh\nsleep 5\n").unwrap();
      std::fs::set_permissions(&configure, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let plan = BuildPlan::new(nginx);
    let shutdown = tokio::time::sleep(std::time::Duration::from_millis(100));
    let err = run(&plan, &run_options(&temp_dir), shutdown).await.unwrap_err();

    assert!(matches!(err, PipelineError::Patch(PatchError::Interrupted)));
  }
}
