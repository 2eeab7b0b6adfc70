//! Installed-version detection via `nginx -V`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{ComponentDescriptor, ComponentError, ComponentKind};
use crate::consts;
use crate::exec::{self, ExecError};

static NGINX_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"nginx version: nginx.(\d+\.\d+\.\d+)").expect("valid regex"));
static PCRE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"--with-pcre=\S+/pcre2-(\d+\.\d+)").expect("valid regex"));
static ZLIB_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"--with-zlib=\S+/zlib-(\d+\.\d+\.\d+)").expect("valid regex"));
static OPENSSL_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"--with-openssl=\S+/openssl-(\d+\.\d+\.\d+[a-z]*)").expect("valid regex"));
static LIBRESSL_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"--with-openssl=\S+/libressl-(\d+\.\d+\.\d+)").expect("valid regex"));
static OPENRESTY_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"nginx version: openresty/(\d+\.\d+\.\d+\.\d+)").expect("valid regex"));
static FREENGINX_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"freenginx version: freenginx/(\d+\.\d+\.\d+)").expect("valid regex"));

fn version_pattern(kind: ComponentKind) -> &'static Regex {
  match kind {
    ComponentKind::Nginx => &NGINX_RE,
    ComponentKind::Pcre => &PCRE_RE,
    ComponentKind::OpenSsl => &OPENSSL_RE,
    ComponentKind::LibreSsl => &LIBRESSL_RE,
    ComponentKind::Zlib => &ZLIB_RE,
    ComponentKind::OpenResty => &OPENRESTY_RE,
    ComponentKind::Freenginx => &FREENGINX_RE,
  }
}

/// The binary whose `-V` output is inspected: `$NGINX_BIN` or the default install path.
pub fn nginx_bin() -> String {
  std::env::var(consts::NGINX_BIN_ENV)
    .ok()
    .filter(|bin| !bin.is_empty())
    .unwrap_or_else(|| consts::DEFAULT_NGINX_BIN.to_string())
}

/// Version of `descriptor`'s component baked into the installed server.
///
/// An empty string means "not detected": the binary ran but its output did not
/// mention this component. That is indistinguishable from "not installed" and
/// is deliberately not interpreted further.
pub async fn installed_version(descriptor: &ComponentDescriptor) -> Result<String, ComponentError> {
  probe_version(descriptor, &nginx_bin()).await
}

/// Like [`installed_version`], probing an explicit binary.
pub async fn probe_version(descriptor: &ComponentDescriptor, bin: &str) -> Result<String, ComponentError> {
  let output = exec::capture_combined(bin, &["-V"]).await.map_err(|e| match e {
    ExecError::NotFound { program } => ComponentError::ProbeNotFound(program),
    other => ComponentError::ProbeFailed(other),
  })?;

  Ok(match_version(descriptor.kind, &output))
}

fn match_version(kind: ComponentKind, output: &str) -> String {
  version_pattern(kind)
    .captures(output)
    .and_then(|caps| caps.get(1))
    .map(|m| m.as_str().to_string())
    .unwrap_or_default()
}

/// Whether every component is already installed at exactly the requested version.
pub async fn is_same_version(descriptors: &[ComponentDescriptor]) -> Result<bool, ComponentError> {
  for descriptor in descriptors {
    let installed = installed_version(descriptor).await?;
    debug!(component = %descriptor.kind, requested = %descriptor.version, installed = %installed, "compared versions");
    if installed != descriptor.version {
      return Ok(false);
    }
  }
  Ok(true)
}
