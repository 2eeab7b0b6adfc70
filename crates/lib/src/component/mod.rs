//! Component descriptors.
//!
//! A descriptor names one buildable component (the web server itself, one of
//! its distribution variants, or a statically linked library) at a specific
//! version and derives everything else from that: canonical name, configure
//! option, download URL, and on-disk paths. Apart from [`probe`], everything
//! here is pure.

pub mod probe;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::consts;

pub use probe::{installed_version, is_same_version};

/// Errors raised while resolving component metadata.
#[derive(Debug, Error)]
pub enum ComponentError {
  /// The text does not name a known component.
  #[error("invalid component variant: {0}")]
  InvalidVariant(String),

  /// The version probe binary does not exist.
  #[error("version probe binary not found: {0}")]
  ProbeNotFound(String),

  /// The version probe ran but failed.
  #[error("version probe failed: {0}")]
  ProbeFailed(#[source] crate::exec::ExecError),
}

/// Every component the build knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
  Nginx,
  Pcre,
  OpenSsl,
  LibreSsl,
  Zlib,
  OpenResty,
  Freenginx,
}

impl ComponentKind {
  pub const ALL: [ComponentKind; 7] = [
    ComponentKind::Nginx,
    ComponentKind::Pcre,
    ComponentKind::OpenSsl,
    ComponentKind::LibreSsl,
    ComponentKind::Zlib,
    ComponentKind::OpenResty,
    ComponentKind::Freenginx,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ComponentKind::Nginx => "nginx",
      ComponentKind::Pcre => "pcre",
      ComponentKind::OpenSsl => "openssl",
      ComponentKind::LibreSsl => "libressl",
      ComponentKind::Zlib => "zlib",
      ComponentKind::OpenResty => "openresty",
      ComponentKind::Freenginx => "freenginx",
    }
  }

  /// Whether this is one of the crypto libraries providing `--with-openssl`.
  pub fn is_crypto(self) -> bool {
    matches!(self, ComponentKind::OpenSsl | ComponentKind::LibreSsl)
  }

  /// Whether this component is the server itself rather than a library.
  pub fn is_server(self) -> bool {
    matches!(
      self,
      ComponentKind::Nginx | ComponentKind::OpenResty | ComponentKind::Freenginx
    )
  }

  pub fn default_version(self) -> &'static str {
    match self {
      ComponentKind::Nginx => consts::NGINX_VERSION,
      ComponentKind::Pcre => consts::PCRE_VERSION,
      ComponentKind::OpenSsl => consts::OPENSSL_VERSION,
      ComponentKind::LibreSsl => consts::LIBRESSL_VERSION,
      ComponentKind::Zlib => consts::ZLIB_VERSION,
      ComponentKind::OpenResty => consts::OPENRESTY_VERSION,
      ComponentKind::Freenginx => consts::FREENGINX_VERSION,
    }
  }

  pub fn default_download_prefix(self) -> &'static str {
    match self {
      ComponentKind::Nginx => consts::NGINX_DOWNLOAD_URL_PREFIX,
      ComponentKind::Pcre => consts::PCRE_DOWNLOAD_URL_PREFIX,
      ComponentKind::OpenSsl => consts::OPENSSL_DOWNLOAD_URL_PREFIX,
      ComponentKind::LibreSsl => consts::LIBRESSL_DOWNLOAD_URL_PREFIX,
      ComponentKind::Zlib => consts::ZLIB_DOWNLOAD_URL_PREFIX,
      ComponentKind::OpenResty => consts::OPENRESTY_DOWNLOAD_URL_PREFIX,
      ComponentKind::Freenginx => consts::FREENGINX_DOWNLOAD_URL_PREFIX,
    }
  }
}

impl fmt::Display for ComponentKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ComponentKind {
  type Err = ComponentError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ComponentKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| ComponentError::InvalidVariant(s.to_string()))
  }
}

/// One buildable component at a specific version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
  pub kind: ComponentKind,
  pub version: String,
  pub download_prefix: String,
  /// Linked statically into the server (libraries only).
  pub static_link: bool,
}

impl ComponentDescriptor {
  /// Create a descriptor using the component's default download location.
  pub fn new(kind: ComponentKind, version: impl Into<String>, static_link: bool) -> Self {
    Self {
      kind,
      version: version.into(),
      download_prefix: kind.default_download_prefix().to_string(),
      static_link,
    }
  }

  /// Override where archives are downloaded from (mirrors, tests).
  #[must_use]
  pub fn with_download_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.download_prefix = prefix.into();
    self
  }

  /// Canonical name, as it appears in archive and directory names.
  pub fn name(&self) -> &'static str {
    match self.kind {
      ComponentKind::Nginx => "nginx",
      ComponentKind::Pcre => "pcre2",
      ComponentKind::OpenSsl => "openssl",
      ComponentKind::LibreSsl => "libressl",
      ComponentKind::Zlib => "zlib",
      ComponentKind::OpenResty => openresty_name(&self.version),
      ComponentKind::Freenginx => "freenginx",
    }
  }

  /// The `--with-<name>` option that points configure at this source tree.
  pub fn option(&self) -> String {
    let name = match self.name() {
      "libressl" => "openssl",
      "pcre2" => "pcre",
      other => other,
    };
    format!("--with-{}", name)
  }

  pub fn download_url(&self) -> String {
    let prefix = self.download_prefix.trim_end_matches('/');
    let version = &self.version;
    match self.kind {
      ComponentKind::Pcre | ComponentKind::OpenSsl => {
        // Release assets live under a per-release directory.
        let name = self.name();
        format!("{prefix}/{name}-{version}/{name}-{version}.tar.gz")
      }
      ComponentKind::Nginx
      | ComponentKind::LibreSsl
      | ComponentKind::Zlib
      | ComponentKind::OpenResty
      | ComponentKind::Freenginx => format!("{prefix}/{}-{version}.tar.gz", self.name()),
    }
  }

  /// Directory the archive unpacks into, relative to the work directory.
  pub fn source_path(&self) -> String {
    format!("{}-{}", self.name(), self.version)
  }

  pub fn archive_path(&self) -> String {
    format!("{}.tar.gz", self.source_path())
  }

  pub fn log_path(&self) -> String {
    format!("{}-{}.log", self.name(), self.version)
  }

  /// Whether a user-provided base script already passes this component's option.
  pub fn is_included_with_option(&self, base_script: &str) -> bool {
    base_script.contains(&format!("{}=", self.option()))
  }

  /// Warning shown when the base script hard-codes a library path.
  pub fn library_option_warning(&self) -> String {
    format!(
      "using '{}' in the configure script is discouraged, pass --{} and --{}-version instead",
      self.option(),
      self.kind,
      self.kind
    )
  }
}

impl fmt::Display for ComponentDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.name(), self.version)
  }
}

/// OpenResty shipped as `ngx_openresty` up to 1.9.7.2.
///
/// The four version fields are weighted 1000/100/10/1; anything that is not a
/// four-field numeric version is treated as modern.
fn openresty_name(version: &str) -> &'static str {
  let fields: Vec<&str> = version.split('.').collect();
  if fields.len() != 4 {
    return "openresty";
  }

  let mut weight = 1000u64;
  let mut sum = 0u64;
  for field in fields {
    let Some(next) = field
      .parse::<u64>()
      .ok()
      .and_then(|n| n.checked_mul(weight))
      .and_then(|n| n.checked_add(sum))
    else {
      return "openresty";
    };
    sum = next;
    weight /= 10;
  }

  if sum > 1972 { "openresty" } else { "ngx_openresty" }
}
