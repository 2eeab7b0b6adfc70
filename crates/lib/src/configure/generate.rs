//! Configure script synthesis.
//!
//! [`synthesize`] merges the user's base script, statically linked
//! dependencies, third-party modules, configure options, and passthrough
//! arguments into one `nginx-configure` script. It is a pure function: the
//! same inputs always render byte-identical text.

use std::fmt;
use std::path::Path;

use crate::component::ComponentDescriptor;
use crate::consts::SSL_MODULE_FLAG;
use crate::module::ThirdPartyModule;

use super::options::{ADD_DYNAMIC_MODULE, ADD_MODULE, ConfigureOptions};

/// Script used when no base script is given.
const DEFAULT_INVOCATION: &str = "#!/bin/sh\n\n./configure";
const CONTINUATION: &str = " \\\n    ";

/// Everything the configure script is built from.
#[derive(Debug, Clone, Copy)]
pub struct ScriptInputs<'a> {
  /// User-provided configure script; may be empty.
  pub base_script: &'a str,
  pub modules: &'a [ThirdPartyModule],
  /// Statically linked dependencies, in emission order.
  pub dependencies: &'a [ComponentDescriptor],
  pub options: &'a ConfigureOptions,
  /// Directory relative module paths from options are resolved against.
  pub root_dir: &'a Path,
  /// Job count passed to configure itself (OpenResty builds its bundle during configure).
  pub parallel_jobs: Option<u32>,
  /// Extra arguments appended verbatim.
  pub passthrough: &'a [String],
}

/// A synthesized configure script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
  invocation: String,
  tokens: Vec<String>,
}

impl GeneratedScript {
  /// First line(s) of the script: a shebang plus `./configure`, or the base script.
  pub fn invocation(&self) -> &str {
    &self.invocation
  }

  /// Arguments appended to the invocation, in order.
  pub fn tokens(&self) -> &[String] {
    &self.tokens
  }

  pub fn render(&self) -> String {
    let mut script = self.invocation.clone();
    if !self.tokens.is_empty() {
      script.push_str(CONTINUATION);
      script.push_str(&self.tokens.join(CONTINUATION));
    }
    script.push('\n');
    script
  }
}

impl fmt::Display for GeneratedScript {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.render())
  }
}

/// Build the configure script.
///
/// Emission order: `-jN`, dependency options (plus the SSL module flag if a
/// crypto library is linked and the base script lacks it), module flags,
/// value options, enabled flags, passthrough arguments.
pub fn synthesize(inputs: &ScriptInputs<'_>) -> GeneratedScript {
  let mut tokens = Vec::new();

  if let Some(jobs) = inputs.parallel_jobs {
    tokens.push(format!("-j{jobs}"));
  }

  let mut crypto_linked = false;
  for dep in inputs.dependencies {
    tokens.push(format!("{}=../{}-{}", dep.option(), dep.name(), dep.version));
    crypto_linked |= dep.kind.is_crypto();
  }

  // Linking OpenSSL without the SSL module silently builds an SSL-less server.
  if crypto_linked && !inputs.base_script.contains(SSL_MODULE_FLAG) {
    tokens.push(SSL_MODULE_FLAG.to_string());
  }

  for module in inputs.modules {
    tokens.push(format!("{}={}", module_option(module.dynamic), module.configure_path()));
  }

  for (name, value) in inputs.options.active_values() {
    match name {
      ADD_MODULE | ADD_DYNAMIC_MODULE => {
        let option = module_option(name == ADD_DYNAMIC_MODULE);
        for path in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
          tokens.push(format!("{option}={}", resolve_module_path(path, inputs.root_dir)));
        }
      }
      _ => tokens.push(quote_token(&format!("{name}={value}"))),
    }
  }

  tokens.extend(inputs.options.enabled_flags().map(str::to_string));
  tokens.extend(inputs.passthrough.iter().map(|arg| quote_token(arg)));

  let invocation = if inputs.base_script.trim().is_empty() {
    DEFAULT_INVOCATION.to_string()
  } else {
    inputs.base_script.trim().to_string()
  };

  GeneratedScript { invocation, tokens }
}

fn module_option(dynamic: bool) -> &'static str {
  if dynamic { "--add-dynamic-module" } else { "--add-module" }
}

fn resolve_module_path(path: &str, root_dir: &Path) -> String {
  if Path::new(path).is_absolute() {
    path.to_string()
  } else {
    root_dir.join(path).display().to_string()
  }
}

/// Quote a token for the shell if it contains whitespace.
///
/// For `key=value` only the value is quoted, and only when the value itself
/// contains whitespace; any other token is quoted whole.
pub fn quote_token(token: &str) -> String {
  if !token.contains(char::is_whitespace) {
    return token.to_string();
  }

  match token.split_once('=') {
    Some((key, value)) if value.contains(char::is_whitespace) => format!("{key}='{value}'"),
    Some(_) => token.to_string(),
    None => format!("'{token}'"),
  }
}
