//! User-supplied configure options.

use std::collections::BTreeMap;

/// Value option whose comma-separated paths become `--add-module` flags.
pub const ADD_MODULE: &str = "add-module";
/// Value option whose comma-separated paths become `--add-dynamic-module` flags.
pub const ADD_DYNAMIC_MODULE: &str = "add-dynamic-module";

/// Options forwarded to `./configure`.
///
/// Both maps iterate in option-name order, which keeps the generated script
/// identical for identical input no matter how the options were collected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureOptions {
  /// `name=value` options; `None` or an empty value means unset.
  pub values: BTreeMap<String, Option<String>>,
  /// Bare flags; only `true` entries are emitted.
  pub flags: BTreeMap<String, bool>,
}

impl ConfigureOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.values.insert(name.into(), Some(value.into()));
  }

  pub fn set_flag(&mut self, name: impl Into<String>, enabled: bool) {
    self.flags.insert(name.into(), enabled);
  }

  /// Append module paths to `add-module` (or `add-dynamic-module`).
  pub fn add_module_paths<S: AsRef<str>>(&mut self, dynamic: bool, paths: &[S]) {
    if paths.is_empty() {
      return;
    }
    let key = if dynamic { ADD_DYNAMIC_MODULE } else { ADD_MODULE };
    let joined = paths.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",");

    let entry = self.values.entry(key.to_string()).or_insert(None);
    *entry = match entry.take().filter(|v| !v.is_empty()) {
      Some(existing) => Some(format!("{existing},{joined}")),
      None => Some(joined),
    };
  }

  /// Set values, skipping unset and empty ones.
  pub fn active_values(&self) -> impl Iterator<Item = (&str, &str)> {
    self.values.iter().filter_map(|(name, value)| match value.as_deref() {
      Some(v) if !v.is_empty() => Some((name.as_str(), v)),
      _ => None,
    })
  }

  /// Enabled flags.
  pub fn enabled_flags(&self) -> impl Iterator<Item = &str> {
    self
      .flags
      .iter()
      .filter(|(_, enabled)| **enabled)
      .map(|(name, _)| name.as_str())
  }
}
