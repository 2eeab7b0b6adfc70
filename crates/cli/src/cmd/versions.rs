//! Implementation of `ngxbuild --versions`.

use ngxbuild_lib::component::{ComponentDescriptor, ComponentKind};

use crate::output::print_stat;

/// Print the default version and download URL of every component.
pub fn cmd_versions() {
  for kind in ComponentKind::ALL {
    let descriptor = ComponentDescriptor::new(kind, kind.default_version(), false);
    print_stat(kind.as_str(), &format!("{} ({})", descriptor.version, descriptor.download_url()));
  }
}
