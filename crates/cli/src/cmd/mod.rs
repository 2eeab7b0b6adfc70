mod build;
mod versions;

pub use build::{BuildArgs, cmd_build};
pub use versions::cmd_versions;
