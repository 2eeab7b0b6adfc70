//! ngxbuild-lib: fetch, configure, and build nginx from source.
//!
//! - [`component`]: descriptors for the server and its statically linked libraries
//! - [`fetch`]: archive download and extraction
//! - [`module`]: third-party module list, fetch, and provisioning
//! - [`configure`]: configure script synthesis and the configure/make steps
//! - [`patch`]: patch apply/revert around configure and build
//! - [`pipeline`]: the end-to-end run

pub mod component;
pub mod configure;
pub mod consts;
pub mod exec;
pub mod fetch;
pub mod module;
pub mod patch;
pub mod pipeline;
