//! shipyard-lib: reproducible builds with a shared dependency cache.
//!
//! A project declares a pinned toolchain, locked dependencies, and a platform
//! matrix. For each platform the pipeline is:
//! - `toolchain`: materialize the pinned toolchain in the store
//! - `source`: filter the project tree to the files that affect the build
//! - `deps`: compile the dependency list once per (platform, toolchain, list)
//! - `package`: compile the project source against the cached dependencies
//!
//! `matrix` runs that pipeline across platforms in parallel, and `devenv`
//! builds an interactive environment from the same toolchain and metadata.

pub mod compile;
pub mod consts;
pub mod deps;
pub mod devenv;
pub mod error;
pub mod gc;
pub mod manifest;
pub mod matrix;
pub mod package;
pub mod platform;
pub mod source;
pub mod store;
pub mod toolchain;
pub mod util;
