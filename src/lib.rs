//! Semver range resolution and a coalescing registry client for a
//! node-semver-style package registry: parse and evaluate range
//! expressions, fetch package metadata at most once per name under
//! concurrent demand, and build a one-level dependency tree.

pub mod cache;
pub mod config;
pub mod error;
pub mod omap;
pub mod progress;
pub mod range;
pub mod registry;
pub mod tree;
pub mod version;

pub use error::{ResolveError, Result};
pub use range::RequirementSet;
pub use registry::Registry;
pub use tree::{build_tree, DependencyNode, DependencyTree};
pub use version::Version;
