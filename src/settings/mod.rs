//! Hierarchical per-directory settings
//!
//! A `jsharness.json` file governs its directory subtree. Files can inherit
//! from the nearest ancestor file or from an explicit path, and every path
//! they declare is expanded and made absolute before callers see it.

mod expand;
mod merge;
mod resolver;
mod types;

pub use expand::{SettingsEnvironment, SettingsEnvironments};
pub use resolver::SettingsResolver;
pub use types::*;
